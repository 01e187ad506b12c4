//! Leveled progress logging for the worker and sweeper binaries.
//!
//! No external logging framework: levels are a thin filter over formatted
//! `println!`/`eprintln!` output, gated by [`Config::log_level`]
//! (`crate::config::LogLevel`) — errors and warnings go to stderr, everything
//! else to stdout. Credentials and authenticated remote URLs must never be
//! passed into these calls.

use crate::config::LogLevel;
use chrono::Utc;

pub fn error(configured: LogLevel, msg: &str) {
    emit(configured, LogLevel::Error, msg);
}

pub fn warn(configured: LogLevel, msg: &str) {
    emit(configured, LogLevel::Warn, msg);
}

pub fn info(configured: LogLevel, msg: &str) {
    emit(configured, LogLevel::Info, msg);
}

pub fn debug(configured: LogLevel, msg: &str) {
    emit(configured, LogLevel::Debug, msg);
}

fn emit(configured: LogLevel, level: LogLevel, msg: &str) {
    if level > configured {
        return;
    }
    let line = format!("{} [{level}] {msg}", Utc::now().to_rfc3339());
    match level {
        LogLevel::Error | LogLevel::Warn => eprintln!("{line}"),
        LogLevel::Info | LogLevel::Debug => println!("{line}"),
    }
}
