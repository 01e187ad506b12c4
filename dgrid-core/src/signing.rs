//! Optional verification of a job definition's detached signature.
//!
//! The signing scheme is file-based: a trusted-keys file lists fingerprints
//! the grid accepts, and a `<task-id>.sig` file alongside a job definition
//! carries a GPG detached signature over the job definition's bytes.
//! [`TrustedKeySigner::gpg`] wires up the default `gpg --verify` backed
//! check; the `verify_fn` it's built from stays swappable for tests or an
//! alternate scheme (e.g. minisign).

use anyhow::Result;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::NamedTempFile;

/// Port for verifying a task's detached signature against a trusted-keys set.
pub trait TaskSigner {
    /// Whether signing is enabled at all. When `false`, the claim protocol
    /// never calls [`TaskSigner::verify`] and every task is claimable.
    fn is_enabled(&self) -> bool;

    /// Verify `sig_bytes` (the contents of `<task-id>.sig`) over
    /// `job_bytes` (the contents of `tasks/queue/<task-id>`). `None` for
    /// `sig_bytes` means the signature file is absent.
    fn verify(&self, job_bytes: &[u8], sig_bytes: Option<&[u8]>) -> bool;
}

/// Disabled signer: every task is treated as trusted.
pub struct NoSigning;

impl TaskSigner for NoSigning {
    fn is_enabled(&self) -> bool {
        false
    }

    fn verify(&self, _job_bytes: &[u8], _sig_bytes: Option<&[u8]>) -> bool {
        true
    }
}

/// Trusted-key-fingerprint-based signer. The actual cryptographic check is
/// left to the concrete scheme configured by the operator; this struct only
/// owns the trusted set and the enable/disable switch, matching the
/// source's split between key management and the verification call site.
pub struct TrustedKeySigner {
    trusted_fingerprints: HashSet<String>,
    verify_fn: Box<dyn Fn(&[u8], &[u8], &HashSet<String>) -> bool + Send + Sync>,
}

impl TrustedKeySigner {
    /// Load a trusted-keys file: one fingerprint per line, `#`-comments and
    /// blank lines ignored (the same layered-config-file convention used
    /// elsewhere in this codebase).
    pub fn load(
        trusted_keys_file: &Path,
        verify_fn: impl Fn(&[u8], &[u8], &HashSet<String>) -> bool + Send + Sync + 'static,
    ) -> Result<Self> {
        let content = fs::read_to_string(trusted_keys_file)?;
        let trusted_fingerprints = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Ok(Self {
            trusted_fingerprints,
            verify_fn: Box::new(verify_fn),
        })
    }

    /// Load a trusted-keys file and verify with the system `gpg` binary,
    /// matching the detached-signature scheme: `gpg --verify <sig> <job>`,
    /// with the signer's fingerprint pulled out of gpg's stderr.
    pub fn gpg(trusted_keys_file: &Path) -> Result<Self> {
        Self::load(trusted_keys_file, gpg_verify)
    }

    pub fn trusted_key_count(&self) -> usize {
        self.trusted_fingerprints.len()
    }
}

/// Shell out to `gpg --verify` over temporary copies of the job and
/// signature bytes, then check the signer's fingerprint against the
/// trusted set.
fn gpg_verify(job_bytes: &[u8], sig_bytes: &[u8], trusted: &HashSet<String>) -> bool {
    let job_file = match NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return false,
    };
    let sig_file = match NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return false,
    };
    if fs::write(job_file.path(), job_bytes).is_err() || fs::write(sig_file.path(), sig_bytes).is_err() {
        return false;
    }

    let output = match Command::new("gpg")
        .arg("--verify")
        .arg(sig_file.path())
        .arg(job_file.path())
        .output()
    {
        Ok(o) => o,
        Err(_) => return false,
    };
    if !output.status.success() {
        return false;
    }

    match extract_fingerprint(&String::from_utf8_lossy(&output.stderr)) {
        Some(fingerprint) => trusted.contains(&fingerprint),
        None => false,
    }
}

/// Pull a normalized key fingerprint out of `gpg --verify`'s stderr.
/// Prefers a `... fingerprint: AAAA BBBB ...` line; falls back to the
/// trailing token of a `using ... key ...` line.
fn extract_fingerprint(gpg_stderr: &str) -> Option<String> {
    for line in gpg_stderr.lines() {
        if let Some(idx) = line.to_lowercase().find("fingerprint:") {
            let rest = &line[idx + "fingerprint:".len()..];
            let normalized = rest.split_whitespace().collect::<String>().to_uppercase();
            if !normalized.is_empty() {
                return Some(normalized);
            }
        }
    }
    for line in gpg_stderr.lines() {
        let lower = line.to_lowercase();
        if lower.contains("using") && lower.contains("key") {
            if let Some(token) = line.split_whitespace().last() {
                return Some(token.to_uppercase());
            }
        }
    }
    None
}

impl TaskSigner for TrustedKeySigner {
    fn is_enabled(&self) -> bool {
        true
    }

    fn verify(&self, job_bytes: &[u8], sig_bytes: Option<&[u8]>) -> bool {
        match sig_bytes {
            Some(sig) => (self.verify_fn)(job_bytes, sig, &self.trusted_fingerprints),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn no_signing_always_verifies() {
        let signer = NoSigning;
        assert!(!signer.is_enabled());
        assert!(signer.verify(b"job", None));
        assert!(signer.verify(b"job", Some(b"anything")));
    }

    #[test]
    fn missing_signature_file_fails_verification() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "FINGERPRINT-A\n").unwrap();
        let signer = TrustedKeySigner::load(file.path(), |_, _, _| true).unwrap();
        assert!(signer.is_enabled());
        assert!(!signer.verify(b"job bytes", None));
    }

    #[test]
    fn trusted_signature_passes_when_verify_fn_agrees() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "# comment\n\nFINGERPRINT-A\n").unwrap();
        let signer = TrustedKeySigner::load(file.path(), |_, sig, trusted| {
            trusted.contains(&String::from_utf8_lossy(sig).to_string())
        })
        .unwrap();
        assert_eq!(signer.trusted_key_count(), 1);
        assert!(signer.verify(b"job bytes", Some(b"FINGERPRINT-A")));
        assert!(!signer.verify(b"job bytes", Some(b"FINGERPRINT-UNKNOWN")));
    }

    #[test]
    fn extract_fingerprint_reads_labeled_line() {
        let stderr = "gpg: Signature made Mon 01 Jan 2024\n\
                       gpg: Primary key fingerprint: ABCD 1234 5678 90EF\n";
        assert_eq!(extract_fingerprint(stderr), Some("ABCD1234567890EF".to_string()));
    }

    #[test]
    fn extract_fingerprint_falls_back_to_key_id() {
        let stderr = "gpg: Signature made Mon 01 Jan 2024 using RSA key 1234567890ABCDEF\n";
        assert_eq!(extract_fingerprint(stderr), Some("1234567890ABCDEF".to_string()));
    }

    #[test]
    fn extract_fingerprint_absent_returns_none() {
        assert_eq!(extract_fingerprint("gpg: nothing useful here\n"), None);
    }
}
