pub const BASH: &str = r##"# dgrid completion for bash
#
# Install:
#   source <(dgrid completions bash)
#   # or persist it:
#   dgrid completions bash > ~/.bash_completion.d/dgrid
#   echo 'source ~/.bash_completion.d/dgrid' >> ~/.bashrc

_dgrid() {
    local cur prev subcmd i
    cur="${COMP_WORDS[COMP_CWORD]}"
    prev="${COMP_WORDS[COMP_CWORD-1]}"
    subcmd=""

    local commands="init submit status sweep retry completions version help"

    for (( i=1; i < COMP_CWORD; i++ )); do
        if [[ "${COMP_WORDS[i]}" != -* ]]; then
            subcmd="${COMP_WORDS[i]}"
            break
        fi
    done

    case "$subcmd" in
        completions)
            COMPREPLY=( $(compgen -W "bash zsh fish" -- "$cur") )
            return 0
            ;;
        submit)
            case "$prev" in
                --priority)
                    COMPREPLY=( $(compgen -W "critical high medium low" -- "$cur") )
                    return 0
                    ;;
                --timeout|--repo-path)
                    COMPREPLY=()
                    return 0
                    ;;
                *)
                    COMPREPLY=( $(compgen -W "--timeout --priority --repo-path" -- "$cur") )
                    return 0
                    ;;
            esac
            ;;
        init|status|sweep)
            COMPREPLY=( $(compgen -W "--repo-path" -- "$cur") )
            return 0
            ;;
        retry)
            COMPREPLY=( $(compgen -W "--repo-path" -- "$cur") )
            return 0
            ;;
    esac

    COMPREPLY=( $(compgen -W "$commands" -- "$cur") )
}

complete -F _dgrid dgrid
"##;

pub const ZSH: &str = r##"#compdef dgrid
# dgrid completion for zsh
#
# Install:
#   dgrid completions zsh > ~/.zsh/completions/_dgrid
#   # Ensure the directory is in fpath (add to ~/.zshrc):
#   #   fpath=(~/.zsh/completions $fpath)
#   #   autoload -Uz compinit && compinit

_dgrid() {
    local state line context
    typeset -A opt_args

    _arguments -C \
        '(-h --help)'{-h,--help}'[Show help]' \
        '(-V --version)'{-V,--version}'[Print version]' \
        '1: :->command' \
        '*:: :->args' && return 0

    case $state in
        command)
            local -a commands
            commands=(
                'init:Create the tasks/ and nodes/ layout'
                'submit:Write a new job definition into tasks/queue/'
                'status:Print a count of tasks in each lifecycle directory'
                'sweep:Run one orphan-sweep pass'
                'retry:Move a failed task back into tasks/queue/'
                'completions:Print shell completion scripts'
                'version:Print version'
                'help:Show help'
            )
            _describe 'command' commands
            ;;
        args)
            case $line[1] in
                completions)
                    local -a shells
                    shells=('bash:Bash completion script' 'zsh:Zsh completion script' 'fish:Fish completion script')
                    _describe 'shell' shells
                    ;;
                submit)
                    _arguments \
                        '--timeout[Wall-clock timeout in seconds]:timeout:' \
                        '--priority[Priority level]:priority:(critical high medium low)' \
                        '--repo-path[Repository working copy]:path:_files -/' \
                        ':task_id:' \
                        ':script:'
                    ;;
                init|status|sweep)
                    _arguments '--repo-path[Repository working copy]:path:_files -/'
                    ;;
                retry)
                    _arguments \
                        '--repo-path[Repository working copy]:path:_files -/' \
                        ':task_id:'
                    ;;
            esac
            ;;
    esac
}

_dgrid "$@"
"##;

pub const FISH: &str = r##"# dgrid completion for fish shell
#
# Install:
#   dgrid completions fish > ~/.config/fish/completions/dgrid.fish

complete -c dgrid -f

set -l dgrid_cmds init submit status sweep retry completions version help

complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a init        -d 'Create the tasks/ and nodes/ layout'
complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a submit      -d 'Write a new job definition into tasks/queue/'
complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a status      -d 'Print a count of tasks in each lifecycle directory'
complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a sweep       -d 'Run one orphan-sweep pass'
complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a retry       -d 'Move a failed task back into tasks/queue/'
complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a completions -d 'Print shell completion scripts'
complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a version     -d 'Print version'
complete -c dgrid -n "not __fish_seen_subcommand_from $dgrid_cmds" -a help        -d 'Show help'

complete -c dgrid -n '__fish_seen_subcommand_from completions' -a 'bash' -d 'Bash completion script'
complete -c dgrid -n '__fish_seen_subcommand_from completions' -a 'zsh'  -d 'Zsh completion script'
complete -c dgrid -n '__fish_seen_subcommand_from completions' -a 'fish' -d 'Fish completion script'

complete -c dgrid -n '__fish_seen_subcommand_from submit' -l timeout    -d 'Wall-clock timeout in seconds'
complete -c dgrid -n '__fish_seen_subcommand_from submit' -l priority   -d 'Priority level' -a 'critical high medium low'
complete -c dgrid -n '__fish_seen_subcommand_from init submit status sweep retry' -l repo-path -d 'Repository working copy'
"##;
