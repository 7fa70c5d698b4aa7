//! # Shell Completion Module
//!
//! Completion scripts are generated by `clap_complete` straight from the
//! [`Args`](crate::cli::Args) definition, so they never drift from the CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! radiomuse completion bash > ~/.local/share/bash-completion/completions/radiomuse
//!
//! # Generate zsh completions
//! radiomuse completion zsh > ~/.config/zsh/completions/_radiomuse
//! ```

use clap::Command;
use clap_complete::{generate, Shell as CompletionShell};
use std::io::Write;

use crate::cli::Shell;

/// Write the completion script for `shell` to `out`.
pub fn generate_completions<W: Write>(shell: Shell, cmd: &mut Command, out: &mut W) {
    let name = cmd.get_name().to_string();
    generate(shell_to_completion_shell(shell), cmd, name, out);
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::CommandFactory;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(shell_to_completion_shell(Shell::Bash), CompletionShell::Bash);
        assert_eq!(shell_to_completion_shell(Shell::Zsh), CompletionShell::Zsh);
    }

    #[test]
    fn test_scripts_name_every_subcommand() {
        for shell in [Shell::Bash, Shell::Fish, Shell::Zsh] {
            let mut out = Vec::new();
            generate_completions(shell, &mut Args::command(), &mut out);
            let script = String::from_utf8_lossy(&out);
            assert!(script.contains("radiomuse"), "{shell:?} script lacks the binary name");
            for subcommand in ["play", "report", "clean-cache", "completion"] {
                assert!(script.contains(subcommand), "{shell:?} script lacks {subcommand}");
            }
        }
    }
}
