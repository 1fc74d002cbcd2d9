//! # Shell Completion Module
//!
//! Static completion scripts come from `clap_complete`. Genre names are
//! dynamic: `stride complete-genres` prints the umbrella ids the taxonomy
//! understands, for shells that want to offer them after `--genres`.
//!
//! ```bash
//! stride completion bash > ~/.local/share/bash-completion/completions/stride
//! stride completion zsh > ~/.config/zsh/completions/_stride
//! ```

use crate::cli::Shell;
use crate::taxonomy::KeywordTaxonomy;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Genre filter values worth offering, sorted.
#[must_use]
pub fn genre_completions() -> Vec<&'static str> {
    let mut genres = KeywordTaxonomy::umbrella_ids();
    genres.sort_unstable();
    genres
}

/// One genre per line on `out`.
pub fn write_genre_completions(out: &mut impl Write) -> io::Result<()> {
    for genre in genre_completions() {
        writeln!(out, "{genre}")?;
    }
    Ok(())
}
