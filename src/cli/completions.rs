//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::io::{self, Write};

use crate::cli::args::Cli;

/// Print the completion script for `shell` to stdout.
pub fn print(shell: Shell) {
    write(shell, &mut io::stdout());
}

pub fn write(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let command_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, command_name, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_script_knows_subcommands() {
        let mut script = Vec::new();
        write(Shell::Bash, &mut script);
        let script = String::from_utf8(script).unwrap();

        assert!(script.contains("submit"));
        assert!(script.contains("stop-all"));
        assert!(script.contains("scribe"));
    }
}
