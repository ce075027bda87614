//! CLI argument definitions using clap

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// scribe - Run speech-to-text jobs in isolated worker processes
#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit an audio file for transcription
    Submit(SubmitArgs),

    /// List jobs known to the daemon
    Jobs,

    /// Terminate every running job
    StopAll,

    /// Print job events as they happen
    Watch,

    /// List installed models and their languages
    Models,

    /// List finished transcriptions
    Archive {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Daemon management commands
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Run a single job read from stdin (used by the daemon)
    #[command(hide = true)]
    Worker,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Audio file to transcribe
    pub file: PathBuf,

    /// Whisper model name (e.g. base, large-v3)
    #[arg(short, long)]
    pub model: String,

    /// Language code, or "auto" to detect it
    #[arg(short, long)]
    pub language: String,

    /// Run on the GPU
    #[arg(long)]
    pub gpu: bool,

    /// Use full precision weights instead of int8
    #[arg(long)]
    pub float16: bool,

    /// Label segments by speaker
    #[arg(long)]
    pub speaker_detection: bool,

    /// Expected number of speakers ("auto" to detect)
    #[arg(long, requires = "speaker_detection")]
    pub num_speakers: Option<String>,

    /// Follow the job's events until it finishes
    #[arg(short, long)]
    pub watch: bool,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Start the background daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Restart the daemon
    Restart,

    /// Check daemon status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn submit_flags_parse() {
        let cli = Cli::parse_from([
            "scribe",
            "submit",
            "talk.wav",
            "--model",
            "large-v3",
            "--language",
            "en",
            "--float16",
            "--speaker-detection",
            "--num-speakers",
            "3",
        ]);

        match cli.command {
            Commands::Submit(args) => {
                assert_eq!(args.file, PathBuf::from("talk.wav"));
                assert!(args.float16);
                assert!(!args.gpu);
                assert_eq!(args.num_speakers.as_deref(), Some("3"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
