//! Command line interface.

use clap::{Parser, Subcommand};

/// Streaming WAV relay and player for a TTS provider
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the relay HTTP server (default)
    Serve,

    /// Synthesize text and play it on a local output device
    Play(PlayCommand),

    /// List output devices usable with --device / OUTPUT_DEVICE
    Devices,
}

#[derive(Parser, Debug)]
pub struct PlayCommand {
    /// Text to synthesize
    pub text: String,

    /// Output device index or exact name (overrides OUTPUT_DEVICE)
    #[arg(short, long)]
    pub device: Option<String>,
}

impl Cli {
    pub fn into_command(self) -> Commands {
        self.command.unwrap_or(Commands::Serve)
    }
}
