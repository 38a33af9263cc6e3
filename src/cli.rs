use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "focusroom", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize configuration
    Init,

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List open rooms
    Rooms {
        /// Include finished rooms
        #[arg(short, long)]
        all: bool,
    },

    /// Create a room and stay in it
    Create {
        /// Room name
        name: String,

        /// Capacity
        #[arg(short, long)]
        max_participants: Option<u32>,

        /// Focus duration in minutes
        #[arg(short, long)]
        duration: Option<u64>,

        /// Seconds an idle room survives after its timer ends
        #[arg(long)]
        removal_delay: Option<u64>,
    },

    /// Join a room and stay until Ctrl-C
    Join {
        /// Room ID
        room_id: String,
    },

    /// Delete a room you created
    Delete {
        /// Room ID
        room_id: String,
    },

    /// Show how many users are online
    Online,

    /// Delete stale rooms
    Sweep {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,

        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },
}
