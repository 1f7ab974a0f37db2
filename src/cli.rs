use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "cogniflow",
    version,
    about = "Capture short notes, organize them and ask a local AI about them"
)]
pub struct Cli {
    /// Override the log level from settings (trace|debug|info|warn|error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Launch the interactive TUI
    Tui,
    /// List saved projects, most recent first
    Projects,
    /// Print the notes of a saved project
    Show {
        /// Project file id as shown by `projects`
        file_id: String,
    },
    /// Export the inbox of a saved project to the exports directory
    Export {
        /// Project file id as shown by `projects`
        file_id: String,
    },
    /// Delete a saved project
    Delete {
        /// Project file id as shown by `projects`
        file_id: String,
    },
    /// Send a single prompt to the AI service and print the answer
    Ask {
        /// Prompt text
        prompt: String,
        /// Model to use instead of the configured one
        #[arg(long)]
        model: Option<String>,
        /// Seconds to wait for the answer
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List models offered by the AI service
    Models,
}
