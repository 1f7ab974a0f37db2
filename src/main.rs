mod backend;
mod bus;
mod cli;
mod commands;
mod config;
mod controller;
mod correlator;
mod log_buffer;
mod logging;
mod model;
mod session;
mod storage;
mod theme;
mod ui;

use anyhow::Result;
use clap::Parser;
use config::{AppDirs, Settings};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let dirs = AppDirs::locate()?;
    let settings = config::load_settings(&dirs.settings_path()).unwrap_or_else(|err| {
        eprintln!("warning: {err:#}; using default settings");
        Settings::default()
    });
    let level = args.log_level.as_deref().unwrap_or(&settings.log_level);
    logging::init_logging(level, &dirs.log_dir())?;

    let command = args.command.unwrap_or(cli::Command::Tui);
    match command {
        cli::Command::Tui => commands::tui(&dirs, settings),
        cli::Command::Projects => commands::projects(&dirs, &settings),
        cli::Command::Show { file_id } => commands::show(&dirs, &settings, file_id),
        cli::Command::Export { file_id } => commands::export(&dirs, &settings, file_id),
        cli::Command::Delete { file_id } => commands::delete(&dirs, &settings, file_id),
        cli::Command::Ask {
            prompt,
            model,
            timeout,
        } => commands::ask(&dirs, &settings, prompt, model, timeout),
        cli::Command::Models => commands::models(&settings),
    }
}
