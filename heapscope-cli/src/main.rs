mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })
    .expect("failed to set Ctrl+C handler");

    let cli = Cli::parse();

    // Show heapscope info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("heapscope", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Stack { map, path } => commands::stack::run(map, path.as_deref(), &cli.global),
        Command::Type { map, name } => commands::names::deobfuscate(map, name, &cli.global),
        Command::Obfuscate { map, name } => commands::names::obfuscate(map, name, &cli.global),
        Command::Map { map, r#type } => commands::map::run(map, r#type.as_deref(), &cli.global),
    }
}
