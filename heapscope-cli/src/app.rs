use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// heapscope - symbolicate output of obfuscated .NET programs with a renaming map
#[derive(Debug, Parser)]
#[command(name = "heapscope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rewrite the obfuscated frames of a stack trace.
    Stack {
        /// Path to the renaming map (XML).
        #[arg(long, value_name = "XML")]
        map: PathBuf,

        /// File holding the stack trace; read from stdin if omitted.
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,
    },

    /// Translate an obfuscated type name, generics and arrays included, to its original.
    Type {
        /// Path to the renaming map (XML).
        #[arg(long, value_name = "XML")]
        map: PathBuf,

        /// Obfuscated type name, e.g. "List<System.Obfuscation.a>[]".
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Translate an original type name to its obfuscated form.
    Obfuscate {
        /// Path to the renaming map (XML).
        #[arg(long, value_name = "XML")]
        map: PathBuf,

        /// Original type name, e.g. "List<Shop.Order>[]".
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Summarize the renamed types of a map with their field and method counts.
    Map {
        /// Path to the renaming map (XML).
        #[arg(long, value_name = "XML")]
        map: PathBuf,

        /// Show only types whose original or obfuscated name contains this text.
        #[arg(long, value_name = "NAME")]
        r#type: Option<String>,
    },
}
