use clap::{Args, Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "securestore",
    about = "Keep credentials out of your main config, encrypted at rest",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(flatten)]
    Entry(EntryCommand),
    /// Print version and exit.
    Version,
    /// Run a write/read/remove probe against the configured store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Commands operating on stored entries.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum EntryCommand {
    /// Print the value stored under a key.
    Get {
        #[command(flatten)]
        key: KeyArgs,
        /// Print every value of a multi-valued key, one per line.
        #[arg(long)]
        all: bool,
    },
    /// Store a single value. Reads the value from stdin when omitted.
    Set {
        #[command(flatten)]
        key: KeyArgs,
        value: Option<String>,
    },
    /// Store an ordered list of values (an empty list is allowed).
    SetList {
        #[command(flatten)]
        key: KeyArgs,
        values: Vec<String>,
    },
    /// Remove a key.
    Unset {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// List stored keys (values are never printed).
    List {
        /// Emit JSON instead of one key per line.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct KeyArgs {
    pub section: String,
    pub name: String,
    /// Optional subsection, e.g. a host name.
    #[arg(long, short = 's')]
    pub subsection: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
