use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "carelog",
    about = "Local encryption for personal health records",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Optional subcommand; defaults to `status` when absent.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Run a health check against the record store.
    Health,
    /// Show whether encryption is enabled and how each category is stored.
    Status,
    /// Choose a password and encrypt every sensitive category.
    Enable,
    /// Decrypt every category and remove the password.
    Disable,
    /// Re-encrypt every category under a new password.
    ChangePassword,
    /// Print a category, decrypting it when encryption is enabled.
    Read {
        /// Category name, e.g. `vitals`.
        category: String,
    },
    /// Store a JSON value for a category, encrypting it when encryption is enabled.
    Write {
        category: String,
        /// JSON value; read from stdin when omitted.
        value: Option<String>,
    },
    /// Clear inconsistent encryption flags. Encrypted records become unreadable.
    Reset {
        /// Required confirmation.
        #[arg(long)]
        force: bool,
    },
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
