//! CLI struct definitions for the `actor-migration` command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "actor-migration",
    version = env!("CARGO_PKG_VERSION"),
    about = "Inspect the SQL fragments built for user-reference fields during an actor migration."
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ConfigArgs {
    /// Engine config file, or a directory containing migration.toml.
    #[clap(long, default_value = "migration.toml")]
    pub config: PathBuf,
    /// Append deprecation notices to this JSONL file instead of stderr.
    #[clap(long)]
    pub notices: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct JoinCli {
    #[clap(flatten)]
    pub config: ConfigArgs,
    /// Field key, e.g. rev_user.
    #[clap(long)]
    pub field: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct WhereCli {
    #[clap(flatten)]
    pub config: ConfigArgs,
    /// Field key, e.g. rev_user.
    #[clap(long)]
    pub field: String,
    /// SQLite database holding the actor table.
    #[clap(long)]
    pub db: PathBuf,
    /// Storage domain the database belongs to.
    #[clap(long, default_value = "default")]
    pub domain: String,
    /// User as `<id>:<name>`; id 0 for anonymous users. Repeatable.
    #[clap(long = "user")]
    pub users: Vec<String>,
    /// Match registered users by name instead of id.
    #[clap(long)]
    pub no_id_match: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Validate a config file and list its fields
    Check(ConfigArgs),
    /// Print the join descriptor for a field as JSON
    Join(JoinCli),
    /// Print the membership predicate for a set of users as JSON
    Where(WhereCli),
    /// List the stage presets and their bitmasks
    Stages,
}
