use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Silent batch installer for Windows software packages")]
pub struct Args {
    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub sub: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Install catalog entries one after another (all of them when no names are given)
    Install {
        /// Catalog names, installed in the order given
        names: Vec<String>,

        /// Catalog file overriding the configured one
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Install the packages saved in this profile
        #[arg(long, conflicts_with = "names")]
        profile: Option<String>,

        /// Print the batch response as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// List installer files in the installers directory
    Available,
    /// Inspect batch logs
    Logs {
        #[command(subcommand)]
        action: LogsCmd,
    },
    /// Manage saved package selections
    Profiles {
        #[command(subcommand)]
        action: ProfilesCmd,
    },
}

#[derive(Subcommand, Debug)]
pub enum LogsCmd {
    /// List batch logs, newest first
    List,
    /// Print one batch log
    Show { id: String },
    /// Delete one batch log
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ProfilesCmd {
    List,
    /// Save a selection of catalog names
    Save {
        name: String,

        #[arg(required = true)]
        names: Vec<String>,

        /// Overwrite an existing profile instead of creating a new one
        #[arg(long)]
        id: Option<String>,

        /// Catalog file overriding the configured one
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}
