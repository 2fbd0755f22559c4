//! Admin CLI for the arbor kernel.

pub mod tree;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "arbor", about = "Orchestration kernel admin tool", version)]
pub struct Cli {
    /// Path to a config file (defaults to .arbor/config.yaml + env)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and apply migrations
    Init,

    /// Render a run subtree with lineage and statuses
    Tree {
        /// Root run of the subtree to render
        run_id: Uuid,
    },

    /// Delete expired token registry rows
    JtiSweep,
}
