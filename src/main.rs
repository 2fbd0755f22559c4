//! Arbor CLI entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use arbor::adapters::sqlite::{
    initialize_database, SqliteAgentRepository, SqliteGroupRepository, SqliteIdentityRepository,
    SqlitePolicyRepository, SqliteRunRepository,
};
use arbor::cli::{tree::render_run_tree, Cli, Commands};
use arbor::infrastructure::{config::ConfigLoader, logging::init_logging};
use arbor::services::{OrchestrationKernel, PolicyService, WorkloadIdentityService};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    init_logging(&config.logging)?;

    let pool = initialize_database(&config.database)
        .await
        .with_context(|| format!("failed to open database at {}", config.database.path))?;

    match cli.command {
        Commands::Init => {
            println!("database ready at {}", config.database.path);
        }
        Commands::Tree { run_id } => {
            let runs = Arc::new(SqliteRunRepository::new(pool.clone()));
            let identity =
                WorkloadIdentityService::new(Arc::new(SqliteIdentityRepository::new(pool.clone())));
            let policy = PolicyService::new(
                Arc::new(SqlitePolicyRepository::new(pool.clone())),
                runs.clone(),
            );
            let kernel = OrchestrationKernel::new(
                runs,
                Arc::new(SqliteGroupRepository::new(pool.clone())),
                Arc::new(SqliteAgentRepository::new(pool)),
                policy,
                identity,
                config.orchestration,
            );

            let tree = kernel
                .query_tree(run_id)
                .await
                .with_context(|| format!("failed to load subtree of {run_id}"))?;
            print!("{}", render_run_tree(&tree));
        }
        Commands::JtiSweep => {
            let identity =
                WorkloadIdentityService::new(Arc::new(SqliteIdentityRepository::new(pool)));
            let swept = identity.sweep_expired_jtis().await?;
            println!("swept {swept} expired token registry rows");
        }
    }

    Ok(())
}
