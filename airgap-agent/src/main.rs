mod cli;
mod config;
mod logger;

use airgap_core::db::connection::{close_pool, create_pool};
use airgap_core::db::migrate::migrate;
use airgap_core::provider::{Provider, ProviderFactory};
use airgap_core::registry_push::{self, PushOptions, RegistryTarget};
use airgap_core::sync::SyncManager;
use airgap_core::transfer::{self, ExportOptions, ImportOptions};
use airgap_core::CoreError;
use clap::Parser;
use cli::{Args, Command};
use config::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// No concrete provider implementations ship with the core engine; every
/// configured type is rejected until an operator registers a real factory.
fn unregistered_provider_factory() -> ProviderFactory {
    Arc::new(|type_tag, _data_dir, _raw| -> Result<Arc<dyn Provider>, CoreError> {
        Err(CoreError::Invalid(format!(
            "no provider implementation registered for type {type_tag:?}"
        )))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    logger::init(log_level)?;

    tracing::info!(
        "airgap-agent v{} (agent_id: {})",
        env!("CARGO_PKG_VERSION"),
        config.agent.id
    );

    std::fs::create_dir_all(&config.agent.data_dir)?;

    let db_path = config.db_path().to_string_lossy().to_string();
    let pool = create_pool(&db_path)?;
    migrate(&pool)?;

    let exit_code = match run(args.command, &config, pool.clone()).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            1
        }
    };

    close_pool(&pool);
    std::process::exit(exit_code);
}

async fn run(command: Command, config: &Config, pool: airgap_core::db::DbPool) -> anyhow::Result<()> {
    match command {
        Command::Sync { provider, dry_run } => {
            let manager = SyncManager::new(pool, config.agent.data_dir.clone())
                .with_worker_count(config.performance.worker_count);
            manager
                .reconfigure_providers(unregistered_provider_factory())
                .await?;
            let report = manager
                .sync_one(&provider, dry_run, CancellationToken::new())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::SyncAll => {
            let manager = SyncManager::new(pool, config.agent.data_dir.clone())
                .with_worker_count(config.performance.worker_count);
            manager
                .reconfigure_providers(unregistered_provider_factory())
                .await?;
            let reports = manager.sync_all(CancellationToken::new()).await;
            let mut failed = 0;
            for report in &reports {
                match report {
                    Ok(r) => println!("{}", serde_json::to_string_pretty(r)?),
                    Err(e) => {
                        failed += 1;
                        tracing::error!(error = %e, "provider sync failed");
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} provider(s) failed to sync");
            }
            Ok(())
        }
        Command::Scan { provider } => {
            let manager = SyncManager::new(pool, config.agent.data_dir.clone());
            let report = manager.scan_local(&provider).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Status => {
            let manager = SyncManager::new(pool, config.agent.data_dir.clone());
            let status = manager.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Export { output_dir, providers } => {
            let conn = pool.get()?;
            let report = transfer::export(
                &conn,
                &config.agent.data_dir,
                &ExportOptions {
                    output_dir,
                    providers,
                    split_size: config.sync.split_bytes,
                    compression: config.sync.compression.clone(),
                    compression_level: config.sync.compression_level,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Import {
            source_dir,
            verify_only,
            force,
            rpm_metadata_tool,
        } => {
            let conn = pool.get()?;
            let report = transfer::import(
                &conn,
                &config.agent.data_dir,
                &ImportOptions {
                    source_dir,
                    verify_only,
                    force,
                    skip_validated: !force,
                },
                rpm_metadata_tool.as_deref(),
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("import reported failures; see output above");
            }
            Ok(())
        }
        Command::Push {
            source_provider,
            image_name,
            endpoint,
            reference,
            repo_prefix,
            insecure,
            dest_user,
            dest_password,
            copy_tool,
        } => {
            let credentials = match (dest_user, dest_password) {
                (Some(u), Some(p)) => Some((u, p)),
                _ => None,
            };
            let opts = PushOptions {
                data_dir: config.agent.data_dir.clone(),
                source_provider,
                image_name,
                reference,
                target: RegistryTarget {
                    endpoint,
                    repo_prefix,
                    insecure,
                    credentials,
                    copy_tool_path: copy_tool,
                },
            };
            let report = registry_push::push_image(&opts).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
