// src/main.rs
use anyhow::Context;
use clap::Parser;
use ct_vat::cli::{Cli, Command, ServersCommand};
use ct_vat::config::Config;
use ct_vat::database::{self, MemoryStorage, PostgresBackend, RegistrationError, Storage};
use ct_vat::export::export_certificates;
use ct_vat::pipeline::Pipeline;
use ct_vat::report::{top_with_others, MAX_GROUPS};
use ct_vat::stats::StatsCollector;
use ct_vat::types::{normalize_server_url, LogServer};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();
    cli.validate()?;

    let config = Config::from_file(Path::new(&cli.config))?;

    // Initialize logging
    let log_level = cli
        .log_level_override()
        .unwrap_or(config.logging.level.as_str());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();

    let storage = open_storage(&config).await?;
    register_configured_servers(storage.as_ref(), &config).await?;

    match cli.command {
        Command::Servers(ServersCommand::Add { url, nickname }) => {
            let server = database::register_server(storage.as_ref(), &url, nickname.as_deref()).await?;
            println!("Registered server #{}: {}", server.id(), server);
        }
        Command::Servers(ServersCommand::List) => {
            for server in storage.list_servers().await? {
                println!("#{:<4} {}", server.id(), server);
            }
        }
        Command::Run {
            servers,
            resume_vat,
        } => run(&config, storage, &servers, resume_vat).await?,
        Command::ResumeVat => resume_vat_searches(&config, storage).await?,
        Command::Report => report(storage.as_ref()).await?,
        Command::Export { vat_only, output } => {
            let rows = match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    export_certificates(storage.as_ref(), file, vat_only).await?
                }
                None => export_certificates(storage.as_ref(), io::stdout().lock(), vat_only).await?,
            };
            tracing::info!("Exported {} certificates", rows);
        }
    }

    Ok(())
}

async fn open_storage(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    if config.database.enabled {
        tracing::info!("Database enabled, connecting to PostgreSQL...");
        let postgres = PostgresBackend::new(
            &config.database.url,
            config.database.max_connections,
        ).await?;

        postgres.migrate().await?;
        tracing::info!("Database initialized and migrated successfully");

        Ok(Arc::new(postgres))
    } else {
        tracing::warn!("Database disabled, results are kept in memory only");
        Ok(Arc::new(MemoryStorage::new()))
    }
}

/// Register the `[[servers]]` entries that storage does not know yet
async fn register_configured_servers(storage: &dyn Storage, config: &Config) -> anyhow::Result<()> {
    for entry in &config.servers {
        if storage
            .find_server_by_url(&normalize_server_url(&entry.url))
            .await?
            .is_some()
        {
            continue;
        }

        match database::register_server(storage, &entry.url, entry.nickname.as_deref()).await {
            Ok(_) => {}
            Err(e) => match e.downcast_ref::<RegistrationError>() {
                Some(reason) => tracing::warn!("Skipping configured server: {}", reason),
                None => return Err(e),
            },
        }
    }

    Ok(())
}

async fn run(
    config: &Config,
    storage: Arc<dyn Storage>,
    server_ids: &[i64],
    resume_vat: bool,
) -> anyhow::Result<()> {
    let servers: Vec<LogServer> = if server_ids.is_empty() {
        storage.list_servers().await?
    } else {
        let mut selected = Vec::new();
        for id in server_ids {
            match storage.find_server(*id).await? {
                Some(server) => selected.push(server),
                None => anyhow::bail!("No log server with id {}", id),
            }
        }
        selected
    };

    if servers.is_empty() {
        anyhow::bail!("No log servers registered. Add one with `ct-vat servers add <url>`");
    }

    let pipeline = Pipeline::new(config, storage)?;

    tracing::info!("Starting ct-vat on {} log servers...", servers.len());
    if resume_vat {
        pipeline.resume_vat_searches()?;
    }
    for server in servers {
        pipeline.scan_server(server)?;
    }

    let status_pipeline = Arc::clone(&pipeline);
    let interval = Duration::from_secs(config.pipeline.status_interval_secs.max(1));
    let status_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            tracing::info!("[{}] {}", status_pipeline.status(), status_pipeline.stats().format_stats());
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Interrupted, stopping downloads...");
    pipeline.stop_downloading();
    tracing::info!("Stopping processing...");
    pipeline.stop_processing();
    pipeline.join().await;
    status_task.abort();

    print_final_stats(pipeline.stats());
    Ok(())
}

async fn resume_vat_searches(config: &Config, storage: Arc<dyn Storage>) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config, storage)?;
    pipeline.resume_vat_searches()?;

    tokio::select! {
        _ = pipeline.wait_idle() => tracing::info!("All pending VAT searches finished"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, stopping VAT searches..."),
    }

    pipeline.stop_downloading();
    pipeline.stop_processing();
    pipeline.join().await;

    print_final_stats(pipeline.stats());
    Ok(())
}

async fn report(storage: &dyn Storage) -> anyhow::Result<()> {
    let total = storage.count_certificates().await?;
    println!("Certificates: {}", total);
    println!("VAT: {}", storage.vat_summary().await?);

    println!("\nIssuers:");
    for (issuer, count) in top_with_others(storage.count_by_issuer().await?, MAX_GROUPS) {
        println!("  {:>8}  {}", count, issuer);
    }

    println!("\nSignature algorithms:");
    for (algorithm, count) in top_with_others(storage.count_by_algorithm().await?, MAX_GROUPS) {
        println!("  {:>8}  {}", count, algorithm);
    }

    Ok(())
}

fn print_final_stats(stats: &StatsCollector) {
    let snapshot = stats.snapshot();
    println!("\nFinal Statistics:");
    println!("  Entries fetched: {}", snapshot.entries_fetched);
    println!("  Certificates saved: {}", snapshot.certificates_saved);
    println!("  Skipped / malformed: {} / {}", snapshot.entries_skipped, snapshot.entries_malformed);
    println!("  VAT found: {} of {} searched", snapshot.vat_found, snapshot.vat_found + snapshot.vat_not_found);
    println!("  Rate: {:.1} entries/min", snapshot.entries_per_minute);
    println!("  Uptime: {}", StatsCollector::format_uptime(snapshot.uptime_secs));
}
