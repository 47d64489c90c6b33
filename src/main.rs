mod cli;
mod render;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use setupflow::catalog::{self, Catalog};
use setupflow::config::AppConfig;
use setupflow::install::{InstallResponse, InstallStatus, NativePlatform, Orchestrator, ProgressSink};
use setupflow::logs::LogStore;
use setupflow::profiles::ProfileStore;

fn main() {
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(real_main()) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn real_main() -> Result<()> {
    let args = cli::Args::parse();
    let (cfg, cfg_path) = AppConfig::load_or_create(args.config.as_deref())?;
    log::debug!("Using config from: {}", cfg_path.display());

    match args.sub {
        cli::Cmd::Install {
            names,
            catalog,
            profile,
            json,
        } => handle_install(&cfg, names, catalog, profile, json).await,
        cli::Cmd::Available => handle_available(&cfg),
        cli::Cmd::Logs { action } => handle_logs(&cfg, action).await,
        cli::Cmd::Profiles { action } => handle_profiles(&cfg, action).await,
    }
}

fn load_catalog(cfg: &AppConfig, override_path: Option<std::path::PathBuf>) -> Result<Catalog> {
    let path = override_path.unwrap_or_else(|| cfg.catalog_path());
    Catalog::load(&path)
}

async fn handle_install(
    cfg: &AppConfig,
    names: Vec<String>,
    catalog_path: Option<std::path::PathBuf>,
    profile: Option<String>,
    json: bool,
) -> Result<()> {
    let catalog = load_catalog(cfg, catalog_path)?;
    let names = match profile {
        Some(id) => {
            ProfileStore::new(cfg.profiles_dir())
                .get(&id)
                .await?
                .software
        }
        None => names,
    };
    let software = catalog.select(&names)?;
    if software.is_empty() {
        bail!("Nothing to install: the catalog is empty");
    }

    let orchestrator = Orchestrator::new(cfg.to_install_settings(), Arc::new(NativePlatform));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the remaining installations");
            ctrl_c.cancel();
        }
    });

    let (sink, renderer) = if json {
        (ProgressSink::disabled(), None)
    } else {
        let (tx, rx) = mpsc::channel(100);
        let handle = render::spawn_progress_renderer(rx, software.len())?;
        (ProgressSink::new(tx), Some(handle))
    };

    let response = orchestrator.install_software(software, sink, cancel).await;

    // the sink was dropped with the batch, so the renderer drains and exits
    if let Some(handle) = renderer {
        let _ = handle.await;
    }

    if json {
        let out = serde_json::to_string_pretty(&response).context("Failed to serialize response")?;
        println!("{out}");
    } else {
        render::print_summary(&response);
    }

    match &response {
        InstallResponse::Completed { results, .. } => {
            let failed = results
                .iter()
                .filter(|r| r.status == InstallStatus::Failed)
                .count();
            if failed > 0 {
                bail!("{failed} of {} package(s) failed", results.len());
            }
            Ok(())
        }
        InstallResponse::Failed { error, .. } => bail!("{error}"),
    }
}

fn handle_available(cfg: &AppConfig) -> Result<()> {
    let dir = cfg.installers_dir();
    let files = catalog::list_available_installers(&dir)?;
    if files.is_empty() {
        println!("No installers found in {}", dir.display());
    }
    for file in files {
        println!("{file}");
    }
    Ok(())
}

async fn handle_logs(cfg: &AppConfig, action: cli::LogsCmd) -> Result<()> {
    let store = LogStore::new(cfg.log_dir());
    match action {
        cli::LogsCmd::List => {
            for entry in store.list().await? {
                println!(
                    "{}  {}  {:>8} bytes",
                    entry.id,
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.size
                );
            }
        }
        cli::LogsCmd::Show { id } => print!("{}", store.read(&id).await?),
        cli::LogsCmd::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted log {id}");
        }
    }
    Ok(())
}

async fn handle_profiles(cfg: &AppConfig, action: cli::ProfilesCmd) -> Result<()> {
    let store = ProfileStore::new(cfg.profiles_dir());
    match action {
        cli::ProfilesCmd::List => {
            for profile in store.list().await? {
                println!("{} ({}): {}", profile.name, profile.id, profile.software.join(", "));
            }
        }
        cli::ProfilesCmd::Save {
            name,
            names,
            id,
            catalog,
        } => {
            // reject names the catalog does not know
            let selected = load_catalog(cfg, catalog)?.select(&names)?;
            let software = selected.into_iter().map(|d| d.name).collect();
            let profile = store.save(id.as_deref(), &name, software).await?;
            println!("Saved profile {} ({})", profile.name, profile.id);
        }
    }
    Ok(())
}
