//! Terminal rendering of install progress and results

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use setupflow::install::{InstallEvent, InstallResponse, InstallStatus, ProgressStatus};

/// Drains progress events into two bars until the sender side is dropped
pub fn spawn_progress_renderer(
    mut rx: mpsc::Receiver<InstallEvent>,
    total: usize,
) -> Result<JoinHandle<()>> {
    let multi = MultiProgress::new();

    let overall = multi.add(ProgressBar::new(total as u64));
    overall.set_style(
        ProgressStyle::default_bar()
            .template("\n[{bar:40.cyan/blue}] {pos}/{len} packages  {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█▓░"),
    );

    let current = multi.add(ProgressBar::new(100));
    current.set_style(
        ProgressStyle::default_bar()
            .template("   [{bar:40.green/blue}] {pos:>3}%  {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█▓░"),
    );

    Ok(tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                InstallEvent::Progress(e) => {
                    if e.status == ProgressStatus::Starting {
                        current.set_position(0);
                        overall.set_message(e.name.clone());
                    }
                    if let Some(pct) = e.progress {
                        current.set_position(u64::from(pct));
                    }
                    current.set_message(format!("[{}] {}", e.name, e.message));

                    match e.status {
                        ProgressStatus::Completed => overall.inc(1),
                        ProgressStatus::Failed | ProgressStatus::Error => {
                            overall.inc(1);
                            let _ = multi.println(format!("✗ {}: {}", e.name, e.message));
                        }
                        _ => {}
                    }
                }
                InstallEvent::AlreadyInstalled { name, location } => {
                    let _ = multi.println(format!("• {name} is already installed at {location}"));
                }
            }
        }

        overall.finish_with_message("done");
        current.finish_and_clear();
    }))
}

/// Human-readable batch summary
pub fn print_summary(response: &InstallResponse) {
    match response {
        InstallResponse::Completed { results, log_path, .. } => {
            println!();
            for r in results {
                let verdict = match r.status {
                    InstallStatus::Installed => "installed".to_string(),
                    InstallStatus::AlreadyPresent => "already present".to_string(),
                    InstallStatus::RequiresManualAction => "manual extraction required".to_string(),
                    InstallStatus::Failed => format!(
                        "FAILED: {}",
                        r.error_message.as_deref().unwrap_or("unknown error")
                    ),
                };
                match &r.location {
                    Some(loc) if r.status != InstallStatus::Failed => {
                        println!("  {:<28} {verdict} ({loc})", r.name)
                    }
                    _ => println!("  {:<28} {verdict}", r.name),
                }
            }
            println!("\nLog: {}", log_path.display());
        }
        InstallResponse::Failed { error, .. } => {
            eprintln!("Installation could not start: {error}");
        }
    }
}
