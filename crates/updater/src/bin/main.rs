//! Update daemon for the desktop shell.
//!
//! Runs one signed update cycle, optionally keeping a patched service alive
//! and handing off to a staged installer.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use updater::{
    checksum, CyclePhase, CycleSummary, HostShell, ProcessService, ServiceControl,
    UpdateCoordinator, UpdaterConfig,
};

/// Command-line arguments for the update daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the pointer document URL
    #[arg(long)]
    url: Option<String>,

    /// Reinstall even when the running version matches
    #[arg(long, default_value_t = false)]
    force_full: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one update cycle (default)
    Check {
        /// Launch the staged installer after a successful full update
        #[arg(long, default_value_t = false)]
        install: bool,

        /// Command line of the service restarted when its component is patched
        #[arg(long, num_args = 1.., value_name = "CMD")]
        service: Vec<String>,
    },

    /// Print the SHA-256 digest of a file
    Digest {
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Check a version description file against a base64 signature
    Verify {
        #[arg(required = true)]
        file: PathBuf,

        #[arg(required = true)]
        signature: String,
    },
}

/// Host shell of a headless daemon: closing means leaving `main`.
#[derive(Default)]
struct ExitFlag(AtomicBool);

impl HostShell for ExitFlag {
    fn request_close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug,updater=debug")
    } else {
        EnvFilter::new("info,updater=info")
    };
    fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => UpdaterConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => UpdaterConfig::default(),
    };
    if let Some(url) = args.url {
        config.update_url = url;
    }

    match args.command.unwrap_or(Commands::Check {
        install: false,
        service: Vec::new(),
    }) {
        Commands::Check { install, service } => {
            run_check(config, args.force_full, install, service).await
        }
        Commands::Digest { file } => {
            let digest = checksum::file_digest(&file)
                .with_context(|| format!("failed to hash {}", file.display()))?;
            println!("{digest}  {}", file.display());
            Ok(())
        }
        Commands::Verify { file, signature } => {
            let verifier = config.verifier().context("no usable public key configured")?;
            let raw = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            if !verifier.verify(&raw, &signature) {
                bail!("signature does not match {}", file.display());
            }
            println!("signature OK");
            Ok(())
        }
    }
}

async fn run_check(
    config: UpdaterConfig,
    force_full: bool,
    install: bool,
    service: Vec<String>,
) -> anyhow::Result<()> {
    config
        .ensure_dirs()
        .context("failed to prepare updater directories")?;

    let exit = Arc::new(ExitFlag::default());
    let mut builder = UpdateCoordinator::builder(config.clone()).host(exit.clone());

    let mut managed = None;
    if let Some((program, rest)) = service.split_first() {
        let process = Arc::new(
            ProcessService::new(program, rest.to_vec()).working_dir(config.app_dir.clone()),
        );
        process.start().await.context("failed to start service")?;
        for key in &config.restart_keys {
            builder = builder.restart_on_update(key.clone(), process.clone());
        }
        managed = Some(process);
    }

    let coordinator = builder.build().context("failed to build update coordinator")?;
    coordinator.set_force_full_update(force_full);

    tracing::info!(url = %coordinator.update_url(), "starting update check");
    match coordinator.check_now().await {
        Some(CyclePhase::Done(summary)) => {
            print_summary(&summary);
            if install && summary.staged_installer.is_some() {
                let path = coordinator.run_installer_and_exit()?;
                println!("installer launched: {}", path.display());
            }
        }
        Some(CyclePhase::Failed(failure)) => {
            eprintln!("update failed ({}): {}", failure.kind, failure.message);
        }
        other => tracing::warn!(phase = ?other, "update cycle ended unexpectedly"),
    }

    if let Some(process) = managed {
        if !exit.0.load(Ordering::SeqCst) {
            tracing::info!("service running. Press Ctrl+C to exit.");
            tokio::signal::ctrl_c().await?;
        }
        process.stop().await?;
    }
    Ok(())
}

fn print_summary(summary: &CycleSummary) {
    println!(
        "remote version {} (full update {})",
        summary.remote_version,
        if summary.needs_full_update { "needed" } else { "not needed" }
    );
    if summary.full_update_unavailable {
        println!("no installer published for this platform");
    }
    for artifact in &summary.artifacts {
        println!("  {:<24} {:?}", artifact.key, artifact.status);
    }
    if let Some(path) = &summary.staged_installer {
        println!("installer staged at {}", path.display());
    }
}
