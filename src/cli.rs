// CLASSIFICATION: COMMUNITY
// Filename: cli.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Command-line surface for the `cvm-boot` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use crate::boot::{BootDeps, BootSequencer};
use crate::config::NodeConfig;
use crate::cuda::{DrainEngine, LibCudaLoader};
use crate::diag::Diagnostics;
use crate::shutdown::{ShutdownDeps, ShutdownSequencer};
use crate::topology::TopologyProbe;

/// CLI wrapper for `cvm-boot`.
#[derive(Parser, Debug)]
#[command(
    name = "cvm-boot",
    about = "Measured boot and GPU teardown for confidential inference nodes",
    version
)]
pub struct Cli {
    /// Node configuration file (TOML). Falls back to `CVM_BOOT_CONFIG`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Buffer diagnostics and print the transcript on exit.
    #[arg(long, global = true)]
    pub transcript: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the full boot sequence (default).
    Boot,
    /// Stop workloads, drain the GPU fabric and confirm secret cleanup.
    Shutdown,
    /// Mount model packs from the staged config.
    Models,
    /// Configure registry credentials and launch containers from the staged config.
    Containers,
    /// Install and start the shim from the staged config.
    Shim,
    /// Print the detected accelerator topology.
    Probe,
    /// Run the peer-link drain in the foreground.
    Drain,
}

/// Execute the parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let config = NodeConfig::resolve(cli.config.as_deref())?;
    let (diag, transcript) = if cli.transcript {
        let (d, t) = Diagnostics::transcript(true);
        (d, Some(t))
    } else {
        (Diagnostics::log(), None)
    };

    let result = dispatch(cli.command.unwrap_or(Commands::Boot), &config, &diag);
    if let Some(t) = transcript {
        eprint!("{}", t.render());
    }
    result
}

fn dispatch(command: Commands, config: &NodeConfig, diag: &Diagnostics) -> Result<()> {
    match command {
        Commands::Boot => {
            let boot = BootSequencer::new(config, BootDeps::system(config, diag), diag.clone());
            let report = boot.run().context("boot failed")?;
            info!(
                "boot finished: {} packs, {} containers, {} warnings",
                report.packs.len(),
                report.containers.len(),
                report.warnings.len()
            );
        }
        Commands::Shutdown => {
            let seq =
                ShutdownSequencer::new(config, ShutdownDeps::system(config, diag), diag.clone());
            let report = seq.run();
            for note in &report.notes {
                eprintln!("warning: {note}");
            }
        }
        Commands::Models => {
            let boot = BootSequencer::new(config, BootDeps::system(config, diag), diag.clone());
            for pack in boot.run_models()? {
                println!("{} {}", pack.id, pack.mount_point.display());
            }
        }
        Commands::Containers => {
            let boot = BootSequencer::new(config, BootDeps::system(config, diag), diag.clone());
            for id in boot.run_containers()? {
                println!("{id}");
            }
        }
        Commands::Shim => {
            let boot = BootSequencer::new(config, BootDeps::system(config, diag), diag.clone());
            let path = boot.run_shim()?;
            println!("{}", path.display());
        }
        Commands::Probe => {
            let topology = TopologyProbe::new(config, diag.clone()).probe()?;
            println!(
                "accelerator={} devices={} fabric={}",
                topology.has_accelerator, topology.device_count, topology.is_multi_gpu_fabric
            );
        }
        Commands::Drain => {
            let report = DrainEngine::new(LibCudaLoader::default(), diag.clone()).drain();
            println!(
                "devices={} valid={} enabled={} disabled={} skipped={} elapsed_ms={}",
                report.devices,
                report.valid,
                report.enabled,
                report.disabled,
                report.skipped,
                report.elapsed.as_millis()
            );
        }
    }
    Ok(())
}
