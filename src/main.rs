mod commands;
mod config;
mod fs;
mod hardware;
mod ovf;
mod spinner;
mod store;
mod vm;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use commands::SystemRunner;
use config::Config;
use store::Store;
use vm::{ImportEnv, ImportRequest};

/// Exit status for an import the user can retry with different input
const EXIT_RECOVERABLE: u8 = 2;

#[derive(Parser)]
#[command(name = "vmkeep")]
#[command(author = "Mark Roboff")]
#[command(version = "0.1.0")]
#[command(about = "Import OVA appliances into a QEMU machine library")]
struct Cli {
    /// Path to the machine directory
    #[arg(long)]
    vm_dir: Option<PathBuf>,

    /// Path to the machine database
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an OVA appliance
    Import {
        /// Absolute path to the .ova file
        ova: PathBuf,
        /// Target architecture (defaults to the first configured one)
        #[arg(short, long)]
        arch: Option<String>,
        /// Machine name (defaults to the name in the appliance)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List machines in the database
    List,

    /// List configured target architectures
    Archs,

    /// Show the effective configuration
    Config {
        /// Write it to the configuration file
        #[arg(short, long)]
        write: bool,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(vm_dir) = cli.vm_dir {
        config.vm_dir = vm_dir;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Import { ova, arch, name } => cmd_import(&config, ova, arch, name),
        Commands::List => cmd_list(&config).map(|_| ExitCode::SUCCESS),
        Commands::Archs => {
            cmd_archs(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { write } => cmd_config(&config, write).map(|_| ExitCode::SUCCESS),
    }
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("Failed to open database {:?}", config.db_path))
}

fn cmd_import(
    config: &Config,
    ova: PathBuf,
    arch: Option<String>,
    name: Option<String>,
) -> Result<ExitCode> {
    config.ensure_directories()?;
    let store = open_store(config)?;
    let mut allocator = store.allocator();

    let request = ImportRequest {
        ova,
        arch: arch
            .or_else(|| config.default_arch().map(str::to_string))
            .unwrap_or_default(),
        name,
    };
    let mut env = ImportEnv {
        config,
        store: &store,
        allocator: &mut allocator,
        runner: &SystemRunner,
        spinner: config.spinner && std::io::stderr().is_terminal(),
    };

    match vm::import_ova(&request, &mut env) {
        Ok(outcome) => {
            println!(
                "Imported {} into {:?}",
                outcome.record.name, outcome.machine_dir
            );
            println!(
                "  {} CPU(s), {} MiB, {} disk(s), {} interface(s), VNC port {}",
                outcome.record.cpus,
                outcome.record.memory,
                outcome.record.drives.len(),
                outcome.record.interfaces.len(),
                outcome.record.vnc_port
            );
            if !outcome.cleanup.is_clean() {
                eprintln!("Some files were not deleted (see warnings above)");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_fatal() => Err(anyhow::Error::new(e).context("Import failed")),
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::from(EXIT_RECOVERABLE))
        }
    }
}

fn cmd_list(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let machines = store.list_machines()?;

    if machines.is_empty() {
        println!("No machines in {:?}", config.db_path);
        return Ok(());
    }

    println!(
        "  {:30} {:8} {:>4} {:>8} {:>5} {:>5} {:>5}",
        "NAME", "ARCH", "CPU", "MEM", "VNC", "DISK", "IF"
    );
    for m in &machines {
        let origin = if m.imported { "[ova]" } else { "" };
        println!(
            "  {:30} {:8} {:>4} {:>8} {:>5} {:>5} {:>5} {}",
            m.name, m.arch, m.cpus, m.memory, m.vnc_port, m.drives, m.interfaces, origin
        );
    }

    println!();
    println!("Total: {} machines", machines.len());
    Ok(())
}

fn cmd_archs(config: &Config) {
    for arch in &config.qemu_targets {
        println!("{}", arch);
    }
}

fn cmd_config(config: &Config, write: bool) -> Result<()> {
    let path = Config::config_file_path();
    if write {
        config.save()?;
        println!("Wrote {:?}", path);
        return Ok(());
    }

    println!("# {:?}", path);
    print!("{}", toml::to_string_pretty(config).context("Failed to serialize config")?);
    Ok(())
}
