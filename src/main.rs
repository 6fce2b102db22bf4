use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kagan::core;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kagan")]
#[command(version, about = "Local development cockpit - CLI launcher for the Kagan core host")]
struct Cli {
    /// Project root to operate on. Defaults to the current directory.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the Kagan core host process
    Core {
        #[command(subcommand)]
        command: CoreCommands,
    },
}

#[derive(Subcommand)]
enum CoreCommands {
    /// Start the core host for this project
    Start {
        /// Run in the foreground instead of spawning a detached process
        #[arg(long)]
        foreground: bool,
        /// Transport to bind: "unix" (default) or "tcp"
        #[arg(long)]
        transport: Option<String>,
        /// TCP port to bind (0 lets the OS choose). Ignored for unix.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Report whether the core host is running
    Status,
    /// Stop the running core host
    Stop,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    match cli.command {
        Commands::Core { command } => match command {
            CoreCommands::Start { foreground, transport, port } => {
                core::start(&project_dir, foreground, transport.as_deref(), port)?;
                if !foreground {
                    println!("kagan core started");
                }
            }
            CoreCommands::Status => {
                let report = core::status(&project_dir);
                if report.running {
                    println!("kagan core is running (pid {})", report.pid.unwrap_or(0));
                    if let Some(address) = report.address {
                        println!("  transport: {} {}", report.transport.unwrap_or_default(), address);
                    }
                } else {
                    println!("kagan core is not running");
                }
            }
            CoreCommands::Stop => {
                core::stop(&project_dir)?;
                println!("kagan core stopped");
            }
        },
    }

    Ok(())
}
