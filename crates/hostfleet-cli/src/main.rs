//! hostfleet CLI
//!
//! Runs commands, file installs, resolver edits and disk maintenance across
//! a fleet of hosts

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use eyre::eyre;
use kameo::actor::{ActorRef, Spawn};
use tokio::sync::mpsc;
use tracing::{info, warn};

use hostfleet_core::{
    AggregateResult, Dispatch, DispatchStreaming, FleetActor, FleetActorArgs, ListHosts, Operation,
    SessionExecutorFactory,
};
use hostfleet_exec::stream::DEFAULT_LOG_CAPACITY;
use hostfleet_exec::{DiskExtend, FileTransfer, Filesystem, Record};

mod config;
mod output;
mod telemetry;

use config::ConfigSource;

#[derive(Parser, Debug)]
#[command(name = "hostfleet", version)]
#[command(about = "Run commands across a fleet of hosts over SSH", long_about = None)]
struct Cli {
    /// Config file (default: $HOSTFLEET_CONFIG, ./hostfleet.toml, ...)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive; overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Targets {
    /// Comma-separated host names (default: all hosts)
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FsType {
    Xfs,
    Ext4,
}

impl From<FsType> for Filesystem {
    fn from(fs: FsType) -> Self {
        match fs {
            FsType::Xfs => Filesystem::Xfs,
            FsType::Ext4 => Filesystem::Ext4,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List configured hosts
    Hosts,
    /// Run a command and print its output per host
    Exec {
        /// Shell command
        command: String,
        /// Run with root privileges
        #[arg(long)]
        sudo: bool,
        #[command(flatten)]
        targets: Targets,
    },
    /// Run a command and stream its output live
    Stream {
        /// Shell command
        command: String,
        /// Run with root privileges
        #[arg(long)]
        sudo: bool,
        #[command(flatten)]
        targets: Targets,
    },
    /// Install a local file on each host
    Copy {
        /// Local source file
        src: PathBuf,
        /// Absolute destination path
        dest: String,
        #[command(flatten)]
        targets: Targets,
    },
    /// Add or replace an /etc/hosts entry
    AddRecord {
        /// IP address
        ip: String,
        /// Domain name
        domain: String,
        #[command(flatten)]
        targets: Targets,
    },
    /// Add a nameserver to /etc/resolv.conf
    AddDns {
        /// Nameserver IP address
        ip: String,
        #[command(flatten)]
        targets: Targets,
    },
    /// Add a block device to a logical volume and grow its filesystem
    ExtendDisk {
        /// New block device, e.g. /dev/sdb
        device: String,
        /// Logical volume to grow
        #[arg(long, default_value = hostfleet_exec::disk::DEFAULT_LV_NAME)]
        lv: String,
        /// Filesystem on the volume
        #[arg(long, value_enum, default_value_t = FsType::Xfs)]
        fs: FsType,
        /// Amount to add, e.g. 20G (default: all free space)
        #[arg(long)]
        size: Option<String>,
        #[command(flatten)]
        targets: Targets,
    },
    /// Show distribution, CPU, memory, disk and interfaces per host
    Facts {
        #[command(flatten)]
        targets: Targets,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let (config, source) = config::load(cli.config.as_deref())?;
    telemetry::init(cli.log_level.as_deref(), &config.log_level, config.log_json);
    match &source {
        ConfigSource::File(path) => {
            info!(path = %path.display(), hosts = config.host.len(), "loaded config");
        }
        ConfigSource::Defaults => warn!("no config file found, using defaults"),
    }

    let factory = Arc::new(SessionExecutorFactory::new(config.session_options()));
    let mut args = FleetActorArgs::new(factory);
    args.per_host_timeout = config.fanout.per_host_timeout();
    args.hosts = config.host;
    let fleet = FleetActor::spawn(args);

    let outcome = run(&fleet, cli.command, cli.json).await;
    fleet
        .stop_gracefully()
        .await
        .map_err(|e| eyre!("stopping fleet actor failed: {e}"))?;
    fleet.wait_for_shutdown().await;

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

/// Execute one subcommand; returns whether every host succeeded
async fn run(fleet: &ActorRef<FleetActor>, command: Commands, json: bool) -> Result<bool> {
    let (operation, targets) = match command {
        Commands::Hosts => {
            let hosts = fleet
                .ask(ListHosts)
                .await
                .map_err(|e| eyre!("listing hosts failed: {e}"))?;
            output::print_hosts(&hosts, json)?;
            return Ok(true);
        }
        Commands::Stream {
            command,
            sudo,
            targets,
        } => {
            let result = stream(fleet, command, sudo, targets.hosts, json).await?;
            return Ok(result.overall_success);
        }
        Commands::Exec {
            command,
            sudo,
            targets,
        } => (
            Operation::Exec {
                command,
                elevate: sudo,
            },
            targets,
        ),
        Commands::Copy { src, dest, targets } => {
            (Operation::CopyFile(FileTransfer::new(src, dest)), targets)
        }
        Commands::AddRecord {
            ip,
            domain,
            targets,
        } => (Operation::AddHostRecord(Record::new(ip, domain)?), targets),
        Commands::AddDns { ip, targets } => (Operation::AddNameserver(ip), targets),
        Commands::ExtendDisk {
            device,
            lv,
            fs,
            size,
            targets,
        } => {
            let mut request = DiskExtend::new(device).with_lv_name(lv).with_filesystem(fs.into());
            if let Some(size) = size {
                request = request.with_size(size);
            }
            request.validate()?;
            (Operation::ExtendDisk(request), targets)
        }
        Commands::Facts { targets } => (Operation::Facts, targets),
    };

    let result = fleet
        .ask(Dispatch {
            operation,
            targets: targets.hosts,
        })
        .await
        .map_err(|e| eyre!("dispatch failed: {e}"))?;
    output::print_aggregate(&result, json)?;
    Ok(result.overall_success)
}

async fn stream(
    fleet: &ActorRef<FleetActor>,
    command: String,
    elevate: bool,
    targets: Vec<String>,
    json: bool,
) -> Result<AggregateResult> {
    let (relay, mut events) = mpsc::channel(DEFAULT_LOG_CAPACITY);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            output::print_event(&event, json)?;
        }
        Ok::<_, eyre::Report>(())
    });

    let result = fleet
        .ask(DispatchStreaming {
            command,
            elevate,
            targets,
            relay,
        })
        .await
        .map_err(|e| eyre!("dispatch failed: {e}"))?;
    printer.await??;

    if !json {
        let failed = result.failures().count();
        println!(
            "{}/{} hosts succeeded",
            result.results.len() - failed,
            result.results.len()
        );
    }
    Ok(result)
}
