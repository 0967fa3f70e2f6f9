//! packetlog Server Binary
//!
//! Newline-framed packet logging server with full-log echo.

use clap::Parser;
use packetlog::config::ServerConfig;
use packetlog::daemon::{daemonize, ForkOutcome};
use packetlog::server::{bind_listener, resolve_address, PacketServer};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Parser)]
#[command(name = "packetlog-server")]
#[command(about = "Newline-framed packet logging server")]
#[command(version)]
struct Args {
    /// Run detached from the terminal
    #[arg(short, long)]
    daemon: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Address to bind to
    #[arg(short, long)]
    bind: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared log file path
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable journald backend
    #[cfg(feature = "journald")]
    #[arg(long)]
    journald: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("packetlog-server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config, args.verbose);
    info!("Starting packetlog server v{}", env!("CARGO_PKG_VERSION"));
    info!("Listen address: {}", config.listen_address());
    info!("Data file: {}", config.storage.data_file.display());
    info!("Max connections: {}", config.server.max_connections);

    match serve(config, args.daemon) {
        Ok(()) => {
            info!("packetlog server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> packetlog::Result<ServerConfig> {
    let mut config = if args.config.exists() {
        ServerConfig::from_file(&args.config)?
    } else {
        ServerConfig::default()
    };

    // Override config with CLI arguments
    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(data_file) = &args.data_file {
        config.storage.data_file = data_file.clone();
    }

    #[cfg(feature = "journald")]
    if args.journald {
        config.logging.journald = true;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &ServerConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("packetlog=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.logging.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        _ => fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(output).with(filter);

    #[cfg(feature = "journald")]
    let subscriber = subscriber.with(if config.logging.journald {
        tracing_journald::layer().ok()
    } else {
        None
    });

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    #[cfg(not(feature = "journald"))]
    if config.logging.journald {
        tracing::warn!("journald logging requested but the journald feature is not enabled");
    }
}

fn serve(config: ServerConfig, daemon: bool) -> packetlog::Result<()> {
    // Bind before detaching so an unusable port is reported to the caller
    let addr = resolve_address(&config.listen_address())?;
    let listener = bind_listener(addr, config.server.backlog)?;

    if daemon {
        info!("Running as daemon");
        if daemonize()? == ForkOutcome::Parent {
            std::process::exit(0);
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("packetlog-worker")
        .build()?;

    runtime.block_on(async move {
        let server = PacketServer::from_listener(config, listener).await?;
        server.run().await
    })
}
