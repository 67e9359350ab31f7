//! EmberKV - A Minimal In-Memory Key-Value Server
//!
//! This is the main entry point for the EmberKV server.
//! It sets up the TCP listener, the store, the expiry reaper, and
//! hands incoming connections off to per-client tasks.

use emberkv::commands::Dispatcher;
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::storage::{Reaper, Store, DEFAULT_SWEEP_PERIOD};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: emberkv::DEFAULT_HOST.to_string(),
            port: emberkv::DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        config.port = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("EmberKV version {}", emberkv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - A Minimal In-Memory Key-Value Server

USAGE:
    emberkv [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>    Port to listen on (default: 6378)
    -v, --version        Print version information
        --help           Print this help message

EXAMPLES:
    emberkv                        # Start on 127.0.0.1:6378
    emberkv --port 6380            # Start on port 6380
    emberkv --host 0.0.0.0         # Listen on all interfaces

CONNECTING:
    The wire format is a RESP subset, so redis-cli works:
    $ redis-cli -p 6378
    127.0.0.1:6378> PING
    PONG
    127.0.0.1:6378> SET greeting hello EX 60
    OK
    127.0.0.1:6378> GET greeting
    "hello"
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
  _____           _               _  ____     __
 | ____|_ __ ___ | |__   ___ _ __| |/ /\ \   / /
 |  _| | '_ ` _ \| '_ \ / _ \ '__| ' /  \ \ / /
 | |___| | | | | | |_) |  __/ |  | . \   \ V /
 |_____|_| |_| |_|_.__/ \___|_|  |_|\_\   \_/

EmberKV v{} - In-Memory Key-Value Server
──────────────────────────────────────────────
Server started on {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        emberkv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging; RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Print the banner
    print_banner(&config);

    // Create the store (shared across all connections)
    let store = Arc::new(Store::new());
    info!("store initialized");

    // Start the background expiry reaper
    let reaper = Reaper::start(Arc::clone(&store), DEFAULT_SWEEP_PERIOD);
    info!(period = ?DEFAULT_SWEEP_PERIOD, "expiry reaper started");

    // Create connection statistics
    let stats = Arc::new(ConnectionStats::new());

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("listening on {}", config.bind_address());

    // Set up graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("shutdown signal received, stopping server...");
    };

    // Main accept loop
    let serve_result = tokio::select! {
        result = accept_loop(listener, Arc::clone(&store), Arc::clone(&stats)) => result,
        _ = shutdown => Ok(()),
    };

    // Stop sweeping before reporting final numbers
    reaper.stop().await;

    if let Err(e) = &serve_result {
        error!(error = %e, "listener failed");
    }
    serve_result?;

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        keys = store.len(),
        "server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections.
///
/// An accept failure is fatal: the transport has no recovery path, so
/// the error propagates and the process exits.
async fn accept_loop(
    listener: TcpListener,
    store: Arc<Store>,
    stats: Arc<ConnectionStats>,
) -> std::io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;

        // Create a dispatcher for this connection
        let dispatcher = Dispatcher::new(Arc::clone(&store));
        let stats = Arc::clone(&stats);

        // Spawn a task to handle this connection
        tokio::spawn(async move {
            handle_connection(stream, addr, dispatcher, stats).await;
        });
    }
}
