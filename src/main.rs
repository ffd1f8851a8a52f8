//! Paced execution server.
//!
//! Accepts TCP clients, runs the program each one submits step by step and
//! streams the execution state back at the client's chosen speed.
//!
//! # Usage
//! ```text
//! leninec [listen_addr] [OPTIONS]
//! ```
//!
//! # Arguments
//! - `listen_addr`: Local address to bind (defaults to `127.0.0.1:7000`)
//!
//! # Options
//! See [`USAGE`].

use leninec::config::{DEFAULT_LISTEN_ADDR, ServerConfig};
use leninec::network::server::{Server, ServerOps};
use leninec::network::tcp_transport::TcpTransport;
use leninec::network::transport::Transport;
use leninec::utils::log::{self, LOG_ENV};
use leninec::{error, info};
use std::env;
use std::process;
use std::sync::Arc;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("leninec");
    let rest = args.get(1..).unwrap_or_default();

    if rest.iter().any(|a| a == "--help" || a == "-h") {
        print_usage(program);
        process::exit(0);
    }

    let env_level = env::var(LOG_ENV).ok();
    let config = match ServerConfig::from_args(rest, env_level.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}\n");
            print_usage(program);
            process::exit(1);
        }
    };
    log::set_level(config.log_level);

    let transport = match TcpTransport::bind(config.listen, config.max_frame).await {
        Ok(tr) => tr,
        Err(e) => {
            error!("Failed to bind {}: {}", config.listen, e);
            process::exit(1);
        }
    };

    let server = Arc::new(Server::new(ServerOps {
        transports: vec![transport.clone() as Arc<dyn Transport>],
        session: config.session.clone(),
    }));
    let links = match server.start().await {
        Ok(links) => links,
        Err(e) => {
            error!("Failed to start transport: {}", e);
            process::exit(1);
        }
    };

    info!(
        "Server started on {} (delay {:?}, max steps {:?}, seed input {})",
        transport.local_addr(),
        config.session.delay,
        config.session.limits.max_steps,
        config.session.seed_input
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_handle = tokio::spawn({
        let server = server.clone();
        async move { server.serve(links, shutdown_rx).await }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Failed to setup Ctrl+C handler: {}", e);
        return;
    }
    info!(
        "Ctrl+C received, shutting down ({} active sessions)...",
        server.active_sessions()
    );
    let _ = shutdown_tx.send(());
    if let Err(e) = server_handle.await {
        eprintln!("Server task error: {:?}", e);
    }
}

const USAGE: &str = "\
Paced Execution Server

USAGE:
    {program} [listen_addr] [OPTIONS]

ARGS:
    [listen_addr]    Local address to bind (default {listen})

OPTIONS:
    --delay <secs>           Initial pause between steps (default 0.15)
    --max-delay <secs>       Upper bound for client delays (default 10)
    --max-steps <n>          Instructions per run, 0 for unlimited (default 100000)
    --max-stack <n>          Maximum stack depth (default 1000)
    --input-timeout <secs>   How long a read waits for input (default 60)
    --run-timeout <secs>     Wall-clock budget per run (default 300)
    --max-frame <bytes>      Largest accepted frame (default 65536)
    --seed-input             Push a random value in 1..=100 before each run
    --log-level <level>      debug, info, warn or error (default info)
    -h, --help               Print this help message

ENVIRONMENT:
    LENINEC_LOG    Minimum log level, overridden by --log-level

EXAMPLES:
    # Serve on the default address
    {program}

    # Serve on all interfaces with fast playback and seeded input
    {program} 0.0.0.0:7000 --delay 0.05 --seed-input
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!(
        "{}",
        USAGE
            .replace("{program}", program)
            .replace("{listen}", DEFAULT_LISTEN_ADDR)
    );
}
