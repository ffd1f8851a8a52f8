//! Runs a program file in the terminal.
//!
//! Goes through the same session controller as the server, over the
//! in-memory transport, and prints every event line to stdout. When the
//! program reads, a line is taken from stdin.
//!
//! # Usage
//! ```text
//! leninec-run <program.asm> [OPTIONS]
//! ```
//!
//! # Options
//! - `--delay <secs>`: Pause between steps (defaults to 0)
//! - `--seed-input`: Push a random value in 1..=100 before the first step

use leninec::config::SessionConfig;
use leninec::network::local_transport::LocalTransport;
use leninec::network::session::{Session, SessionOutcome};
use leninec::network::transport::Transport;
use leninec::utils::log::{self, LOG_ENV, SHOW_TIMESTAMP};
use leninec::virtual_machine::assembler::{decode, render_diagnostic};
use leninec::{error, info};
use std::env;
use std::fs;
use std::process;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tokio::sync::mpsc::channel;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    SHOW_TIMESTAMP.store(false, Ordering::Relaxed);
    if let Ok(level) = env::var(LOG_ENV) {
        match level.parse() {
            Ok(level) => log::set_level(level),
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    }

    let input_path = &args[1];
    let mut config = SessionConfig {
        delay: Duration::ZERO,
        ..SessionConfig::default()
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--delay" => {
                i += 1;
                if i >= args.len() {
                    error!("--delay requires an argument");
                    process::exit(1);
                }
                config.delay = match args[i].parse::<f64>().ok().map(Duration::try_from_secs_f64) {
                    Some(Ok(delay)) => config.clamp_delay(delay),
                    _ => {
                        error!("Invalid delay: '{}' is not a number of seconds", args[i]);
                        process::exit(1);
                    }
                };
                i += 1;
            }
            "--seed-input" => {
                config.seed_input = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let source = match fs::read_to_string(input_path) {
        Ok(source) => source,
        Err(e) => {
            error!("Failed to read {}: {}", input_path, e);
            process::exit(1);
        }
    };

    let program = match decode(&source) {
        Ok(program) => program,
        Err(e) => {
            eprint!("{}", render_diagnostic(input_path, &source, &e));
            process::exit(1);
        }
    };
    info!("Decoded {} ({} instructions)", input_path, program.len());

    let transport = LocalTransport::new("terminal");
    let (sx, mut links) = channel(1);
    if let Err(e) = transport.clone().start(sx).await {
        error!("{e}");
        process::exit(1);
    }
    let mut client = match transport.connect().await {
        Ok(client) => client,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let Some(link) = links.recv().await else {
        error!("no link was opened");
        process::exit(1);
    };
    let session = tokio::spawn(Session::new(link, config).run());

    if client.send(source).await.is_err() {
        error!("session ended before the program was sent");
        process::exit(1);
    }

    let mut input = BufReader::new(stdin()).lines();
    while let Some(line) = client.recv().await {
        println!("{line}");
        if let Some(target) = line.strip_prefix("@i ?") {
            eprint!("input for {target}> ");
            match input.next_line().await {
                Ok(Some(value)) => {
                    if client.send(value).await.is_err() {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
    }
    drop(client);

    let report = match session.await {
        Ok(report) => report,
        Err(e) => {
            error!("Session task failed: {:?}", e);
            process::exit(1);
        }
    };
    info!("Run {} after {} steps", report.outcome, report.steps);
    if report.outcome != SessionOutcome::Halted {
        process::exit(1);
    }
}

const USAGE: &str = "\
Program Runner

USAGE:
    {program} <program.asm> [OPTIONS]

ARGS:
    <program.asm>    Program source file to run

OPTIONS:
    --delay <secs>    Pause between steps (defaults to 0)
    --seed-input      Push a random value in 1..=100 before the first step
    -h, --help        Print this help message

ENVIRONMENT:
    LENINEC_LOG    Minimum log level (debug, info, warn, error)

EXAMPLES:
    # Run as fast as possible
    {program} countdown.asm

    # Watch it step twice a second
    {program} countdown.asm --delay 0.5
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
