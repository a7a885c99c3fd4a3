// src/main.rs

//! `spinel-conn`: issues a single command over a `Connection` and prints the reply.

use anyhow::{Result, anyhow};
use spinel_conn::{Connection, ConnectionConfig, Reply};
use std::env;
use std::fmt::Write as _;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str = "Usage: spinel-conn [--config FILE] [--host HOST] [--port PORT] [--tls] \
                     [--socket PATH] COMMAND [ARGS...]";

fn main() {
    if let Err(e) = run_app() {
        eprintln!("(error) {e:#}");
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    const VERSION: &str = env!("SPINEL_CONN_BUILD_VERSION");

    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version") {
        println!("spinel-conn version {VERSION}");
        return Ok(());
    }

    let (mut config, command) = parse_args(&args)?;
    if command.is_empty() {
        return Err(anyhow!(USAGE));
    }
    config.validate()?;

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .init();

    debug!("Using configuration: {:?}", config);
    let mut conn = Connection::new(config);
    conn.send(command[0].as_str(), &command[1..])?;
    let reply = conn.get_one()?;
    print!("{}", render(&reply, 0));
    conn.close()?;
    Ok(())
}

/// Splits the arguments into connection settings and the command to send.
///
/// Options are only recognised before the command name; everything from the
/// first non-option argument on is sent verbatim.
fn parse_args(args: &[String]) -> Result<(ConnectionConfig, Vec<String>)> {
    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--config flag requires a value"))?;
            ConnectionConfig::from_file(path)?
        }
        None => ConnectionConfig::default(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                iter.next();
            }
            "--host" => {
                config.host = iter
                    .next()
                    .ok_or_else(|| anyhow!("--host flag requires a value"))?
                    .clone();
            }
            "--port" => {
                let port_str = iter
                    .next()
                    .ok_or_else(|| anyhow!("--port flag requires a value"))?;
                config.port = port_str
                    .parse()
                    .map_err(|_| anyhow!("Invalid port number: {port_str}"))?;
            }
            "--socket" => {
                let path = iter
                    .next()
                    .ok_or_else(|| anyhow!("--socket flag requires a value"))?;
                config.unix_socket_path = Some(path.into());
            }
            "--tls" => config.tls.enabled = true,
            _ => {
                let mut command = vec![arg.clone()];
                command.extend(iter.cloned());
                return Ok((config, command));
            }
        }
    }
    Ok((config, Vec::new()))
}

/// Renders a reply the way interactive RESP clients usually do.
fn render(reply: &Reply, indent: usize) -> String {
    match reply {
        Reply::Status(s) => format!("{s}\n"),
        Reply::Error(e) => format!("(error) {e}\n"),
        Reply::Integer(i) => format!("(integer) {i}\n"),
        Reply::Bulk(Some(b)) => format!("\"{}\"\n", String::from_utf8_lossy(b)),
        Reply::Bulk(None) | Reply::Array(None) => "(nil)\n".to_string(),
        Reply::Array(Some(items)) if items.is_empty() => "(empty array)\n".to_string(),
        Reply::Array(Some(items)) => {
            let mut out = String::new();
            let width = items.len().to_string().len();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&" ".repeat(indent));
                }
                let prefix = format!("{:>width$}) ", i + 1);
                let _ = write!(out, "{prefix}{}", render(item, indent + prefix.len()));
            }
            out
        }
    }
}
