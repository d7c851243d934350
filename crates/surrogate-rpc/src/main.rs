//! Surrogate RPC - host or call Surrogate channels over TCP.
//!
//! `serve` exposes the demonstration scopes to every connecting peer and
//! prints the bound port; `call` performs a single remote call against such a
//! host and prints the reply.

mod scopes;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::time::Duration;
use surrogate_core::{
    CallError, Channel, ChannelConfig, ChannelServer, LogLevel, SocketTransport, TransportConfig,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "surrogate-rpc")]
#[command(about = "Host or call Surrogate RPC channels over TCP")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demonstration scopes (echo, math, timer)
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = TransportConfig::DEFAULT_HOST)]
        host: String,
    },

    /// Call one remote function and print its reply
    Call {
        /// Port of the serving peer
        #[arg(short, long)]
        port: u16,

        /// Host of the serving peer
        #[arg(long, default_value = TransportConfig::DEFAULT_HOST)]
        host: String,

        /// Give up after this many milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,

        /// Scope supplied by the peer
        scope: String,

        /// Function to call
        func: String,

        /// Arguments, each parsed as JSON (bare words are sent as strings)
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let channel_log_level = if args.debug {
        LogLevel::Debug
    } else {
        LogLevel::Warning
    };

    match args.command {
        Command::Serve { port, host } => serve(&host, port, channel_log_level).await,
        Command::Call {
            port,
            host,
            timeout_ms,
            scope,
            func,
            args,
        } => {
            let config = ChannelConfig::new("surrogate-rpc")
                .with_log_level(channel_log_level)
                .with_call_timeout(Duration::from_millis(timeout_ms));
            call(&host, port, config, &scope, &func, &args).await
        }
    }
}

async fn serve(host: &str, port: u16, log_level: LogLevel) -> Result<()> {
    info!("Starting Surrogate RPC host");

    let config = ChannelConfig::new("surrogate-rpc").with_log_level(log_level);
    let mut handle = ChannelServer::start((host, port), config, scopes::supply_all)
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;

    // Intentional stdout so a parent process can pick up the port.
    println!("RPC_PORT={}", handle.port());

    info!("Surrogate RPC host running on {}", handle.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    handle.shutdown();

    Ok(())
}

async fn call(
    host: &str,
    port: u16,
    config: ChannelConfig,
    scope: &str,
    func: &str,
    raw_args: &[String],
) -> Result<()> {
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .with_context(|| format!("No address for {}:{}", host, port))?;

    let transport = SocketTransport::connect(addr).await?;
    let channel = Channel::new(transport, config)?;

    let args = raw_args.iter().map(|raw| parse_arg(raw)).collect();
    match channel.require(scope).invoke(func, args).await {
        Ok(reply) => {
            println!("{}", reply);
            Ok(())
        }
        Err(CallError::Remote(exception)) => bail!("{}.{} raised {}", scope, func, exception),
        Err(e) => Err(e).with_context(|| format!("Calling {}.{} failed", scope, func)),
    }
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
