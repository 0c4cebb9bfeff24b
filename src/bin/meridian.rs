//! Binary entry point for a meridian node.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use meridian::{
    config::NodeConfig,
    logging::init_logging,
    server::{run_node, SLOTS_PER_CPU},
};

#[derive(Parser, Debug)]
#[command(
    name = "meridian",
    version,
    about = "Graph database node serving combined query and mutation requests"
)]
struct Cli {
    #[arg(long, env = "MERIDIAN_CONFIG", help = "Path to config.toml")]
    config: Option<PathBuf>,

    #[arg(long, help = "HTTP port")]
    port: Option<u16>,

    #[arg(long, help = "Listen on all interfaces instead of loopback")]
    bindall: bool,

    #[arg(long, help = "Refuse mutations from clients")]
    nomutations: bool,

    #[arg(long, help = "Fraction of requests to trace at info level")]
    trace: Option<f64>,

    #[arg(long, help = "Tracing filter, e.g. info or meridian::engine=debug")]
    log_level: Option<String>,

    #[arg(long, help = "Give up waiting for the parser after this many ms")]
    parse_timeout_ms: Option<u64>,

    #[arg(long, help = "Request timeout in ms; requests declaring schema have none")]
    request_timeout_ms: Option<u64>,

    #[arg(
        long,
        help = format!("Concurrent request slots [default: {SLOTS_PER_CPU} per CPU]")
    )]
    max_pending: Option<usize>,

    #[arg(long = "allow-origin", help = "Allowed CORS origin; repeatable")]
    allow_origins: Vec<String>,
}

impl Cli {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        config.bindall |= self.bindall;
        config.nomutations |= self.nomutations;
        if let Some(trace) = self.trace {
            config.trace = trace;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(ms) = self.parse_timeout_ms {
            config.parse_timeout_ms = ms;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout_ms = ms;
        }
        if self.max_pending.is_some() {
            config.max_pending = self.max_pending;
        }
        config.allow_origins.extend(self.allow_origins);
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;
    init_logging(&config.log_level)?;
    tracing::debug!(?config, "effective configuration");
    run_node(config.node_options()).await?;
    Ok(())
}
