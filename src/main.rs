//! Geometry stream viewer.
//!
//! Usage:
//!   cviz-client -c /etc/cviz/cviz_client.conf
//!   cviz-client -c cviz_client.conf --stderr --topics lane_boundary,ego

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use cviz_client::config::{self, ClientConfig};
use cviz_client::render::scene::SceneSink;
use cviz_client::subscription::persist::{FileStore, MemoryStore, TopicPersistence};
use cviz_client::{Client, ClientError, Transform};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "cviz-client", about = "Real-time geometry stream visualization client")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/cviz/cviz_client.conf")]
    config: PathBuf,

    /// Log to stderr instead of syslog (useful for debugging).
    #[arg(long)]
    stderr: bool,

    /// Initial topics, comma separated.  Overrides the stored selection.
    #[arg(long, value_delimiter = ',')]
    topics: Option<Vec<String>>,

    /// Stream URL, overriding `ws_url`.
    #[arg(long)]
    url: Option<String>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let mut cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("cviz-client: config error: {e}");
            process::exit(1);
        }
    };
    if let Some(url) = cli.url {
        cfg.ws_url = url;
    }
    if let Some(topics) = cli.topics {
        cfg.topics = Some(topics);
    }
    if let Err(e) = config::validate_config(&cfg) {
        eprintln!("cviz-client: config validation: {e}");
        process::exit(1);
    }

    let use_syslog = cfg.log_syslog && !cli.stderr;
    if let Err(e) = setup_logging(use_syslog) {
        eprintln!("cviz-client: {e:#}");
        process::exit(1);
    }

    let cfg = Arc::new(cfg);
    info!("cviz-client starting ({})", cfg.ws_url);

    let result = match &cfg.state_dir {
        Some(dir) => run(Arc::clone(&cfg), FileStore::new(dir)).await,
        None => run(Arc::clone(&cfg), MemoryStore::default()).await,
    };
    match result {
        Ok(()) => info!("cviz-client stopped"),
        Err(e) => {
            error!("{e:#}");
            process::exit(1);
        }
    }
}

async fn run<P: TopicPersistence>(cfg: Arc<ClientConfig>, persistence: P) -> anyhow::Result<()> {
    let (client, handle) = Client::new(cfg, SceneSink::new(Transform::IDENTITY), persistence)
        .context("cannot start client")?;

    // Ctrl-C closes the session cleanly
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            ctrl_c.close();
        }
    });

    match client.run().await {
        Ok(()) => Ok(()),
        Err(e @ ClientError::ReconnectExhausted { .. }) => Err(e).context("giving up"),
        Err(e) => Err(e.into()),
    }
}

// ── Logging setup ─────────────────────────────────────────────────────────────

fn setup_logging(use_syslog: bool) -> anyhow::Result<()> {
    if use_syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process:  "cviz-client".into(),
            pid:      process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|e| anyhow::anyhow!("syslog connect failed: {e}"))?;
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|()| log::set_max_level(log::LevelFilter::Info))
            .map_err(|e| anyhow::anyhow!("set_logger: {e}"))?;
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .parse_default_env()
            .init();
    }
    Ok(())
}
