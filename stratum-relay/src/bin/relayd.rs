use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use stratum_relay::api::ApiConfig;
use stratum_relay::config::Config;
use stratum_relay::daemon::Daemon;
use stratum_relay::pool::{ExponentialBackoff, PoolConnector};
use stratum_relay::tracing::{self, prelude::*};

/// Intercepting Stratum proxy: binds each mining worker to its configured pool.
#[derive(Debug, Parser)]
#[command(name = "stratum-relayd", version, about)]
struct Args {
    /// Address to accept worker connections on
    #[arg(short = 'L', long, default_value = "0.0.0.0")]
    listen_address: String,

    /// Port to accept worker connections on
    #[arg(short = 'P', long, default_value_t = 65432)]
    listen_port: u16,

    /// Path to the pool and worker configuration
    #[arg(short = 'c', long, default_value = "stratum-relay.toml", env = "STRATUM_RELAY_CONFIG")]
    config: PathBuf,

    /// Log at DEBUG instead of INFO
    #[arg(short = 'v', long, visible_alias = "debug")]
    verbose: bool,

    /// Serve the diagnostics HTTP API
    #[arg(long)]
    diagnostics: bool,

    /// Address for the diagnostics HTTP API
    #[arg(long, default_value = "127.0.0.1:7785")]
    diagnostics_address: String,

    /// Retry failed pool dials this many times with exponential backoff
    #[arg(long, default_value_t = 0)]
    pool_retries: u32,

    /// Write an empty configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

impl Args {
    fn listen(&self) -> String {
        if self.listen_address.contains(':') {
            format!("[{}]:{}", self.listen_address, self.listen_port)
        } else {
            format!("{}:{}", self.listen_address, self.listen_port)
        }
    }

    fn connector(&self) -> PoolConnector {
        if self.pool_retries == 0 {
            return PoolConnector::default();
        }
        PoolConnector::new(Arc::new(ExponentialBackoff {
            max_attempts: self.pool_retries.saturating_add(1),
            ..Default::default()
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing::init_journald_or_stdout(args.verbose);

    if args.write_default_config {
        Config::default()
            .write_to(&args.config)
            .context("could not write default configuration")?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    let config = Config::load_from(&args.config).with_context(|| {
        format!(
            "could not load configuration from {}",
            args.config.display()
        )
    })?;
    debug!(
        path = %args.config.display(),
        pools = config.pools().len(),
        workers = config.workers().len(),
        "Loaded configuration"
    );

    let mut daemon =
        Daemon::new(Arc::new(config), args.listen()).with_connector(args.connector());
    if args.diagnostics {
        daemon = daemon.with_api(ApiConfig {
            bind_addr: args.diagnostics_address.clone(),
        });
    }

    daemon.run().await
}
