//! # gauge-watch
//!
//! Connects to a gauge feed, subscribes to every `--destination` and every
//! `--symbol` and prints the updates until Ctrl-C, then shuts the client down
//! cleanly. Symbols are subscribed on the `--gauge` path of the configured
//! stream.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_gaugefeed::loggers::{LogOptions, setup_logging};
use lib_gaugefeed::{
    ClientConfig, ClientEvent, ConfigOverrides, Credential, CredentialProvider, EnvCredentials, GaugeClient,
    StaticCredentials, StreamId, SubscribeOptions, SubscriptionEvent, SubscriptionHandle, SubscriptionPath,
    SubscriptionType, load_config,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[clap(about = "Watch gauge feed subscriptions from the terminal", version)]
struct Args {
    #[clap(long, env = "GAUGEFEED_CONFIG", help = "Path to the JSON configuration file.")]
    config: Option<PathBuf>,

    #[clap(long, env = "GAUGEFEED_HOST", help = "Feed server host name.")]
    host: Option<String>,

    #[clap(long, env = "GAUGEFEED_PORT", help = "Feed server port.")]
    port: Option<u16>,

    #[clap(long, help = "Connect with ws:// instead of wss://.")]
    no_tls: bool,

    #[clap(long, env = "GAUGEFEED_STREAM", help = "Stream for --symbol subscriptions (realtime, delay, demo).")]
    stream: Option<StreamId>,

    #[clap(long, help = "Bearer token used to log in. Read from GAUGEFEED_TOKEN when omitted.")]
    token: Option<String>,

    #[clap(short = 'd', long = "destination", help = "Destination path, e.g. /gauge/eq/realtime/AAPL. Repeatable.")]
    destinations: Vec<String>,

    #[clap(short = 's', long = "symbol", help = "Symbol to watch on the configured stream, e.g. AAPL. Repeatable.")]
    symbols: Vec<String>,

    #[clap(long, default_value = "eq", value_parser = parse_gauge_path, help = "Gauge path for --symbol (eq, sent, mom, trend, bars).")]
    gauge: SubscriptionPath,

    #[clap(long, default_value_t = 0, help = "Minimum milliseconds between updates per subscription.")]
    throttle_ms: u32,

    #[clap(long, help = "Request a receipt for every subscribe.")]
    receipts: bool,

    #[clap(long, env = "GAUGEFEED_LOG_DIR", default_value = "logs", help = "Directory for log files.")]
    log_dir: PathBuf,

    #[clap(long, env = "GAUGEFEED_LOG_LEVEL", default_value = "info", help = "Logging level (trace, debug, info, warn, error).")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            use_tls: self.no_tls.then_some(false),
            stream: self.stream,
            ..Default::default()
        }
    }
}

fn parse_gauge_path(code: &str) -> std::result::Result<SubscriptionPath, String> {
    SubscriptionPath::from_code(code)
        .filter(|path| *path != SubscriptionPath::None && path.allowed_under(SubscriptionType::Gauge))
        .ok_or_else(|| format!("'{}' is not a gauge path", code))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    if args.destinations.is_empty() && args.symbols.is_empty() {
        bail!("nothing to watch: pass at least one --destination or --symbol");
    }

    let _ = rustls::crypto::ring::default_provider().install_default();

    let _guard = setup_logging(&LogOptions {
        log_dir: args.log_dir.clone(),
        file_prefix: "gauge-watch".to_string(),
        level: args.log_level.clone(),
        ansi: true,
    })
    .context("failed to set up logging")?;

    let config: ClientConfig = load_config(args.config.as_deref(), args.overrides()).context("invalid configuration")?;
    let provider: Box<dyn CredentialProvider> = match &args.token {
        Some(token) => Box::new(StaticCredentials(Credential::new(token.clone()).context("invalid --token")?)),
        None => Box::new(EnvCredentials::default()),
    };
    let credential = provider.credential().context("no usable credential")?;
    info!(
        host = %config.host,
        port = config.port,
        stream = %config.stream,
        login = credential.login(),
        "Starting gauge-watch"
    );

    let client = GaugeClient::new(config).context("failed to start client")?;
    let mut client_events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = client_events.recv().await {
            match event {
                ClientEvent::Connected => info!("Connected"),
                ClientEvent::Disconnected { reason } => warn!(%reason, "Disconnected"),
                ClientEvent::Reconnecting { attempt, delay } => {
                    info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting")
                }
                ClientEvent::Error(message) => error!(%message, "Feed error"),
            }
        }
    });

    let options = SubscribeOptions {
        with_receipt: args.receipts,
        throttle_rate_ms: args.throttle_ms,
    };
    let mut printers = Vec::with_capacity(args.destinations.len() + args.symbols.len());
    for path in &args.destinations {
        let handle = client
            .subscribe_path(path, options)
            .with_context(|| format!("cannot subscribe to '{}'", path))?;
        printers.push(tokio::spawn(print_updates(handle)));
    }
    for symbol in &args.symbols {
        let handle = client
            .subscribe_gauge(args.gauge, symbol, options)
            .with_context(|| format!("cannot subscribe to symbol '{}'", symbol))?;
        printers.push(tokio::spawn(print_updates(handle)));
    }

    client.connect(credential)?;

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");
    client.shutdown().await?;

    for printer in printers {
        let _ = printer.await;
    }
    Ok(())
}

async fn print_updates(mut handle: SubscriptionHandle) {
    let destination = handle.destination().to_string();
    while let Some(event) = handle.next().await {
        match event {
            SubscriptionEvent::Confirmed => println!("{destination} confirmed"),
            SubscriptionEvent::Update(update) => {
                let header = update.header();
                println!(
                    "{} {} {} bytes{}",
                    header.received_at.format("%H:%M:%S%.3f"),
                    destination,
                    update.payload().len(),
                    if header.dirty { " (snapshot)" } else { "" }
                );
            }
            SubscriptionEvent::Error(e) => eprintln!("{destination} error: {e}"),
            SubscriptionEvent::Completed(reason) => println!("{destination} completed: {reason:?}"),
        }
    }
}
