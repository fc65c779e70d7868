use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use std::net::IpAddr;
use std::path::PathBuf;
use svcwatch_core::{AppConfig, LogFormat, LoggingConfig};
use svcwatch_discovery::{DiscoveryEvent, DiscoveryStreamFactory, EngineVariant};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// svcwatch - watch the local network for DNS-SD services
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "svcwatch.yaml")]
    config: PathBuf,

    /// Service type to watch (repeatable, overrides the configured list)
    #[arg(short = 't', long = "service-type")]
    service_types: Vec<String>,

    /// Interface address to listen on
    #[arg(short, long)]
    interface: Option<IpAddr>,

    /// Discovery engine variant
    #[arg(long)]
    variant: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.file_line)
        .with_line_number(logging.file_line);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn print_event(event: &DiscoveryEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let service = event.descriptor();
    let marker = if event.is_added() { '+' } else { '-' };
    println!("{} {}", marker, service);
    for (key, value) in service.attributes() {
        println!("    {}={}", key, value);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::from_config_builder(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;

    if !args.service_types.is_empty() {
        config.discovery.service_types = args.service_types.clone();
    }
    if args.interface.is_some() {
        config.discovery.interface = args.interface;
    }
    if let Some(variant) = &args.variant {
        config.discovery.variant = variant.clone();
    }
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging);

    let variant: EngineVariant = config
        .discovery
        .variant
        .parse()
        .context("Invalid discovery variant")?;
    let factory = DiscoveryStreamFactory::from_config(&config.discovery);

    let mut streams = Vec::with_capacity(config.discovery.service_types.len());
    for service_type in &config.discovery.service_types {
        let stream = factory
            .create_stream(service_type, config.discovery.interface, variant)
            .with_context(|| format!("Failed to watch {}", service_type))?;
        info!(service_type, "Watching");
        streams.push(stream);
    }

    let cancel_handles: Vec<_> = streams.iter().map(|s| s.cancel_handle()).collect();
    let mut events = stream::select_all(streams);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            next = events.next() => match next {
                Some(Ok(event)) => print_event(&event, args.json)?,
                Some(Err(e)) => error!(error = %e, "Discovery stream failed"),
                None => {
                    warn!("All discovery streams ended");
                    break;
                }
            },
        }
    }

    for handle in cancel_handles {
        handle.cancel();
    }

    Ok(())
}
