//! quotepool - serves `GET /quote` through a pooled outbound HTTP client.

use quotepool::config::load_config;
use quotepool::logging;
use quotepool::server::{serve, QuoteService};
use quotepool::HttpClient;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = env::args().collect();

    // Parse command line arguments
    let mut config_path: Option<&str> = None;
    let mut cli_listen_addr: Option<String> = None;
    let mut cli_upstream: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                config_path = args.get(i).map(|s| s.as_str());
            }
            "--upstream" => {
                i += 1;
                cli_upstream = args.get(i).cloned();
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                return Ok(());
            }
            arg if !arg.starts_with('-') && cli_listen_addr.is_none() => {
                cli_listen_addr = Some(arg.to_string());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage(&args[0]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut config = load_config(config_path)?;

    // CLI arguments override config file
    if let Some(addr) = cli_listen_addr {
        config.listen_addr = addr;
    }
    if let Some(upstream) = cli_upstream {
        config.quote.upstream_url = upstream;
    }

    let _log_guard = logging::init_logging(&config.logging);
    tracing::debug!(config = ?config, "Configuration loaded");

    let client = Arc::new(HttpClient::new(&config)?);
    let service = Arc::new(QuoteService::new(
        Arc::clone(&client),
        config.quote.upstream_url.clone(),
    ));

    let listen_addr: SocketAddr = config.listen_addr.parse()?;
    let listener = TcpListener::bind(listen_addr).await?;
    println!("Quote endpoint listening on http://{}/quote", listen_addr);
    println!("Upstream: {}", config.quote.upstream_url);

    let pool = &config.connection_pool;
    println!(
        "Connection pool: max {} per route, {} total",
        pool.max_per_route, pool.max_total
    );
    for o in &pool.route_overrides {
        println!(
            "  override {}://{}:{} -> {}",
            o.scheme,
            o.host,
            o.port.map_or_else(|| "default".to_string(), |p| p.to_string()),
            o.max_connections
        );
    }
    println!(
        "Timeouts: connect {}s, acquire {}s, socket {}s",
        config.timeouts.connect_seconds, config.timeouts.acquire_seconds, config.timeouts.socket_seconds
    );
    println!(
        "Keep-alive default {}s; idle reaper every {}s (max idle {}s)",
        config.keep_alive.default_seconds, config.reaper.interval_seconds, config.reaper.max_idle_seconds
    );

    tokio::select! {
        result = serve(listener, service) => {
            if let Err(e) = &result {
                error!(error = %e, "Accept loop failed");
            }
            client.shutdown();
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            client.shutdown();
        }
    }

    Ok(())
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [listen_addr] [options]", program);
    eprintln!();
    eprintln!("Serves GET /quote by fetching a random quote through a pooled HTTP client.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  listen_addr             Address to listen on (e.g., 0.0.0.0:8080 or [::]:8080)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <path>     Load config from YAML file");
    eprintln!("  --upstream <url>        Quote source URL");
    eprintln!("  -h, --help              Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} 127.0.0.1:8080", program);
    eprintln!("  {} --config config.yaml", program);
    eprintln!("  curl http://127.0.0.1:8080/quote");
}
