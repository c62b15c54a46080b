//! Pool Miner - Main Application
//!
//! Resolves the pool, validates the user and keeps a pool of worker sessions
//! running until Ctrl-C or a fatal error.

use pool_miner::{
    config::{Config, LogFormat},
    protocol::{BalanceQuery, Connection, BANNER_MAX_LEN},
    resolver::{EndpointResolver, HttpEndpointResolver, StaticEndpointResolver},
    telemetry::{ScheduledTelemetry, Telemetry, TracingTelemetry},
    utils::format_uptime,
    worker::WorkFunctionFactory,
    Error, Result, SessionPool, Username, APP_DESCRIPTION, APP_NAME, APP_VERSION,
};

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", APP_NAME, e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing; RUST_LOG takes precedence over --log-level
fn init_tracing(config: &Config) {
    let level = tracing::Level::from(config.log_level);
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_target(false))
            .init(),
    }
}

async fn run(config: Config) -> Result<()> {
    if config.info {
        print_info();
        return Ok(());
    }

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let resolver = build_resolver(&config)?;

    if config.balance {
        return query_balance(&config, resolver.as_ref()).await;
    }

    let username = match config.username()? {
        Some(username) => username,
        None => Username::new(prompt(&mut stdin, "Username: ").await?)?,
    };
    let threads = match config.threads {
        Some(threads) => threads,
        None => parse_threads(
            &prompt(&mut stdin, &format!("Threads [{}]: ", num_cpus::get())).await?,
        )?,
    };

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: user={}, threads={}, work={}, framing={}",
        username, threads, config.work, config.framing
    );

    let work = WorkFunctionFactory::create(config.work, config.constant_delay()?);
    let telemetry = Arc::new(ScheduledTelemetry::new(Arc::new(TracingTelemetry))?);
    let pool = SessionPool::new(username, resolver, work)
        .with_settings(config.pool_settings(threads)?)
        .with_telemetry(Arc::clone(&telemetry) as Arc<dyn Telemetry>);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    let started = Instant::now();
    let result = pool.run(shutdown).await;
    telemetry.shutdown();

    info!(
        restarts = pool.restart_count(),
        "Mined for {}",
        format_uptime(started.elapsed())
    );
    result
}

/// Static endpoint when host and port are configured, otherwise the
/// published address file
fn build_resolver(config: &Config) -> Result<Arc<dyn EndpointResolver>> {
    match config.static_endpoint() {
        Some(endpoint) => Ok(Arc::new(StaticEndpointResolver::new(endpoint))),
        None => {
            let resolver = HttpEndpointResolver::new(&config.endpoint_url, config.resolve_timeout()?)?;
            debug!(url = %resolver.url(), "Resolving pool endpoint over HTTP");
            Ok(Arc::new(resolver))
        }
    }
}

/// Connect once, skip the banner and print the account balance
async fn query_balance(config: &Config, resolver: &dyn EndpointResolver) -> Result<()> {
    let endpoint = resolver.resolve().await;
    if !endpoint.is_resolved() {
        return Err(Error::resolution("pool endpoint could not be resolved"));
    }

    let mut conn = Connection::open(&endpoint, config.framing, config.read_timeout()?).await?;
    let version = conn.recv(BANNER_MAX_LEN).await?;
    info!("Server version: {}", version.trim());

    let balance = BalanceQuery::new().get_balance(&mut conn).await;
    println!("Balance: {}", balance);
    Ok(())
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, question: &str) -> Result<String> {
    print!("{}", question);
    std::io::stdout().flush()?;

    match lines.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => Err(Error::config("stdin closed before input was given")),
    }
}

/// Thread count from a prompt answer; empty means one per CPU
fn parse_threads(input: &str) -> Result<usize> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(num_cpus::get());
    }

    match input.parse::<usize>() {
        Ok(0) => Err(Error::config("Thread count must be greater than 0")),
        Ok(threads) => Ok(threads),
        Err(e) => Err(Error::config(format!("Invalid thread count '{}': {}", input, e))),
    }
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("{}", APP_DESCRIPTION);
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
