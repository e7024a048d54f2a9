use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowmint_config::{ConfigLoader, EngineConfig};
use flowmint_fees::{FeeEstimator, RpcCongestionProvider};
use flowmint_locks::{JobLockService, LockPolicy};
use flowmint_oracle::{HermesProvider, OracleGate};
use flowmint_receipts::{AttestationService, ReceiptService};
use flowmint_rpc::{EndpointConfig, RpcPool, RpcPoolConfig, TransactionSubmitter};
use flowmint_scheduler::implementations::jupiter::JupiterSwapProvider;
use flowmint_scheduler::{SchedulerBuilder, SchedulerConfig, SchedulerEngine, TracingNotifier};
use flowmint_storage::implementations::file::FileStorage;
use flowmint_storage::implementations::memory::MemoryStorage;
use flowmint_storage::{IntentStore, LockStore, StorageBackend, StorageService};
use flowmint_types::{Clock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flowmint-engine")]
#[command(about = "FlowMint intent execution engine", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/local.toml")]
	config: PathBuf,

	#[arg(long, env = "FLOWMINT_LOG_LEVEL", default_value = "info")]
	log_level: String,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the execution engine
	Start,
	/// Validate the configuration file
	Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	setup_tracing(&cli.log_level)?;

	match cli.command {
		Some(Commands::Start) | None => start_engine(cli).await,
		Some(Commands::Validate) => validate_config(cli).await,
	}
}

async fn start_engine(cli: Cli) -> Result<()> {
	info!("Starting FlowMint intent execution engine");
	info!("Loading configuration from: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration loaded successfully");
	info!("Engine name: {}", config.engine.name);
	info!("Tick interval: {}s", config.engine.tick_interval_secs);
	info!("RPC endpoints: {}", config.rpc.endpoints.len());

	let engine = Arc::new(build_engine(&config).context("Failed to build engine")?);

	let runner = engine.clone();
	let run_handle = tokio::spawn(async move { runner.run().await });

	shutdown_signal().await;
	info!("Shutdown signal received, stopping engine...");

	engine.shutdown();
	run_handle
		.await
		.context("Engine task panicked")?
		.context("Engine terminated with error")?;

	info!("FlowMint engine stopped");
	Ok(())
}

async fn validate_config(cli: Cli) -> Result<()> {
	info!("Validating configuration file: {:?}", cli.config);

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.context("Failed to load configuration")?;

	info!("Configuration is valid");
	info!("Engine name: {}", config.engine.name);
	info!("Storage backend: {}", config.storage.backend);
	for endpoint in &config.rpc.endpoints {
		info!("  RPC endpoint: {} (weight {})", endpoint.url, endpoint.weight);
	}
	info!("Oracle: {}", config.oracle.hermes_url);
	info!("Swap provider: {}", config.swap.jupiter_url);

	Ok(())
}

/// Explicit dependency wiring: every service is constructed once here
/// and handed to the scheduler.
fn build_engine(config: &EngineConfig) -> Result<SchedulerEngine> {
	let clock: Arc<dyn Clock> = Arc::new(SystemClock);

	let backend: Box<dyn StorageBackend> = match config.storage.backend.as_str() {
		"memory" => Box::new(MemoryStorage::new()),
		"file" => {
			let path = config
				.storage
				.path
				.clone()
				.unwrap_or_else(|| "./data/engine".to_string());
			Box::new(FileStorage::new(PathBuf::from(path)))
		}
		other => anyhow::bail!("unknown storage backend {:?}", other),
	};
	let storage = Arc::new(StorageService::new(backend));

	let pool = Arc::new(
		RpcPool::new(
			RpcPoolConfig {
				endpoints: config
					.rpc
					.endpoints
					.iter()
					.map(|endpoint| EndpointConfig {
						url: endpoint.url.clone(),
						weight: endpoint.weight,
					})
					.collect(),
				max_attempts: config.rpc.max_attempts,
				failure_rate_threshold: config.rpc.failure_rate_threshold,
				sample_window: config.rpc.sample_window,
				cooldown_ms: config.rpc.cooldown_secs * 1000,
			},
			clock.clone(),
		)
		.context("Failed to build rpc pool")?,
	);

	let submitter = Arc::new(TransactionSubmitter::new(
		pool.clone(),
		Duration::from_secs(config.rpc.confirm_timeout_secs),
		Duration::from_millis(500),
	));

	let intents = Arc::new(IntentStore::new(storage.clone()));
	let locks = Arc::new(JobLockService::new(
		Arc::new(LockStore::new(storage.clone())),
		clock.clone(),
		LockPolicy {
			window_ms: config.locks.window_ms,
			retry_limit: config.locks.retry_limit,
			max_running_ms: config.locks.max_running_ms,
		},
	));

	let oracle = Arc::new(OracleGate::new(
		Arc::new(HermesProvider::new(config.oracle.hermes_url.clone())),
		clock.clone(),
		Duration::from_secs(config.oracle.cache_ttl_secs),
	));

	let fees = Arc::new(FeeEstimator::new(
		Arc::new(RpcCongestionProvider::new(pool.clone())),
		clock.clone(),
		Duration::from_secs(config.fees.cache_ttl_secs),
		config.fees.base_compute_units,
	));

	let swaps = Arc::new(JupiterSwapProvider::new(
		config.swap.jupiter_url.clone(),
		submitter,
		clock.clone(),
		Duration::from_secs(config.swap.quote_ttl_secs),
	));

	let receipts = Arc::new(ReceiptService::new(storage.clone(), clock.clone()));
	let attestations = Arc::new(AttestationService::new(storage, clock.clone()));

	let engine = SchedulerBuilder::new()
		.with_intents(intents)
		.with_locks(locks)
		.with_oracle(oracle)
		.with_fees(fees)
		.with_swap_provider(swaps)
		.with_receipts(receipts)
		.with_attestations(attestations)
		.with_notifier(Arc::new(TracingNotifier))
		.with_clock(clock)
		.with_config(SchedulerConfig {
			tick_interval: Duration::from_secs(config.engine.tick_interval_secs),
			max_concurrent: config.engine.max_concurrent,
			default_slippage_bps: config.protocol.default_slippage_bps,
			protected_slippage_bps: config.protocol.protected_slippage_bps,
			max_price_impact_bps: config.protocol.max_price_impact_bps,
			protected_mode_enabled: config.protocol.protected_mode_enabled,
		})
		.build()?;

	Ok(engine)
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer())
		.init();

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c()
			.await
			.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install signal handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
