//! Thin reference binary wiring the `fabric` crate together: config file
//! -> registry -> discovery cache -> router -> pool -> resilience ->
//! client façade (spec §6's "Registry CLI-equivalent operations" and
//! "Client façade"). Everything this binary itself does is a command --
//! the HTTP/WebSocket/MQTT frontends, the per-language SDKs, and any
//! long-running ingress server are out of scope per spec §1 and live
//! elsewhere; this is the piece that corresponds to `agentgateway-app`'s
//! role of being "just enough `main` to stand the library up".

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fabric::client::{CallOptions, Client, NetworkConnector};
use fabric::config::FabricConfig;
use fabric::pool::Manager as PoolManager;
use fabric::registry::cache::DiscoveryCache;
use fabric::registry::client::{EtcdRegistry, HealthProbe, Registry as _};
use fabric::registry::Discovery as _;
use fabric::router::lb::{self, LoadBalancerKind};
use fabric::router::Router;
use fabric::telemetry::metrics::Metrics;
use fabric::types::{HealthStatus, InternalProtocol, ServiceInfo};

/// Reference CLI for the request-plane fabric.
///
/// Configuration is loaded from (in order, later wins):
/// 1. Compiled defaults
/// 2. `--config <path>` YAML file
/// 3. The three `FABRIC_REGISTRY_*` environment overrides (spec §6)
#[derive(Parser)]
#[command(name = "fabric")]
#[command(about = "Reference CLI for the polyglot request-plane fabric")]
#[command(version)]
struct Cli {
	/// Path to a YAML config file.
	#[arg(short, long, global = true)]
	config: Option<PathBuf>,

	/// Emit JSON-formatted logs instead of the human-readable default.
	#[arg(long, global = true)]
	json_logs: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Register a service instance in the registry.
	Register {
		name: String,
		id: String,
		#[arg(long, default_value = "0.1.0")]
		version: String,
		#[arg(long, default_value = "rust")]
		language: String,
		address: String,
		port: u16,
		#[arg(long, value_enum, default_value = "grpc")]
		protocol: ProtocolArg,
	},

	/// Deregister a service instance.
	Deregister { name: String, id: String },

	/// Discover the healthy instances of a service.
	Discover {
		name: String,
		#[arg(long)]
		version: Option<String>,
	},

	/// Watch a service name for changes for the given duration, printing
	/// each update, then unwatch.
	Watch {
		name: String,
		#[arg(long, default_value_t = 30)]
		seconds: u64,
	},

	/// Call a backend service through the outbound call path (router ->
	/// pool -> resilience -> dispatcher).
	Call {
		service: String,
		method: String,
		/// Request payload, sent as-is (already-canonical-JSON bytes).
		payload: String,
		#[arg(long)]
		timeout_ms: Option<u64>,
		#[arg(long, value_enum, default_value = "round_robin")]
		load_balancer: LoadBalancerArg,
	},

	/// Run the health prober and pool maintenance loops indefinitely.
	Serve,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProtocolArg {
	Grpc,
	JsonRpc,
	Custom,
}

impl From<ProtocolArg> for InternalProtocol {
	fn from(p: ProtocolArg) -> Self {
		match p {
			ProtocolArg::Grpc => InternalProtocol::Grpc,
			ProtocolArg::JsonRpc => InternalProtocol::JsonRpc,
			ProtocolArg::Custom => InternalProtocol::Custom,
		}
	}
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum LoadBalancerArg {
	RoundRobin,
	Random,
	Weighted,
	LeastConnections,
}

impl From<LoadBalancerArg> for LoadBalancerKind {
	fn from(p: LoadBalancerArg) -> Self {
		match p {
			LoadBalancerArg::RoundRobin => LoadBalancerKind::RoundRobin,
			LoadBalancerArg::Random => LoadBalancerKind::Random,
			LoadBalancerArg::Weighted => LoadBalancerKind::WeightedRoundRobin,
			LoadBalancerArg::LeastConnections => LoadBalancerKind::LeastConnections,
		}
	}
}

fn load_config(path: Option<&PathBuf>) -> Result<FabricConfig> {
	let mut config = match path {
		Some(p) => {
			let raw = std::fs::read_to_string(p).with_context(|| format!("reading config file {}", p.display()))?;
			serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {}", p.display()))?
		},
		None => FabricConfig::default(),
	};
	config.registry = config.registry.apply_env_overrides();
	Ok(config)
}

async fn connect_registry(config: &FabricConfig) -> Result<EtcdRegistry> {
	EtcdRegistry::connect(config.registry.clone()).await.context("connecting to the service registry")
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	fabric::telemetry::init(cli.json_logs);

	let config = load_config(cli.config.as_ref())?;

	match cli.command {
		Commands::Register {
			name,
			id,
			version,
			language,
			address,
			port,
			protocol,
		} => {
			let registry = connect_registry(&config).await?;
			let info = ServiceInfo {
				id,
				name,
				version,
				language,
				address,
				port,
				protocols: vec![protocol.into()],
				metadata: Default::default(),
				registered_at: chrono::Utc::now(),
				health_status: HealthStatus::Healthy,
			};
			registry.register(info).await?;
			tracing::info!("registered");
		},

		Commands::Deregister { name, id } => {
			let registry = connect_registry(&config).await?;
			registry.deregister(&name, &id).await?;
			tracing::info!("deregistered");
		},

		Commands::Discover { name, version } => {
			let registry = connect_registry(&config).await?;
			let endpoints = registry.discover(&name, version.as_deref()).await?;
			for e in &endpoints {
				println!("{} {}:{} ({:?})", e.service_id, e.address, e.port, e.internal_protocol);
			}
		},

		Commands::Watch { name, seconds } => {
			let registry = connect_registry(&config).await?;
			let handle = registry
				.watch(
					&name,
					Box::new(|endpoints| {
						println!("update: {} instance(s)", endpoints.len());
						for e in &endpoints {
							println!("  {} {}:{}", e.service_id, e.address, e.port);
						}
					}),
				)
				.await?;
			tokio::time::sleep(Duration::from_secs(seconds)).await;
			handle.unwatch();
		},

		Commands::Call {
			service,
			method,
			payload,
			timeout_ms,
			load_balancer,
		} => {
			let mut prom_registry = prometheus_client::registry::Registry::default();
			let metrics = Arc::new(Metrics::register(&mut prom_registry));

			let registry = connect_registry(&config).await?;
			registry.set_metrics(metrics.clone());
			let cache = Arc::new(DiscoveryCache::new(Arc::new(registry), config.registry.cache_ttl));
			let router = Router::new(cache, lb::build(load_balancer.into()));
			let pool = Arc::new(PoolManager::new(config.pool.clone(), Arc::new(NetworkConnector)).with_metrics(metrics.clone()));
			let client = Client::new(router, pool, config.retry.clone(), config.breaker.clone()).with_metrics(metrics);

			let options = CallOptions {
				timeout: timeout_ms.map(Duration::from_millis),
				retry_override: None,
			};
			let response = client.call(&service, &method, payload.into_bytes().into(), options).await?;
			println!("{}", String::from_utf8_lossy(&response));
		},

		Commands::Serve => {
			let mut prom_registry = prometheus_client::registry::Registry::default();
			let metrics = Arc::new(Metrics::register(&mut prom_registry));

			let registry = connect_registry(&config).await?;
			registry.set_metrics(metrics);
			let _probe = HealthProbe::spawn(registry);
			tracing::info!("fabric-app serving; health probe running, press ctrl-c to stop");
			tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
		},
	}

	Ok(())
}
