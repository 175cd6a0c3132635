use std::sync::Arc;

use clap::Parser;
use lbac_core::config::AppConfig;
use lbac_proxy::admin::AdminState;
use lbac_proxy::identity::IdentityService;
use lbac_proxy::labelstore::{self, LabelStore};
use lbac_proxy::proxy::Upstream;
use lbac_proxy::routes;
use lbac_proxy::state::AppState;
use prometheus_client::registry::Registry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	/// Path to config.yaml
	#[arg(short, long, value_name = "file", default_value = "./config.yaml")]
	config: std::path::PathBuf,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();

	let config = match AppConfig::load(&args.config) {
		Ok(cfg) => cfg,
		Err(e) => {
			eprintln!("startup failed: {e}");
			std::process::exit(1);
		},
	};

	init_logging(config.log_level);

	if let Err(e) = run(config).await {
		tracing::error!(error = %e, "startup failed");
		std::process::exit(1);
	}
}

fn init_logging(log_level: i32) {
	let filter = if log_level <= -1 {
		EnvFilter::new("debug")
	} else {
		EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
	};
	let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false);
	if log_level <= -1 {
		subscriber.with_writer(std::io::stderr).init();
	} else {
		subscriber.init();
	}
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
	let config = Arc::new(config);

	let identity =
		Arc::new(IdentityService::new(config.auth.clone(), config.alert.clone(), config.admin.clone()).await?);
	let labels = LabelStore::load(config.label_search_paths())?;

	let loki = Arc::new(Upstream::new(&config.loki, &config.proxy)?);
	let thanos = Arc::new(Upstream::new(&config.thanos, &config.proxy)?);
	let tempo = Arc::new(Upstream::new(&config.tempo, &config.proxy)?);

	let state = AppState { identity: identity.clone(), labels: labels.clone(), loki, thanos, tempo, config: config.clone() };

	let ct = CancellationToken::new();
	let background = vec![identity.spawn_refresh_loop(ct.clone()), labelstore::spawn_watch(labels, ct.clone())];

	let proxy_router = routes::router().with_state(state.clone()).layer(TraceLayer::new_for_http());
	let proxy_listener = tokio::net::TcpListener::bind(config.server.proxy_addr).await?;
	tracing::info!(addr = %config.server.proxy_addr, "proxy listener bound");

	let registry = Arc::new(Registry::default());
	let admin_router = AdminState::new(state, registry).router();
	let admin_listener = tokio::net::TcpListener::bind(config.server.admin_addr).await?;
	tracing::info!(addr = %config.server.admin_addr, "admin listener bound");

	let mut servers = JoinSet::new();
	let shutdown_ct = ct.clone();
	servers.spawn(async move {
		axum::serve(proxy_listener, proxy_router)
			.with_graceful_shutdown(shutdown_ct.cancelled_owned())
			.await
	});
	let shutdown_ct = ct.clone();
	servers.spawn(async move {
		axum::serve(admin_listener, admin_router).with_graceful_shutdown(shutdown_ct.cancelled_owned()).await
	});

	tokio::select! {
		_ = wait_for_shutdown_signal() => {
			tracing::info!("shutdown signal received, draining in-flight requests");
			ct.cancel();
		},
		Some(result) = servers.join_next() => {
			result??;
			ct.cancel();
		},
	}

	while let Some(result) = servers.join_next().await {
		result??;
	}
	for handle in background {
		handle.abort();
	}
	Ok(())
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		let _ = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
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
