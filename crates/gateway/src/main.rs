use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ob_domain::config::{Config, LogFormat, ObservabilityConfig};
use ob_gateway::api;
use ob_gateway::bootstrap;
use ob_gateway::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let (config, config_path) = cli::load_config()?;
            let tracer_provider = init_tracing(&config.observability);
            tracing::debug!(config_path = %config_path, "configuration loaded");
            run_server(Arc::new(config), tracer_provider).await
        }
        Command::Config(sub) => {
            init_cli_tracing();
            let (config, config_path) = cli::load_config()?;
            match sub {
                ConfigCommand::Validate => {
                    if !cli::config::validate(&config, &config_path) {
                        std::process::exit(1);
                    }
                    Ok(())
                }
                ConfigCommand::Show => cli::config::show(&config),
            }
        }
        Command::Version => {
            println!("orgbridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install the global subscriber for `serve`.  Returns the OTLP tracer
/// provider when span export is enabled; it must be shut down on exit so
/// buffered spans are flushed.
fn init_tracing(obs: &ObservabilityConfig) -> Option<SdkTracerProvider> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let fallback = obs.log_filter.trim();
        EnvFilter::new(if fallback.is_empty() { "info" } else { fallback })
    });

    let json = (obs.log_format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());
    let compact =
        (obs.log_format == LogFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact());

    let provider = obs
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| otlp_tracer_provider(endpoint, obs));
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("orgbridge")));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(compact)
        .with(otel)
        .init();

    provider
}

fn otlp_tracer_provider(endpoint: &str, obs: &ObservabilityConfig) -> Option<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig as _;

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            // The subscriber is not installed yet.
            eprintln!("WARNING: OTLP exporter for {endpoint} unavailable ({e}); span export disabled");
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(obs.sample_rate))
            .with_resource(resource)
            .build(),
    )
}

/// Compact stderr tracing at `warn` for one-shot commands, keeping stdout
/// clean for their output.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

// ── Server ──────────────────────────────────────────────────────────

async fn run_server(
    config: Arc<Config>,
    tracer_provider: Option<SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "orgbridge starting");

    let state = bootstrap::build_app_state(config.clone()).await?;
    bootstrap::spawn_background_tasks(&state);

    let max_in_flight = config.server.max_concurrent_requests;
    let router = api::router(state.clone())
        .layer(api::cors::layer(&config.server.cors))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_in_flight));

    let app = match &config.server.rate_limit {
        Some(rl) => {
            let governor = GovernorConfigBuilder::default()
                .per_second(rl.requests_per_second)
                .burst_size(rl.burst_size)
                .finish()
                .context("rate_limit: requests_per_second and burst_size must be > 0")?;
            tracing::info!(
                requests_per_second = rl.requests_per_second,
                burst_size = rl.burst_size,
                "per-IP rate limiting enabled"
            );
            router
                .layer(GovernorLayer {
                    config: Arc::new(governor),
                })
                .with_state(state.clone())
        }
        None => {
            tracing::info!("per-IP rate limiting disabled");
            router.with_state(state.clone())
        }
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, max_in_flight, "orgbridge listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!(
        live_sessions = state.manager.registry().len(),
        "HTTP server stopped, closing sessions"
    );
    state.manager.shutdown().await;

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "tracer provider shutdown failed");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
