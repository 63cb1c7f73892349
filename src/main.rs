use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repo_warden::cherry_pick::LocalGit;
use repo_warden::config::{ConfigResolver, ServerConfig};
use repo_warden::credentials::CredentialPool;
use repo_warden::dispatch::{DispatchOptions, Dispatcher, TracingSink};
use repo_warden::github::HttpGitHub;
use repo_warden::handlers::WardenProcessor;
use repo_warden::server::{AppState, build_router};
use repo_warden::webhooks::IpAllowlist;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repo_warden=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "invalid environment");
            return ExitCode::FAILURE;
        }
    };

    let resolver = match ConfigResolver::from_file(&config.config_path) {
        Ok(resolver) => resolver,
        Err(error) => {
            tracing::error!(%error, path = %config.config_path.display(), "cannot load policy document");
            return ExitCode::FAILURE;
        }
    };

    let pool = Arc::new(CredentialPool::new(config.tokens.clone()));
    let gh = match HttpGitHub::new(Arc::clone(&pool)) {
        Ok(gh) => Arc::new(gh),
        Err(error) => {
            tracing::error!(%error, "cannot build API client");
            return ExitCode::FAILURE;
        }
    };
    let replayer = Arc::new(LocalGit::new(
        config.git_work_dir.clone(),
        config.git_name.clone(),
        config.git_email.clone(),
        Arc::clone(&pool),
    ));

    let processor = Arc::new(WardenProcessor::new(gh, resolver, replayer));
    let dispatcher = Arc::new(Dispatcher::new(
        processor,
        Arc::new(TracingSink),
        DispatchOptions {
            queue_depth: config.backlog,
            max_workers: config.max_workers,
            delivery_timeout: config.delivery_timeout,
            idle_timeout: config.idle_timeout,
        },
    ));

    let mut state = AppState::new(
        Arc::clone(&dispatcher),
        config.webhook_secret.as_ref().map(|s| s.as_bytes().to_vec()),
    );
    if !config.allowed_ranges.is_empty() {
        let (allowlist, rejected) = IpAllowlist::from_ranges(&config.allowed_ranges);
        for range in &rejected {
            tracing::warn!(%range, "ignoring malformed CIDR range");
        }
        state = state.with_allowlist(allowlist, config.trust_forwarded_header);
    }
    if config.webhook_secret.is_none() {
        tracing::warn!("no webhook secret configured; signature verification disabled");
    }

    let app = build_router(state);

    tracing::info!(addr = %config.bind_addr, "listening");
    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, addr = %config.bind_addr, "cannot bind");
            return ExitCode::FAILURE;
        }
    };

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    });

    if let Err(error) = serve.await {
        tracing::error!(%error, "server error");
        return ExitCode::FAILURE;
    }

    dispatcher.shutdown_all().await;
    ExitCode::SUCCESS
}
