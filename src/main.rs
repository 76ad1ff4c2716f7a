use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use licensegate::config::Config;
use licensegate::db::{self, AppState, DbPool};
use licensegate::handlers;
use licensegate::jwt::AccessTokenSigner;
use licensegate::verification::{
    EnvatoClient, EnvatoConfig, PurchaseCodeSource, PurchaseCodeVerifier, VerifierConfig,
};
use licensegate::verification_log;

#[derive(Parser)]
#[command(name = "licensegate", version, about = "Purchase-code verification and KB access gating")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Delete verification logs older than the given number of days
    PurgeLogs {
        #[arg(long)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("licensegate=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = db::create_pool(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;
    {
        let conn = pool.get()?;
        db::init_db(&conn).context("Failed to initialize schema")?;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::PurgeLogs { older_than_days } => {
            let conn = pool.get()?;
            let deleted = verification_log::purge_older_than(&conn, older_than_days)?;
            println!("Deleted {} verification log(s) older than {} days", deleted, older_than_days);
            Ok(())
        }
        Command::Serve => serve(config, pool).await,
    }
}

fn build_state(config: &Config, pool: DbPool) -> anyhow::Result<AppState> {
    let mut verifier = PurchaseCodeVerifier::new(
        pool.clone(),
        VerifierConfig {
            default_source: config.verification_source,
            timeout: config.verification_timeout,
        },
    );

    match &config.envato_api_token {
        Some(token) => {
            let client = EnvatoClient::new(&EnvatoConfig {
                api_token: token.clone(),
                base_url: config.envato_api_base_url.clone(),
                timeout: config.verification_timeout,
            })?;
            tracing::info!(
                source = client.kind().as_ref(),
                base_url = %config.envato_api_base_url,
                "Marketplace verification enabled"
            );
            verifier = verifier.with_marketplace(Arc::new(client));
        }
        None => tracing::info!(
            "ENVATO_API_TOKEN not set; marketplace-api verifications will be logged as errors"
        ),
    }

    let access_tokens = match &config.access_token_secret {
        Some(secret) => AccessTokenSigner::new(secret.as_bytes()),
        None => {
            tracing::warn!(
                "ACCESS_TOKEN_SECRET not set; KB access tokens will not survive a restart"
            );
            AccessTokenSigner::ephemeral()
        }
    };

    if config.admin_api_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN not set; admin API is disabled");
    }

    Ok(AppState {
        db: pool,
        verifier: Arc::new(verifier),
        access_tokens: Arc::new(access_tokens),
        admin_token: config.admin_api_token.clone(),
    })
}

async fn serve(config: Config, pool: DbPool) -> anyhow::Result<()> {
    if config.verification_log_retention_days > 0 {
        let conn = pool.get()?;
        verification_log::purge_older_than(&conn, config.verification_log_retention_days)?;
    }

    let state = build_state(&config, pool)?;

    let governor_config = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_replenish_secs)
        .burst_size(config.rate_limit_burst)
        .finish()
        .context("Invalid rate limit configuration")?;
    let governor_config = Arc::new(governor_config);

    // Evict idle rate-limit buckets
    let limiter = governor_config.limiter().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            limiter.retain_recent();
        }
    });

    // Verification and KB code submissions draw from one per-IP quota
    let public = handlers::public::router().layer(GovernorLayer::new(governor_config.clone()));
    let kb_access =
        handlers::kb::access_router(state.clone()).layer(GovernorLayer::new(governor_config));

    let cors = if config.dev_mode {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    let app = Router::new()
        .merge(public)
        .merge(kb_access)
        .merge(handlers::kb::router(state.clone()))
        .merge(handlers::admin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("licensegate listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
