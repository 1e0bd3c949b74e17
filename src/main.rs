use std::sync::Arc;

use bazaar_auth::config::{environment::Config, init_db};
use bazaar_auth::modules::auth::crud::{
    MySqlMfaRepository, MySqlSessionRepository, MySqlUserRepository,
};
use bazaar_auth::modules::auth::AuthService;
use bazaar_auth::services::email::{EmailDispatcher, LogMailer};
use bazaar_auth::services::ephemeral::RedisEphemeralStore;
use bazaar_auth::services::jwt::TokenService;
use bazaar_auth::services::metrics::MetricsRegistry;
use bazaar_auth::services::oauth::GoogleTokenVerifier;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bazaar_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load environment configuration");

    let db = init_db(&config.database_url)
        .await
        .expect("Failed to connect to MySQL");
    sqlx::migrate!()
        .run(&db)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Connected to MySQL");

    let store = RedisEphemeralStore::connect(&config.redis_url)
        .await
        .expect("Failed to connect to Redis");
    tracing::info!("Connected to Redis");

    let metrics = MetricsRegistry::new().expect("Failed to build metrics registry");

    let tokens = Arc::new(TokenService::new(
        config.jwt_secret.clone(),
        config.jwt_issuer.clone(),
        config.access_token_ttl_secs,
        config.refresh_token_ttl_secs,
    ));

    let emails = Arc::new(EmailDispatcher::start(
        Arc::new(LogMailer),
        metrics.clone(),
        config.email_queue_capacity,
        config.email_workers,
    ));

    let auth = AuthService::new(
        Arc::new(MySqlUserRepository::new(db.clone())),
        Arc::new(MySqlSessionRepository::new(db.clone())),
        Arc::new(MySqlMfaRepository::new(db.clone())),
        tokens.clone(),
        Arc::new(store),
        emails,
        Arc::new(GoogleTokenVerifier::new(config.google_client_id.clone())),
        metrics.clone(),
        config.jwt_issuer.clone(),
    );

    let app = bazaar_auth::create_app(auth, tokens, metrics).await;

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    tracing::info!("Server running on http://localhost:3000");
    axum::serve(listener, app).await.unwrap();
}
