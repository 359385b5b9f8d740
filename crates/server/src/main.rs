use portal_gateway::AppResources;
use portal_gateway::api::start_webserver;
use portal_gateway::ceremony::build_webauthn;
use portal_gateway::config::load_config_or_panic;
use portal_gateway::keys::KeyManager;
use sea_orm::Database;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_tracing() {
    let default_directives = "portal_gateway=info,hyper=warn,sea_orm=info";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let layer = fmt::layer().with_target(true).with_level(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    initialize_tracing();

    let config = Arc::new(load_config_or_panic());

    let keys = Arc::new(KeyManager::from_pem(
        &config.keys.private_key,
        &config.keys.public_key,
        config.tokens.identity_token_lifetime,
    )?);
    let webauthn = Arc::new(build_webauthn(&config.webauthn)?);

    let db = Arc::new(Database::connect(&config.database_url).await?);

    tracing::info!(
        issuer = %config.issuer_url,
        web_url = %config.web_url,
        rp_id = %config.webauthn.rp_id,
        "gateway configured"
    );

    let resources = AppResources {
        db,
        config,
        keys,
        webauthn,
    };
    start_webserver(resources).await
}
