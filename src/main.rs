use deadbolt::http::HttpClientBuilder;
use deadbolt::plugins::{CookieStorage, StateProxyOptions};
use deadbolt::providers::{AzureProvider, DiscordProvider};
use deadbolt::{Deadbolt, PluginSource};
use log::{error, info, warn};
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use std::time::Duration;
use web::AppState;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
    }

    info!(
        "Starting deadbolt [{}] in {} mode",
        config.base_url,
        config.runtime_env()
    );

    let deadbolt = match build_deadbolt(&config) {
        Ok(deadbolt) => Arc::new(deadbolt),
        Err(e) => {
            error!("Failed to configure deadbolt: {e}");
            std::process::exit(1);
        }
    };

    let mount_path = config.mount_path();
    let routes = web::define_routes(AppState::new(deadbolt));
    let app = if mount_path.is_empty() {
        routes
    } else {
        axum::Router::new().nest(&mount_path, routes)
    };

    let host = config.interface.as_str();
    let port = config.port;
    let listener = match tokio::net::TcpListener::bind((host, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {host}:{port}: {e}");
            std::process::exit(1);
        }
    };
    info!("Server starting... listening for connections on http://{host}:{port}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}

fn build_deadbolt(config: &Config) -> Result<Deadbolt, deadbolt::Error> {
    let http_client = || {
        HttpClientBuilder::new()
            .with_timeout(Duration::from_secs(config.http_timeout_secs))
            .with_max_retries(config.http_max_retries)
            .build()
    };

    let mut builder = Deadbolt::builder(config.base_url.as_str(), config.secret());

    if let Some((client_id, client_secret)) = config.discord_credentials() {
        builder = builder.provider(
            DiscordProvider::new(client_id, client_secret, http_client()?)
                .with_scope(config.discord_scope.as_str()),
        );
    }
    if let Some(azure) = config.azure_credentials() {
        let mut provider =
            AzureProvider::new(azure.tenant, azure.client_id, azure.client_secret, http_client()?);
        if let Some(scope) = azure.scope {
            provider = provider.with_scope(scope);
        }
        builder = builder.provider(provider);
    }
    if config.discord_credentials().is_none() && config.azure_credentials().is_none() {
        warn!("No provider credentials configured");
    }

    builder = builder.plugin(PluginSource::ready(CookieStorage::new(
        config.cookie_name.as_str(),
    )));

    if let Some(proxy_to) = &config.proxy_to {
        let mut options = StateProxyOptions::new(proxy_to.as_str());
        if !config.allowed_origins.is_empty() {
            options.allowed_origins = Some(
                config
                    .allowed_origins
                    .iter()
                    .map(|origin| origin.as_str().into())
                    .collect(),
            );
        }
        options.allowed_providers = config.allowed_providers.clone();
        info!("State proxy forwarding callbacks through {}", proxy_to);
        builder = builder.plugin(options.into_plugin());
    }

    if let Some(provider) = &config.default_provider {
        builder = builder.default_provider(provider.as_str());
    }
    if let Some(url) = &config.login_page_url {
        builder = builder.login_page_url(url.as_str());
    }

    builder.build()
}
