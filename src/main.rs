use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weather_proxy_server::config::Config;
use weather_proxy_server::routes::{cors_layer, create_router, AppState};
use weather_proxy_server::weather::{
    init_cache, openweather::OpenWeatherClient, service::WeatherService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_proxy_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // One client and one cache for the whole process
    let weather_client = OpenWeatherClient::new(&config)?;
    let cache = init_cache(config.cache_ttl(), config.cache_max_entries);
    tracing::info!(
        "Response cache ready (ttl {}ms, capacity {})",
        cache.ttl().as_millis(),
        config.cache_max_entries
    );
    let weather_service = WeatherService::new(weather_client, cache);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app_env = config.app_env;
    let cors = cors_layer(&config);
    let cleanup_every = config.rate_limit_window().max(Duration::from_secs(1));

    let state = AppState::new(config, weather_service)?;
    spawn_rate_limit_cleanup(state.clone(), cleanup_every);

    let app = create_router(state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server running on http://{} in {:?} mode", addr, app_env);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server closed");
    Ok(())
}

fn spawn_rate_limit_cleanup(state: AppState, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let tracked = {
                let mut limiter = state.rate_limiter.lock();
                limiter.cleanup_old_entries();
                limiter.tracked_clients()
            };
            tracing::debug!("Rate limiter tracking {} clients", tracked);
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, closing server");
}
