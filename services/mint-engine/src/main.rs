use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;

use mint_engine::{
    config::Config, database::Database, handlers, propagation::HttpMintTransport, Mint,
};
use tracing::{error, info, Level};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting mint engine...");

    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    info!(
        "Configuration loaded: environment={} mint_host={}",
        config.environment, config.mint_host
    );

    let db = Arc::new(
        Database::open(
            &config.database.path,
            &config.environment,
            config.database.max_connections,
        )
        .await
        .expect("Failed to open store"),
    );

    let transport = Arc::new(HttpMintTransport::new(config.propagation.timeout_secs));
    let mint = Arc::new(Mint::new(config.clone(), db, transport));

    // Background worker draining the task queue: propagation retries, offer
    // mirroring and transaction expiration.
    let worker = mint.clone();
    tokio::spawn(async move {
        loop {
            match worker.run_one().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(Duration::from_millis(500)).await,
                Err(e) => {
                    error!("Task runner error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let server_config = config.server.clone();
    let mint_data = web::Data::new(mint);

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    HttpServer::new(move || {
        App::new()
            .app_data(mint_data.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(server_config.workers)
    .bind((server_config.host, server_config.port))?
    .run()
    .await
}
