mod config;
mod inference;
mod middleware;
mod routes;
mod storage;

use std::env;
use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use config::AppConfig;
use inference::model::ModelCache;
use inference::predictor::Predictor;
use middleware::body_limit::BodyLimit;
use routes::configure_routes;
use storage::upload_store::UploadStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let default_filter = if config.debug { "debug" } else { "info" };
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let store = UploadStore::new(&config.upload_dir, config.max_body_bytes);
    store.ensure_dir().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Cannot create upload directory {}: {}", config.upload_dir.display(), e),
        )
    })?;
    log::info!("Storing uploads in {}", store.upload_dir().display());

    let models = Arc::new(ModelCache::new(&config.weights_path));
    match models.get() {
        Ok(model) if model.weights_loaded() => log::info!("Classifier ready"),
        Ok(_) => log::warn!("Classifier ready without trained weights; predictions are not meaningful"),
        Err(e) => {
            log::error!("Failed to preload model at startup: {:?}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Model loading failed: {:?}", e),
            ));
        }
    }
    let predictor = Predictor::new(models);

    let bind_address = config.bind_address();
    let max_body_bytes = config.max_body_bytes;
    let upload_dir = config.upload_dir.clone();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(BodyLimit::new(max_body_bytes))
            .wrap(Logger::default())
            .app_data(web::Data::new(predictor.clone()))
            .app_data(web::Data::new(store.clone()))
            .configure(|cfg| configure_routes(cfg, upload_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
