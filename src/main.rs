mod config;
mod detector;
mod errors;
mod handlers;
mod models;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;

use crate::config::Config;
use crate::detector::{Detector, YoloDetector};
use crate::handlers::TargetLabel;

/// Any origin, method and header, with credentials allowed.
fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
}

fn setup_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    setup_logging();
    config.validate()?;

    tracing::info!(config = ?config, "Loaded configuration");

    let detector = match YoloDetector::load(&config.model, &config.yolo_options()) {
        Ok(detector) => detector,
        Err(e) => {
            let path = config.model.display();
            tracing::error!(%path, error = %e, "Failed to load model");
            return Err(e.context(format!("loading {path}")));
        }
    };
    let detector: Arc<dyn Detector> = Arc::new(detector);
    let detector = web::Data::from(detector);
    let target = web::Data::new(TargetLabel(config.target_label.clone()));

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors())
            .app_data(detector.clone())
            .app_data(target.clone())
            .configure(handlers::configure)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    tracing::info!("Server running at http://{}", config.bind);
    server.bind(&config.bind)?.run().await?;

    Ok(())
}
