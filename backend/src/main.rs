mod config;
mod error;
mod inference;
mod routes;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use config::ServiceConfig;
use error::StartupError;
use inference::model::Model;
use routes::{AppState, configure_routes};
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ServiceConfig::load()
        .map_err(StartupError::from)
        .map_err(startup_failure)?;
    log::info!("Resolved configuration: {:?}", config);

    let mut model = Model::new(&config.model, &config.preprocessing);
    log::info!("Loading model on {:?}", model.device());
    model.load().map_err(startup_failure)?;

    let state = web::Data::new(AppState::new(Arc::new(model), &config));
    let static_dir = config.server.static_dir.clone();
    if let Some(dir) = &static_dir {
        log::info!("Serving front-end from {}", dir.display());
    }

    let bind_address = (config.server.host.clone(), config.server.port);
    log::info!(
        "Starting server on {}:{} (fft preprocessing: {})",
        bind_address.0,
        bind_address.1,
        config.preprocessing.use_fft
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(|cfg| configure_routes(cfg, static_dir.clone()))
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(bind_address)?.run().await
}

fn startup_failure(err: StartupError) -> std::io::Error {
    log::error!("Failed to start: {}", err);
    std::io::Error::other(format!("startup failed: {}", err))
}
