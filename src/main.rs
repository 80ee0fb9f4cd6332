use config::CONFIG;
use controller::create_router;
use crate::service::app_state::{create_app_state, create_state_router};

use cyder_tools::log::{error, info, LocalLogger};

mod config;
mod controller;
mod database;
mod schema;
mod service;
mod utils;

#[tokio::main]
async fn main() {
    LocalLogger::init(&CONFIG.log_level);

    let app_state = create_app_state(&CONFIG).unwrap_or_else(|e| {
        error!("failed to initialise application state: {}", e);
        std::process::exit(1);
    });

    let addr = format!("{}:{}", &CONFIG.host, CONFIG.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        error!("failed to bind {}: {}", addr, e);
        std::process::exit(1);
    });
    info!("server start at {}{}", &addr, &CONFIG.base_path);

    // axum refuses to nest at the root.
    let base_path = CONFIG.base_path.trim_end_matches('/');
    let app = if base_path.is_empty() {
        create_state_router().merge(create_router())
    } else {
        create_state_router().nest(base_path, create_router())
    };

    axum::serve(listener, app.with_state(app_state))
        .await
        .unwrap_or_else(|e| error!("server stopped: {}", e));
}
