pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
pub mod ws;

use std::sync::Arc;

use config::Config;
use services::access_resolver::AccessResolver;
use ws::RoomRegistry;

/// State shared by the API and the relay
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<RoomRegistry>,
    pub resolver: Arc<dyn AccessResolver>,
}

impl AppState {
    pub fn new(config: Config, resolver: Arc<dyn AccessResolver>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(RoomRegistry::new()),
            resolver,
        }
    }
}
