pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod import;

pub use db::DbPool;

use api::jwt::JwtService;
use config::Config;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let jwt = JwtService::from_config(&config.auth);
        Self { config, db, jwt }
    }
}
