pub mod client;
pub mod config;
pub mod database;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use utils::error::RelayError;
