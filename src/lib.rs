pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod session;
pub mod state;

pub use app::App;
pub use config::{load_config, Config};
pub use error::AppError;
