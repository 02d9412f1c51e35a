pub mod app_config;
pub mod database;
pub mod engine;
pub mod health;
pub mod observability;
pub mod scraper;
pub mod workflow;

pub use app_config::*;
pub use database::*;
pub use engine::*;
pub use health::*;
pub use observability::*;
pub use scraper::*;
pub use workflow::*;
