pub mod basket_repository;
pub mod config;
pub mod database;

pub use basket_repository::BasketRepository;
pub use config::DatabaseConfig;
pub use database::Database;
