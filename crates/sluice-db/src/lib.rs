pub mod config;
pub mod config_store;
pub mod database;
pub mod document_repository;
pub mod rule_repository;
pub mod url_repository;

pub use config::DatabaseConfig;
pub use config_store::PgConfigStore;
pub use database::Database;
pub use document_repository::DocumentRepository;
pub use rule_repository::RuleRepository;
pub use url_repository::UrlRepository;
