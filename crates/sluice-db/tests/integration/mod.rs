pub mod common;

mod config_store_tests;
mod document_tests;
mod rule_tests;
