pub mod config;
pub mod error;
pub mod hooks;
pub mod store_factory;
