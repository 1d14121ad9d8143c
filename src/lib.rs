pub mod admin;
pub mod circuit_breaker;
pub mod config;
pub mod delivery_engine;
pub mod domain;
pub mod error;
pub mod providers;
pub mod queue;
pub mod status_store;
pub mod template;
