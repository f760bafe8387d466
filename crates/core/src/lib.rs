pub mod agent;
pub mod analysis;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod keys;
pub mod logger;
pub mod platform;
pub mod screen;
pub mod script;
pub mod settings;
pub mod sleep;
pub mod types;
