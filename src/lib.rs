pub mod api;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod models;
pub mod shutdown;
pub mod utils;
pub mod wire;
