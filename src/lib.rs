pub mod adapters;
pub mod backtester;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod lifecycle;
pub mod manager;
pub mod models;
pub mod performance;
pub mod ports;
pub(crate) mod retry;
pub mod risk;
pub mod scheduler;
pub mod scoring;
pub mod signals;
pub mod sizing;
pub mod state;
pub mod weights;
