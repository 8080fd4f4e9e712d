pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod matching;
pub mod models;
pub mod notify;
pub mod observability;
pub mod order;
pub mod pricing;
pub mod state;
