pub mod analytics;
pub mod config;
pub mod db;
pub mod endpoints;
pub mod error;
pub mod experimentation;
pub mod observability;
pub mod session;
pub mod utils;
