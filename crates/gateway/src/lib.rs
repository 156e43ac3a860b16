pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod seen;
pub mod server;
pub mod store;
pub mod ws;
