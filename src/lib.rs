pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod indexer;
pub mod matcher;
pub mod mediadb;
mod metrics;
pub mod search;
pub mod segment;
mod server;
pub mod utils;

pub use config::Opts;
pub use mediadb::{MediaDB, MediaDBBuilder};
