pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod market_data;
pub mod observability;
pub mod streaming;
pub mod types;
pub mod utils;

pub use error::{Error, Result};
