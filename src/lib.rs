// estate-client - Caching REST client for the estate portfolio API
// Author: kelexine (https://github.com/kelexine)

pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;
