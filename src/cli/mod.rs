// CLI module for estate-client
// Author: kelexine (https://github.com/kelexine)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// estate-client - Caching REST client for the estate portfolio API
#[derive(Parser, Debug)]
#[command(name = "estate-client", version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to ~/.estate-client/config.toml)
    #[arg(long, global = true, env = "ESTATE_CLIENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// GET a path through the response cache and print the JSON body
    Get {
        /// Path relative to the API base URL
        path: String,
        /// Issue the request this many times to exercise the cache
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Override the cache TTL for this fetch, in milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,
        /// Retry transient failures with the configured retry policy
        #[arg(long)]
        retry: bool,
    },
    /// List estates, or show one with --id
    Estates {
        #[arg(long)]
        id: Option<String>,
    },
    /// List plots of an estate
    Plots {
        estate_id: String,
    },
    /// Upload a document as multipart form-data
    Upload {
        /// File to upload
        #[arg(long)]
        file: PathBuf,
        /// Attach the document to this estate
        #[arg(long)]
        estate_id: Option<String>,
    },
    /// Store the session token
    Login {
        #[arg(long, env = "ESTATE_CLIENT_TOKEN")]
        token: String,
    },
    /// Remove the stored session token
    Logout,
    /// Print the effective configuration as TOML
    Config,
}
