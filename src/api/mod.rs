// Portfolio API module
// Author: kelexine (https://github.com/kelexine)

pub mod models;
mod portfolio;

pub use models::{Document, Estate, EstateInput, Plot};
pub use portfolio::{PortfolioApi, PortfolioCacheStats};
