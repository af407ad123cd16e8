//! Third-party food data sources.
//!
//! # Data Sources
//!
//! - [`boohee`]: Boohee food database (search, barcode, details, nutrients)

pub mod boohee;

pub use boohee::BooheeClient;
