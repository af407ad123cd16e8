//! ForHealth - nutrition data gateway.
//!
//! # Overview
//!
//! ForHealth keeps a local food catalogue and enriches it from the Boohee
//! food database. Calls to Boohee are signed, authenticated with cached
//! per-account tokens, and rotated across a pool of accounts when one runs
//! out of quota. Upstream nutrient data is normalized into a six-category
//! breakdown plus a flat summary, and aggregated across recipes and meals.
//!
//! # Modules
//!
//! - [`config`]: Environment-driven configuration
//! - [`error`]: External API error taxonomy
//! - [`model`]: Nutrition data types and HTTP bodies
//! - [`signature`]: Request signing
//! - [`rotation`]: Active account and token cache
//! - [`data_sources`]: Boohee API client
//! - [`nutrition`]: Normalization and scaling
//! - [`aggregation`]: Recipe, meal and daily totals
//! - [`barcode`]: Barcode resolution
//! - [`storage`]: SQLite storage layer
//! - [`catalog`]: Local catalogue combined with external lookups
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod barcode;
pub mod catalog;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod model;
pub mod nutrition;
pub mod rotation;
pub mod signature;
pub mod storage;
