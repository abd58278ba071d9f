//! # Thera Common Library
//!
//! Shared code for Thera services including:
//! - Database initialization and schema migrations
//! - Configuration loading
//! - Timestamp and identifier helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
