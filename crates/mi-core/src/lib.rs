//! # mi-core
//!
//! Core types for pooling test statistics across multiply imputed datasets.
//!
//! This crate holds the data model (fit collections, per-imputation test
//! records, pooled results) and the collaborator traits the pooling engine
//! is injected with. It contains no pooling algorithms: `mi-pool` depends
//! on the `FitEngine` trait defined here, never on a concrete fitting
//! implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
