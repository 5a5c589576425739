//! # mi-pool
//!
//! Pooling of likelihood-ratio tests across multiply imputed datasets.
//!
//! When a model is fit separately to each of `m` completed datasets, no
//! single per-dataset test statistic is authoritative. This crate combines
//! them into one F- or chi-squared-distributed statistic with adjusted
//! degrees of freedom:
//!
//! - **D2** (statistic pooling): Li, Meng, Raghunathan & Rubin (1991) —
//!   pools already-computed per-imputation statistics.
//! - **D3** (likelihood pooling): Meng & Rubin (1992) — re-evaluates
//!   log-likelihoods at cross-imputation pooled parameter estimates.
//!
//! Model fitting is injected through `mi_core::traits::FitEngine`; the
//! crate fits nothing itself.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Orchestration: validation, canonical model ordering, method dispatch.
pub mod compare;
/// Reconciliation of per-imputation convergence flags.
pub mod convergence;
/// Statistic pooling ("D2").
pub mod d2;
/// Likelihood pooling ("D3").
pub mod d3;
/// Upper-tail probabilities of the reference distributions.
pub mod dist;
/// Robust rescaling of a pooled naive statistic.
pub mod robust;

pub use compare::{pool_comparison, pool_single, PoolMethod, PoolOptions};
pub use d2::{pool_d2, pool_d2_outcomes, D2Pooled, RefitOutcome};
pub use d3::{pool_d3, D3Pooled};
