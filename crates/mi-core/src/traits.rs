//! Collaborator traits for the pooling engine.
//!
//! The pooling engine never fits a model itself. Everything it needs from
//! the fitting side is expressed as the `FitEngine` capability, so the
//! engine can be exercised with synthetic stand-ins that return controlled
//! log-likelihoods and statistics.

use crate::types::ParameterTable;
use crate::Result;

/// Model evaluation/refit capability required from the external fitting
/// engine.
///
/// Per-imputation evaluations may run in parallel, hence the `Send + Sync`
/// bounds on the engine and its dataset handle.
pub trait FitEngine: Send + Sync {
    /// Handle to one completed dataset.
    type Dataset: Send + Sync;

    /// Evaluate the log-likelihood of a fully specified parameter table
    /// against one completed dataset. No optimization is performed; every
    /// parameter in `table` is treated as fixed at its estimate.
    fn loglik(&self, table: &ParameterTable, data: &Self::Dataset) -> Result<f64>;

    /// Fit the unrestricted (saturated) counterpart of the model to one
    /// dataset, returning its parameter table with estimates filled in.
    fn unrestricted_table(&self, data: &Self::Dataset) -> Result<ParameterTable>;

    /// Robustness-corrected difference test between two nested parameter
    /// tables on one dataset. Returns the scaled difference statistic and
    /// its degrees of freedom.
    fn difference_test(
        &self,
        table0: &ParameterTable,
        table1: &ParameterTable,
        data: &Self::Dataset,
    ) -> Result<(f64, f64)>;
}
