//! Common data types for pooled test statistics.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reference-distribution family of the per-imputation test statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestFamily {
    /// Plain likelihood-ratio chi-squared.
    Standard,
    /// Mean-scaled chi-squared (one scaling factor per imputation).
    Scaled,
    /// Mean-and-variance adjusted chi-squared (scaling factor plus shift terms).
    ScaledShifted,
}

impl TestFamily {
    /// Whether this family carries a robustness correction.
    pub fn is_robust(self) -> bool {
        !matches!(self, TestFamily::Standard)
    }
}

/// Estimator/test options recorded by the fitting engine for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorOptions {
    /// Test-statistic family used by every per-imputation fit.
    pub test: TestFamily,
    /// Total sample size across groups.
    pub n_total: usize,
    /// Number of groups/clusters in the fitted structure.
    pub n_groups: usize,
}

/// Naive (uncorrected) test statistic for one imputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveStat {
    /// Statistic value.
    pub stat: f64,
    /// Degrees of freedom.
    pub df: f64,
}

/// Robustness-corrected test statistic for one imputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustStat {
    /// Corrected statistic value.
    pub stat: f64,
    /// Corrected degrees of freedom.
    pub df: f64,
    /// Scaling factor applied to the naive statistic.
    pub scaling_factor: f64,
    /// Shift parameters (empty unless the test is scaled-and-shifted).
    pub shift_parameters: Vec<f64>,
}

/// Per-imputation test record: always a naive statistic, plus the robust
/// variant when the estimator carries a scaling correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    /// Naive statistic.
    pub naive: NaiveStat,
    /// Robust statistic, when one was computed.
    pub robust: Option<RobustStat>,
}

/// Flat parameter table for one model: free/fixed status plus point estimates.
///
/// For a fitted collection the estimates are the cross-imputation pooled
/// point estimates of the free parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterTable {
    /// Parameter labels.
    pub names: Vec<String>,
    /// Free (true) vs fixed (false), per parameter.
    pub free: Vec<bool>,
    /// Point estimates (fixed values for fixed parameters).
    pub estimates: Vec<f64>,
    /// Number of equality constraints among the free parameters.
    pub n_constraints: usize,
}

impl ParameterTable {
    /// Number of independently estimated parameters: free minus
    /// equality-constrained.
    pub fn n_free(&self) -> usize {
        let free = self.free.iter().filter(|&&f| f).count();
        free.saturating_sub(self.n_constraints)
    }

    /// All-fixed copy of this table at its own estimates.
    ///
    /// This is the table handed to the engine when a model is re-evaluated
    /// (not re-optimized) against each imputation's dataset.
    pub fn fixed_at_estimates(&self) -> ParameterTable {
        ParameterTable {
            names: self.names.clone(),
            free: vec![false; self.free.len()],
            estimates: self.estimates.clone(),
            n_constraints: 0,
        }
    }

    /// All-fixed copy of this table at the given estimates.
    pub fn fixed_at(&self, estimates: &[f64]) -> Result<ParameterTable> {
        if estimates.len() != self.estimates.len() {
            return Err(Error::Validation(format!(
                "estimate vector length {} does not match table length {}",
                estimates.len(),
                self.estimates.len()
            )));
        }
        Ok(ParameterTable {
            names: self.names.clone(),
            free: vec![false; self.free.len()],
            estimates: estimates.to_vec(),
            n_constraints: 0,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.names.len() != self.free.len() || self.names.len() != self.estimates.len() {
            return Err(Error::Validation(format!(
                "parameter table columns misaligned: {} names, {} free flags, {} estimates",
                self.names.len(),
                self.free.len(),
                self.estimates.len()
            )));
        }
        Ok(())
    }
}

/// One model's fit results across all imputations.
///
/// Produced by the external fitting engine, read-only to the pooling
/// engine. All sequences are index-aligned to the imputations.
#[derive(Debug, Clone)]
pub struct FitCollection<D> {
    /// Per-imputation convergence flags.
    pub converged: Vec<bool>,
    /// Per-imputation test records.
    pub tests: Vec<TestRecord>,
    /// Per-imputation completed datasets.
    pub datasets: Vec<D>,
    /// Free/fixed structure and pooled point estimates.
    pub parameters: ParameterTable,
    /// Estimator and test options shared by all per-imputation fits.
    pub options: EstimatorOptions,
}

impl<D> FitCollection<D> {
    /// Number of imputations.
    pub fn m(&self) -> usize {
        self.tests.len()
    }

    /// Check index alignment across the per-imputation sequences.
    pub fn validate(&self) -> Result<()> {
        let m = self.tests.len();
        if m == 0 {
            return Err(Error::Validation("fit collection holds no imputations".to_string()));
        }
        if self.converged.len() != m || self.datasets.len() != m {
            return Err(Error::Validation(format!(
                "fit collection misaligned: {} tests, {} convergence flags, {} datasets",
                m,
                self.converged.len(),
                self.datasets.len()
            )));
        }
        self.parameters.validate()
    }
}

/// A pooled test statistic in one of its two output forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PooledStatistic {
    /// Asymptotic chi-squared form.
    ChiSquare {
        /// Pooled chi-squared value.
        chisq: f64,
        /// Degrees of freedom.
        df: f64,
        /// Upper-tail p-value.
        pvalue: f64,
    },
    /// Finite-sample F form.
    F {
        /// Pooled F value.
        f: f64,
        /// Numerator degrees of freedom.
        df1: f64,
        /// Denominator degrees of freedom (may be infinite).
        df2: f64,
        /// Upper-tail p-value.
        pvalue: f64,
    },
}

impl PooledStatistic {
    /// Upper-tail p-value of either form.
    pub fn pvalue(&self) -> f64 {
        match *self {
            PooledStatistic::ChiSquare { pvalue, .. } => pvalue,
            PooledStatistic::F { pvalue, .. } => pvalue,
        }
    }
}

/// Robustness-corrected pooled statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaledStatistic {
    /// Corrected chi-squared value.
    pub chisq: f64,
    /// Corrected degrees of freedom.
    pub df: f64,
    /// Upper-tail p-value.
    pub pvalue: f64,
    /// Scaling factor applied after pooling, when one was.
    pub scaling_factor: Option<f64>,
    /// Shift added after scaling, for scaled-and-shifted tests.
    pub shift_parameter: Option<f64>,
}

/// Information criteria reported for a single-model likelihood pooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationCriteria {
    /// Mean pooled log-likelihood of the model.
    pub logl: f64,
    /// Mean pooled log-likelihood of its unrestricted counterpart.
    pub unrestricted_logl: f64,
    /// Akaike information criterion.
    pub aic: f64,
    /// Bayesian information criterion.
    pub bic: f64,
    /// Sample-size-adjusted BIC.
    pub bic2: f64,
}

/// Structured channel for non-fatal conditions observed while pooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Human-readable warnings, in the order they occurred.
    pub warnings: Vec<String>,
    /// Imputations excluded by per-imputation refit/evaluation failures.
    pub excluded_imputations: usize,
}

impl Diagnostics {
    /// Record a warning and mirror it to the log.
    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("{msg}");
        self.warnings.push(msg);
    }
}

/// Output of one pooling invocation. Fresh per call, no persistent identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PooledResult {
    /// Pooled naive statistic in the requested form.
    pub statistic: PooledStatistic,
    /// Robustness-corrected statistic, when one applies.
    pub scaled: Option<ScaledStatistic>,
    /// Number of independently estimated parameters (single-model case).
    pub npar: Option<usize>,
    /// Total sample size (single-model case).
    pub ntotal: Option<usize>,
    /// Information criteria (single-model likelihood pooling only).
    pub fit: Option<InformationCriteria>,
    /// Non-fatal conditions observed while pooling.
    pub diagnostics: Diagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ParameterTable {
        ParameterTable {
            names: vec!["a".into(), "b".into(), "c".into()],
            free: vec![true, true, false],
            estimates: vec![0.5, -0.1, 1.0],
            n_constraints: 1,
        }
    }

    #[test]
    fn n_free_subtracts_equality_constraints() {
        assert_eq!(table().n_free(), 1);
    }

    #[test]
    fn fixed_at_estimates_freezes_everything() {
        let fixed = table().fixed_at_estimates();
        assert!(fixed.free.iter().all(|&f| !f));
        assert_eq!(fixed.estimates, vec![0.5, -0.1, 1.0]);
        assert_eq!(fixed.n_free(), 0);
    }

    #[test]
    fn fixed_at_rejects_wrong_length() {
        assert!(table().fixed_at(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn fit_collection_validate_catches_misalignment() {
        let fc = FitCollection {
            converged: vec![true, true],
            tests: vec![TestRecord {
                naive: NaiveStat { stat: 1.0, df: 2.0 },
                robust: None,
            }],
            datasets: vec![0usize],
            parameters: table(),
            options: EstimatorOptions {
                test: TestFamily::Standard,
                n_total: 100,
                n_groups: 1,
            },
        };
        assert!(fc.validate().is_err());
    }

    #[test]
    fn pooled_result_serializes() {
        let result = PooledResult {
            statistic: PooledStatistic::ChiSquare { chisq: 7.0, df: 4.0, pvalue: 0.135 },
            scaled: None,
            npar: Some(3),
            ntotal: Some(200),
            fit: None,
            diagnostics: Diagnostics::default(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: PooledResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.npar, Some(3));
        assert!((back.statistic.pvalue() - 0.135).abs() < 1e-15);
    }
}
