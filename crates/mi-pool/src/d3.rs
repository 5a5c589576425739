//! Likelihood pooling ("D3").
//!
//! Pools `m` likelihood-ratio tests by re-evaluating each model's
//! log-likelihood at the cross-imputation pooled parameter estimates
//! (Meng & Rubin 1992). The per-imputation evaluations go through the
//! injected `FitEngine` and run in parallel; a failing evaluation excludes
//! its imputation rather than aborting the run.

use mi_core::traits::FitEngine;
use mi_core::types::{Diagnostics, FitCollection, ParameterTable, PooledStatistic};
use mi_core::{Error, Result};
use rayon::prelude::*;

use crate::convergence::usable_indices;
use crate::d2::clamp_nonnegative;
use crate::dist::{chisq_sf, f_sf};

/// Pooled D3 statistic plus the intermediates later stages need.
#[derive(Debug, Clone)]
pub struct D3Pooled {
    /// Pooled statistic in the requested output form.
    pub statistic: PooledStatistic,
    /// Average relative increase in variance.
    pub ariv: f64,
    /// Deflated statistic (the F value; `chisq = test_stat * df`).
    pub test_stat: f64,
    /// Degrees of freedom of the comparison.
    pub df: f64,
    /// Whether a negative pooled statistic was clamped to zero.
    pub clamped: bool,
    /// Mean pooled log-likelihood of the constrained model.
    pub mean_ll0: f64,
    /// Mean pooled log-likelihood of the comparison (or saturated) model.
    pub mean_ll1: f64,
    /// Imputations that entered the final aggregation.
    pub m_used: usize,
}

/// Pool likelihood-ratio tests at pooled parameter estimates.
///
/// With an explicit `fit1` the constrained model `fit0` is compared against
/// it; the caller is responsible for having canonicalized the order so that
/// `fit0` carries the larger test degrees of freedom. Without `fit1` the
/// model is compared against its saturated counterpart, fit per imputation
/// and averaged.
pub fn pool_d3<E: FitEngine>(
    engine: &E,
    fit0: &FitCollection<E::Dataset>,
    fit1: Option<&FitCollection<E::Dataset>>,
    usable: &[bool],
    asymptotic: bool,
    diag: &mut Diagnostics,
) -> Result<D3Pooled> {
    let indices = usable_indices(usable);
    let first = *indices.first().ok_or_else(|| {
        Error::Exhausted("no usable imputations for likelihood pooling".to_string())
    })?;

    // Degrees of freedom come from one usable imputation's naive record per
    // model, not an average; the difference must be strictly positive.
    let df0 = fit0.tests[first].naive.df;
    let df = match fit1 {
        Some(f1) => {
            let df1 = f1.tests[first].naive.df;
            let d = df0 - df1;
            if d <= 0.0 {
                return Err(Error::Validation(format!(
                    "comparison model is not properly nested: \
                     degrees-of-freedom difference {df0} - {df1} = {d} is not positive"
                )));
            }
            d
        }
        None => df0,
    };
    if !df.is_finite() || df <= 0.0 {
        return Err(Error::Validation(format!(
            "test degrees of freedom must be positive, got {df}"
        )));
    }

    let table0 = fit0.parameters.fixed_at_estimates();
    let (table1, eval_indices) = match fit1 {
        Some(f1) => (f1.parameters.fixed_at_estimates(), indices),
        None => saturated_table(engine, fit0, &indices, diag)?,
    };

    // Evaluate both models against each included imputation's dataset.
    let evals: Vec<(usize, Result<(f64, f64)>)> = eval_indices
        .par_iter()
        .map(|&i| {
            let r = engine.loglik(&table0, &fit0.datasets[i]).and_then(|ll0| {
                let data1 = match fit1 {
                    Some(f1) => &f1.datasets[i],
                    None => &fit0.datasets[i],
                };
                engine.loglik(&table1, data1).map(|ll1| (ll0, ll1))
            });
            (i, r)
        })
        .collect();

    let mut ll0 = Vec::with_capacity(evals.len());
    let mut ll1 = Vec::with_capacity(evals.len());
    let mut naive = Vec::with_capacity(evals.len());
    for (i, eval) in evals {
        match eval {
            Ok((a, b)) => {
                ll0.push(a);
                ll1.push(b);
                naive.push(match fit1 {
                    Some(f1) => fit0.tests[i].naive.stat - f1.tests[i].naive.stat,
                    None => fit0.tests[i].naive.stat,
                });
            }
            Err(e) => {
                diag.excluded_imputations += 1;
                diag.warn(format!("imputation {i} excluded from likelihood pooling: {e}"));
            }
        }
    }
    if ll0.is_empty() {
        return Err(Error::Exhausted(
            "model evaluation failed on every usable imputation".to_string(),
        ));
    }

    let m = ll0.len();
    let mf = m as f64;
    let lrt_pooled =
        ll0.iter().zip(&ll1).map(|(a, b)| -2.0 * (a - b)).sum::<f64>() / mf;
    let lrt_bar = naive.iter().sum::<f64>() / mf;

    log::debug!("D3: m={m} df={df} lrt_pooled={lrt_pooled} lrt_bar={lrt_bar}");

    let ariv = if m == 1 {
        // No between-imputation variance to estimate.
        0.0
    } else {
        let a = df * (mf - 1.0);
        ((mf + 1.0) / a) * (lrt_bar - lrt_pooled)
    };

    let raw = lrt_pooled / (df * (1.0 + ariv));
    if !raw.is_finite() {
        return Err(Error::Computation(
            "pooled likelihood-ratio statistic is undefined (often caused by a \
             non-positive-definite model-implied covariance); the statistic-pooling \
             method (D2) may work where likelihood pooling does not"
                .to_string(),
        ));
    }
    let (test_stat, clamped) = clamp_nonnegative(raw, diag)?;

    let statistic = if asymptotic {
        let chisq = test_stat * df;
        PooledStatistic::ChiSquare { chisq, df, pvalue: chisq_sf(chisq, df) }
    } else {
        let df2 = d3_denominator_df(df, mf, ariv);
        PooledStatistic::F { f: test_stat, df1: df, df2, pvalue: f_sf(test_stat, df, df2) }
    };

    Ok(D3Pooled {
        statistic,
        ariv,
        test_stat,
        df,
        clamped,
        mean_ll0: ll0.iter().sum::<f64>() / mf,
        mean_ll1: ll1.iter().sum::<f64>() / mf,
        m_used: m,
    })
}

/// Meng & Rubin denominator degrees of freedom for the F form.
///
/// The `a <= 4` branch avoids degeneracy when few imputations are available
/// relative to the degrees of freedom under test. Unbounded as `ariv -> 0`,
/// recovering the asymptotic chi-squared form.
fn d3_denominator_df(df: f64, mf: f64, ariv: f64) -> f64 {
    if ariv == 0.0 {
        return f64::INFINITY;
    }
    let a = df * (mf - 1.0);
    if a > 4.0 {
        4.0 + (a - 4.0) * (1.0 + (1.0 - 2.0 / a) / ariv).powi(2)
    } else {
        a * (1.0 + 1.0 / df) * (1.0 + 1.0 / ariv).powi(2) / 2.0
    }
}

/// Fit the saturated counterpart to each included imputation, average its
/// estimates, and return the all-fixed table plus the imputations that
/// survived (a failed unrestricted fit excludes its imputation).
fn saturated_table<E: FitEngine>(
    engine: &E,
    fit0: &FitCollection<E::Dataset>,
    indices: &[usize],
    diag: &mut Diagnostics,
) -> Result<(ParameterTable, Vec<usize>)> {
    let fits: Vec<(usize, Result<ParameterTable>)> = indices
        .par_iter()
        .map(|&i| (i, engine.unrestricted_table(&fit0.datasets[i])))
        .collect();

    let mut kept = Vec::with_capacity(fits.len());
    let mut tables = Vec::with_capacity(fits.len());
    for (i, fit) in fits {
        match fit {
            Ok(t) => {
                tables.push(t);
                kept.push(i);
            }
            Err(e) => {
                diag.excluded_imputations += 1;
                diag.warn(format!("imputation {i} excluded: unrestricted fit failed: {e}"));
            }
        }
    }
    let template = tables.first().ok_or_else(|| {
        Error::Exhausted("unrestricted fit failed on every usable imputation".to_string())
    })?;

    let len = template.estimates.len();
    if tables.iter().any(|t| t.estimates.len() != len) {
        return Err(Error::Validation(
            "unrestricted parameter tables differ in shape across imputations".to_string(),
        ));
    }
    let mut pooled = vec![0.0; len];
    for t in &tables {
        for (sum, e) in pooled.iter_mut().zip(&t.estimates) {
            *sum += e;
        }
    }
    let mf = tables.len() as f64;
    for sum in pooled.iter_mut() {
        *sum /= mf;
    }
    let table = template.fixed_at(&pooled)?;
    Ok((table, kept))
}
