//! Orchestration of a pooling run.
//!
//! Validates the input collections, reconciles convergence, canonicalizes
//! the model order for two-model comparisons, dispatches to the selected
//! pooling method and normalizes the output shape.

use mi_core::traits::FitEngine;
use mi_core::types::{
    Diagnostics, FitCollection, InformationCriteria, PooledResult, ScaledStatistic,
};
use mi_core::{Error, Result};
use rayon::prelude::*;

use crate::convergence::{usable_indices, usable_set};
use crate::d2::{pool_d2, pool_d2_outcomes, D2Pooled, RefitOutcome};
use crate::d3::pool_d3;
use crate::dist::chisq_sf;
use crate::robust::{rescale_difference, rescale_single};

/// Pooling method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMethod {
    /// Statistic pooling (Li, Meng, Raghunathan & Rubin 1991).
    D2,
    /// Likelihood pooling (Meng & Rubin 1992).
    D3,
}

impl PoolMethod {
    /// Normalize the user-facing method aliases.
    ///
    /// The second return value is true when the alias additionally forces
    /// the asymptotic output form (`"mplus"` emulation).
    pub fn parse(name: &str) -> Result<(PoolMethod, bool)> {
        match name.to_ascii_lowercase().as_str() {
            "d2" | "lmrr" | "li.et.al" | "pooled.wald" => Ok((PoolMethod::D2, false)),
            "d3" | "mr" | "meng.rubin" | "lrt" => Ok((PoolMethod::D3, false)),
            "mplus" => Ok((PoolMethod::D3, true)),
            other => Err(Error::Validation(format!("unknown pooling method {other:?}"))),
        }
    }
}

/// Options controlling one pooling invocation.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Pooling method.
    pub method: PoolMethod,
    /// Report the asymptotic chi-squared form instead of the F form.
    pub asymptotic: bool,
    /// Pool the robust statistic directly (D2) instead of pooling the
    /// naive statistic and rescaling afterwards.
    pub pool_robust: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions { method: PoolMethod::D3, asymptotic: false, pool_robust: false }
    }
}

impl PoolOptions {
    /// Set the method from a user-facing alias; `"mplus"` also forces the
    /// asymptotic output form.
    pub fn with_method_name(mut self, name: &str) -> Result<Self> {
        let (method, force_asymptotic) = PoolMethod::parse(name)?;
        self.method = method;
        self.asymptotic = self.asymptotic || force_asymptotic;
        Ok(self)
    }
}

/// Pool one model's test statistic across its imputations.
///
/// D2 pools the per-imputation naive statistics; D3 compares the model
/// against its saturated counterpart via the engine. Robust estimators get
/// either an after-the-fact rescaling or (with `pool_robust`) a direct
/// pooling of the robust statistics reported alongside the naive result.
pub fn pool_single<E: FitEngine>(
    engine: &E,
    fit: &FitCollection<E::Dataset>,
    opts: PoolOptions,
) -> Result<PooledResult> {
    fit.validate()?;
    let mut diag = Diagnostics::default();
    let usable = usable_set(&fit.converged, None, &mut diag)?;
    let indices = usable_indices(&usable);
    let method = resolve_method(opts, &mut diag);

    match method {
        PoolMethod::D2 => {
            let stats: Vec<f64> = indices.iter().map(|&i| fit.tests[i].naive.stat).collect();
            let df = indices.iter().map(|&i| fit.tests[i].naive.df).sum::<f64>()
                / indices.len() as f64;
            let pooled = pool_d2(&stats, df, opts.asymptotic, &mut diag)?;

            let scaled = if opts.pool_robust {
                pool_robust_single(fit, &indices, &mut diag)?
            } else {
                rescale_single(fit, &usable, pooled.test_stat * pooled.df, pooled.clamped, &mut diag)?
            };

            Ok(PooledResult {
                statistic: pooled.statistic,
                scaled,
                npar: Some(fit.parameters.n_free()),
                ntotal: Some(fit.options.n_total),
                fit: None,
                diagnostics: diag,
            })
        }
        PoolMethod::D3 => {
            let pooled = pool_d3(engine, fit, None, &usable, opts.asymptotic, &mut diag)?;
            let scaled = rescale_single(
                fit,
                &usable,
                pooled.test_stat * pooled.df,
                pooled.clamped,
                &mut diag,
            )?;

            let npar = fit.parameters.n_free();
            let n = fit.options.n_total as f64;
            let k = npar as f64;
            let criteria = InformationCriteria {
                logl: pooled.mean_ll0,
                unrestricted_logl: pooled.mean_ll1,
                aic: -2.0 * pooled.mean_ll0 + 2.0 * k,
                bic: -2.0 * pooled.mean_ll0 + n.ln() * k,
                bic2: -2.0 * pooled.mean_ll0 + ((n + 2.0) / 24.0).ln() * k,
            };

            Ok(PooledResult {
                statistic: pooled.statistic,
                scaled,
                npar: Some(npar),
                ntotal: Some(fit.options.n_total),
                fit: Some(criteria),
                diagnostics: diag,
            })
        }
    }
}

/// Pool a likelihood-ratio comparison of two nested models.
///
/// The models may be supplied in either order: the one with the larger
/// test degrees of freedom is treated as the constrained ("null") model.
/// Equal degrees of freedom is an input error, not a statistical result.
pub fn pool_comparison<E: FitEngine>(
    engine: &E,
    fit0: &FitCollection<E::Dataset>,
    fit1: &FitCollection<E::Dataset>,
    opts: PoolOptions,
) -> Result<PooledResult> {
    fit0.validate()?;
    fit1.validate()?;
    if fit0.m() != fit1.m() {
        return Err(Error::Validation(format!(
            "models were fit to different imputation sets: {} vs {}",
            fit0.m(),
            fit1.m()
        )));
    }
    if fit0.options.test != fit1.options.test {
        return Err(Error::Validation(
            "models were fit with different test families and cannot be compared".to_string(),
        ));
    }

    let mut diag = Diagnostics::default();
    let usable = usable_set(&fit0.converged, Some(&fit1.converged), &mut diag)?;
    let indices = usable_indices(&usable);
    let first = indices[0];

    // Canonicalization: the constrained model is the one with the larger
    // test degrees of freedom, whatever order the caller used.
    let df0 = fit0.tests[first].naive.df;
    let df1 = fit1.tests[first].naive.df;
    if df0 == df1 {
        return Err(Error::Validation(format!(
            "models have equal test degrees of freedom ({df0}); they are not nested"
        )));
    }
    let (fit0, fit1) = if df0 < df1 {
        diag.warn(
            "models supplied in reverse order; \
             treating the one with more degrees of freedom as the constrained model",
        );
        (fit1, fit0)
    } else {
        (fit0, fit1)
    };

    let method = resolve_method(opts, &mut diag);

    match method {
        PoolMethod::D2 => {
            let mut diffs: Vec<f64> = indices
                .iter()
                .map(|&i| fit0.tests[i].naive.stat - fit1.tests[i].naive.stat)
                .collect();
            let mut df = indices
                .iter()
                .map(|&i| fit0.tests[i].naive.df - fit1.tests[i].naive.df)
                .sum::<f64>()
                / indices.len() as f64;
            // The constrained/comparison assignment is nominal at this
            // point; a negative df difference just means the roles read the
            // other way around, so negate both sides.
            if df < 0.0 {
                df = -df;
                for d in diffs.iter_mut() {
                    *d = -*d;
                }
            }
            let pooled = pool_d2(&diffs, df, opts.asymptotic, &mut diag)?;

            let scaled = if opts.pool_robust {
                Some(pool_robust_difference(engine, fit0, fit1, &indices, &mut diag)?)
            } else {
                rescale_difference(
                    fit0,
                    fit1,
                    &usable,
                    pooled.test_stat * pooled.df,
                    pooled.clamped,
                    &mut diag,
                )?
            };

            Ok(PooledResult {
                statistic: pooled.statistic,
                scaled,
                npar: None,
                ntotal: None,
                fit: None,
                diagnostics: diag,
            })
        }
        PoolMethod::D3 => {
            let pooled =
                pool_d3(engine, fit0, Some(fit1), &usable, opts.asymptotic, &mut diag)?;
            let scaled = rescale_difference(
                fit0,
                fit1,
                &usable,
                pooled.test_stat * pooled.df,
                pooled.clamped,
                &mut diag,
            )?;

            Ok(PooledResult {
                statistic: pooled.statistic,
                scaled,
                npar: None,
                ntotal: None,
                fit: None,
                diagnostics: diag,
            })
        }
    }
}

/// Robust pooling is defined on statistics, not likelihoods; redirect D3
/// requests with a warning instead of erroring.
fn resolve_method(opts: PoolOptions, diag: &mut Diagnostics) -> PoolMethod {
    if opts.pool_robust && opts.method == PoolMethod::D3 {
        diag.warn(
            "robust pooling operates on per-imputation statistics; \
             using the statistic-pooling method (D2) instead of D3",
        );
        return PoolMethod::D2;
    }
    opts.method
}

/// Directly pool a single model's per-imputation robust statistics.
fn pool_robust_single<D>(
    fit: &FitCollection<D>,
    indices: &[usize],
    diag: &mut Diagnostics,
) -> Result<Option<ScaledStatistic>> {
    let robust: Vec<(f64, f64)> = indices
        .iter()
        .filter_map(|&i| fit.tests[i].robust.as_ref().map(|r| (r.stat, r.df)))
        .collect();
    if robust.is_empty() {
        diag.warn(
            "robust pooling requested but no per-imputation record carries \
             scaling information; returning the naive result only",
        );
        return Ok(None);
    }
    let stats: Vec<f64> = robust.iter().map(|&(s, _)| s).collect();
    let df = robust.iter().map(|&(_, d)| d).sum::<f64>() / robust.len() as f64;
    let pooled = pool_d2(&stats, df, true, diag)?;
    Ok(Some(as_scaled(&pooled)))
}

/// Re-derive and pool per-imputation robust difference tests between two
/// models through the engine callback. Failures exclude their imputation;
/// pooling fails only when every imputation fails.
fn pool_robust_difference<E: FitEngine>(
    engine: &E,
    fit0: &FitCollection<E::Dataset>,
    fit1: &FitCollection<E::Dataset>,
    indices: &[usize],
    diag: &mut Diagnostics,
) -> Result<ScaledStatistic> {
    let outcomes: Vec<RefitOutcome> = indices
        .par_iter()
        .map(|&i| {
            match engine.difference_test(&fit0.parameters, &fit1.parameters, &fit0.datasets[i]) {
                Ok((stat, df)) => RefitOutcome::Ok { stat, df },
                Err(e) => RefitOutcome::Failed(e.to_string()),
            }
        })
        .collect();
    let pooled = pool_d2_outcomes(&outcomes, true, diag)?;
    Ok(as_scaled(&pooled))
}

/// Scaled-designation view of a directly pooled robust statistic. There is
/// no after-the-fact scaling factor to report in this path.
fn as_scaled(pooled: &D2Pooled) -> ScaledStatistic {
    let chisq = pooled.test_stat * pooled.df;
    ScaledStatistic {
        chisq,
        df: pooled.df,
        pvalue: chisq_sf(chisq, pooled.df),
        scaling_factor: None,
        shift_parameter: None,
    }
}
