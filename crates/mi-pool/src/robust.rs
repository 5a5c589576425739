//! Robust rescaling of a pooled naive statistic.
//!
//! When the per-imputation tests carried a robustness correction (scaling,
//! or scaling plus shift) and the caller pooled the naive statistic, the
//! pooled value is rescaled afterwards with the per-imputation correction
//! parameters averaged over the usable set.

use mi_core::types::{Diagnostics, FitCollection, RobustStat, ScaledStatistic, TestFamily};
use mi_core::{Error, Result};

use crate::convergence::usable_indices;
use crate::dist::chisq_sf;

/// Mean robust df, mean scaling factor and mean summed shift over the
/// usable imputations of one collection. `None` when no usable record
/// carries robust information.
fn robust_means<D>(fit: &FitCollection<D>, usable: &[bool]) -> Option<(f64, f64, f64)> {
    let records: Vec<&RobustStat> = usable_indices(usable)
        .into_iter()
        .filter_map(|i| fit.tests[i].robust.as_ref())
        .collect();
    if records.is_empty() {
        return None;
    }
    let n = records.len() as f64;
    let df = records.iter().map(|r| r.df).sum::<f64>() / n;
    let c = records.iter().map(|r| r.scaling_factor).sum::<f64>() / n;
    let shift = records.iter().map(|r| r.shift_parameters.iter().sum::<f64>()).sum::<f64>() / n;
    Some((df, c, shift))
}

/// Rescale a single model's pooled naive chi-squared statistic.
///
/// Returns `None` when the test family carries no correction, when no
/// usable record has robust information, or when the naive statistic was
/// clamped to zero (a correction of a meaningless base value would itself
/// be meaningless; a notice is emitted instead).
pub fn rescale_single<D>(
    fit: &FitCollection<D>,
    usable: &[bool],
    naive_chisq: f64,
    clamped: bool,
    diag: &mut Diagnostics,
) -> Result<Option<ScaledStatistic>> {
    if !fit.options.test.is_robust() {
        return Ok(None);
    }
    let Some((df, c, shift)) = robust_means(fit, usable) else {
        return Ok(None);
    };
    if clamped {
        diag.warn(
            "robust correction suppressed: the pooled naive statistic was clamped to zero",
        );
        return Ok(None);
    }
    if c == 0.0 {
        return Err(Error::Computation(
            "mean scaling factor is zero; robust correction is undefined".to_string(),
        ));
    }

    let mut chisq = naive_chisq / c;
    let shift_parameter = if fit.options.test == TestFamily::ScaledShifted {
        chisq += shift;
        Some(shift)
    } else {
        None
    };

    Ok(Some(ScaledStatistic {
        chisq,
        df,
        pvalue: chisq_sf(chisq, df),
        scaling_factor: Some(c),
        shift_parameter,
    }))
}

/// Rescale a two-model comparison's pooled naive chi-squared statistic.
///
/// The difference scaling factor combines each model's mean robust df and
/// mean scaling factor: `delta_c = (d0 c0 - d1 c1) / (d0 - d1)`. Shift
/// parameters are not combined across two models; for scaled-and-shifted
/// tests a notice records that the shift is ignored.
pub fn rescale_difference<D>(
    fit0: &FitCollection<D>,
    fit1: &FitCollection<D>,
    usable: &[bool],
    naive_chisq: f64,
    clamped: bool,
    diag: &mut Diagnostics,
) -> Result<Option<ScaledStatistic>> {
    if !fit0.options.test.is_robust() {
        return Ok(None);
    }
    let (Some((d0, c0, _)), Some((d1, c1, _))) =
        (robust_means(fit0, usable), robust_means(fit1, usable))
    else {
        return Ok(None);
    };
    if clamped {
        diag.warn(
            "robust correction suppressed: the pooled naive statistic was clamped to zero",
        );
        return Ok(None);
    }

    let df = d0 - d1;
    if df.abs() < f64::EPSILON {
        return Err(Error::Computation(
            "robust degrees of freedom coincide between models; \
             the difference scaling factor is undefined"
                .to_string(),
        ));
    }
    let delta_c = (d0 * c0 - d1 * c1) / df;
    if delta_c == 0.0 {
        return Err(Error::Computation(
            "difference scaling factor is zero; robust correction is undefined".to_string(),
        ));
    }
    if fit0.options.test == TestFamily::ScaledShifted {
        diag.warn(
            "shift parameters are not combined across two models; \
             the scaled difference test ignores them",
        );
    }

    let chisq = naive_chisq / delta_c;
    Ok(Some(ScaledStatistic {
        chisq,
        df,
        pvalue: chisq_sf(chisq, df),
        scaling_factor: Some(delta_c),
        shift_parameter: None,
    }))
}
