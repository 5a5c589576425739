//! Statistic pooling ("D2").
//!
//! Pools `m` per-imputation chi-squared statistics that share (nominally)
//! the same degrees of freedom into one F- or chi-squared-distributed
//! statistic, correcting for the between-imputation variability of the
//! statistic itself (Li, Meng, Raghunathan & Rubin 1991; closed form as in
//! Enders 2010, ch. 8).

use mi_core::types::{Diagnostics, PooledStatistic};
use mi_core::{Error, Result};

use crate::dist::{chisq_sf, f_sf};

/// Outcome of one per-imputation refit in the robust pooling variant.
///
/// A failed refit excludes its imputation from pooling; it does not abort
/// the run unless every imputation fails.
#[derive(Debug, Clone)]
pub enum RefitOutcome {
    /// Difference statistic and its degrees of freedom.
    Ok {
        /// Scaled difference statistic.
        stat: f64,
        /// Degrees of freedom of the difference test.
        df: f64,
    },
    /// The refit or difference test failed on this imputation.
    Failed(String),
}

/// Pooled D2 statistic plus the intermediates later stages need.
#[derive(Debug, Clone)]
pub struct D2Pooled {
    /// Pooled statistic in the requested output form.
    pub statistic: PooledStatistic,
    /// Average relative increase in variance.
    pub ariv: f64,
    /// Deflated statistic (the F value; `chisq = test_stat * df`).
    pub test_stat: f64,
    /// Reference degrees of freedom used for pooling.
    pub df: f64,
    /// Whether a negative pooled statistic was clamped to zero.
    pub clamped: bool,
}

/// Pool `m >= 1` per-imputation chi-squared statistics with reference
/// degrees of freedom `df` (a non-integer average is allowed when the
/// per-imputation df vary slightly).
///
/// Negative inputs are clamped to zero before pooling. The between-
/// imputation variability enters through the average relative increase in
/// variance, estimated from the square-root transformed statistics: the
/// sampling distribution of a chi-squared statistic is right-skewed and the
/// square root stabilizes its variance.
pub fn pool_d2(
    stats: &[f64],
    df: f64,
    asymptotic: bool,
    diag: &mut Diagnostics,
) -> Result<D2Pooled> {
    let m = stats.len();
    if m == 0 {
        return Err(Error::Exhausted("no per-imputation statistics to pool".to_string()));
    }
    if !df.is_finite() || df <= 0.0 {
        return Err(Error::Validation(format!(
            "reference degrees of freedom must be positive, got {df}"
        )));
    }
    for (l, &s) in stats.iter().enumerate() {
        if !s.is_finite() {
            return Err(Error::Validation(format!(
                "imputation {l}: non-finite test statistic {s}"
            )));
        }
    }

    let w: Vec<f64> = stats.iter().map(|&s| s.max(0.0)).collect();
    if stats.iter().any(|&s| s < 0.0) {
        diag.warn("negative per-imputation statistic clamped to zero before pooling");
    }

    let mf = m as f64;
    let w_bar = w.iter().sum::<f64>() / mf;

    let (ariv, raw) = if m == 1 {
        // A single imputation has no between-imputation variance to
        // estimate; pooling reduces to the input statistic.
        (0.0, w_bar / df)
    } else {
        let sq: Vec<f64> = w.iter().map(|x| x.sqrt()).collect();
        let sq_bar = sq.iter().sum::<f64>() / mf;
        let var = sq.iter().map(|x| (x - sq_bar).powi(2)).sum::<f64>() / (mf - 1.0);
        let ariv = (1.0 + 1.0 / mf) * var;
        // LMRR (1991): deflate the mean relative statistic and subtract the
        // excess between-imputation noise.
        let raw = (w_bar / df - (mf + 1.0) * ariv / (mf - 1.0)) / (1.0 + ariv);
        (ariv, raw)
    };

    let (test_stat, clamped) = clamp_nonnegative(raw, diag)?;

    let statistic = if asymptotic {
        let chisq = test_stat * df;
        PooledStatistic::ChiSquare { chisq, df, pvalue: chisq_sf(chisq, df) }
    } else {
        let df2 = d2_denominator_df(df, mf, ariv);
        PooledStatistic::F { f: test_stat, df1: df, df2, pvalue: f_sf(test_stat, df, df2) }
    };

    Ok(D2Pooled { statistic, ariv, test_stat, df, clamped })
}

/// Pool the tagged per-imputation outcomes of the robust pooling variant.
///
/// Failed imputations are excluded with a tracked count; pooling proceeds
/// over the remainder and fails only when nothing is left. The reference
/// degrees of freedom is the mean over the successful refits.
pub fn pool_d2_outcomes(
    outcomes: &[RefitOutcome],
    asymptotic: bool,
    diag: &mut Diagnostics,
) -> Result<D2Pooled> {
    let mut stats = Vec::with_capacity(outcomes.len());
    let mut dfs = Vec::with_capacity(outcomes.len());
    for (l, outcome) in outcomes.iter().enumerate() {
        match outcome {
            RefitOutcome::Ok { stat, df } => {
                stats.push(*stat);
                dfs.push(*df);
            }
            RefitOutcome::Failed(reason) => {
                diag.excluded_imputations += 1;
                diag.warn(format!("imputation {l} excluded from robust pooling: {reason}"));
            }
        }
    }
    if stats.is_empty() {
        return Err(Error::Exhausted(
            "robust difference test failed on every imputation".to_string(),
        ));
    }
    let df = dfs.iter().sum::<f64>() / dfs.len() as f64;
    pool_d2(&stats, df, asymptotic, diag)
}

/// LMRR denominator degrees of freedom for the F form.
///
/// Unbounded as `ariv -> 0`, recovering the asymptotic chi-squared form
/// (`f_sf` takes that limit explicitly).
fn d2_denominator_df(df: f64, mf: f64, ariv: f64) -> f64 {
    if ariv > 0.0 {
        df.powf(-3.0 / mf) * (mf - 1.0) * (1.0 + 1.0 / ariv).powi(2)
    } else {
        f64::INFINITY
    }
}

pub(crate) fn clamp_nonnegative(raw: f64, diag: &mut Diagnostics) -> Result<(f64, bool)> {
    if raw.is_nan() {
        return Err(Error::Computation(
            "pooled test statistic is undefined (not a number)".to_string(),
        ));
    }
    if raw < 0.0 {
        diag.warn(
            "pooled statistic was negative and has been set to zero; \
             the fit appears artificially perfect",
        );
        Ok((0.0, true))
    } else {
        Ok((raw, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_imputation_reduces_to_input() {
        let mut diag = Diagnostics::default();
        let pooled = pool_d2(&[8.5], 3.0, true, &mut diag).unwrap();
        assert_eq!(pooled.ariv, 0.0);
        match pooled.statistic {
            PooledStatistic::ChiSquare { chisq, df, pvalue } => {
                assert!((chisq - 8.5).abs() < 1e-12);
                assert_eq!(df, 3.0);
                assert!(pvalue > 0.0 && pvalue < 1.0);
            }
            _ => panic!("expected chi-squared form"),
        }
    }

    #[test]
    fn zero_variance_statistics_have_zero_ariv() {
        let mut diag = Diagnostics::default();
        let pooled = pool_d2(&[7.0; 5], 4.0, true, &mut diag).unwrap();
        assert_eq!(pooled.ariv, 0.0);
        assert!((pooled.test_stat - 1.75).abs() < 1e-12);
        match pooled.statistic {
            PooledStatistic::ChiSquare { chisq, df, .. } => {
                assert!((chisq - 7.0).abs() < 1e-12);
                assert_eq!(df, 4.0);
            }
            _ => panic!("expected chi-squared form"),
        }
    }

    #[test]
    fn hand_computed_ariv_and_deflation() {
        // stats [4, 9, 16] -> sqrt [2, 3, 4]: mean 3, sample variance 1.
        // ariv = (1 + 1/3) * 1 = 4/3.
        // w_bar = 29/3, df = 2:
        // test_stat = (29/6 - 4*(4/3)/2) / (1 + 4/3) = 13/14.
        let mut diag = Diagnostics::default();
        let pooled = pool_d2(&[4.0, 9.0, 16.0], 2.0, true, &mut diag).unwrap();
        assert!((pooled.ariv - 4.0 / 3.0).abs() < 1e-12, "ariv = {}", pooled.ariv);
        assert!((pooled.test_stat - 13.0 / 14.0).abs() < 1e-12);
    }

    #[test]
    fn negative_pooled_statistic_is_clamped_with_unit_pvalue() {
        // Small mean, large spread: the excess-noise subtraction drives the
        // pooled statistic below zero.
        let mut diag = Diagnostics::default();
        let pooled = pool_d2(&[0.0, 0.0, 25.0], 10.0, true, &mut diag).unwrap();
        assert!(pooled.clamped);
        assert_eq!(pooled.test_stat, 0.0);
        match pooled.statistic {
            PooledStatistic::ChiSquare { chisq, pvalue, .. } => {
                assert_eq!(chisq, 0.0);
                assert_eq!(pvalue, 1.0);
            }
            _ => panic!("expected chi-squared form"),
        }
        assert!(!diag.warnings.is_empty());
    }

    #[test]
    fn negative_inputs_are_clamped_before_pooling() {
        let mut diag = Diagnostics::default();
        let pooled = pool_d2(&[-1e-9, 2.0], 1.0, true, &mut diag).unwrap();
        assert!(diag.warnings.iter().any(|w| w.contains("clamped")));
        assert!(pooled.test_stat.is_finite());
    }

    #[test]
    fn f_form_and_chisq_form_are_one_computation() {
        let stats = [4.0, 9.0, 16.0];
        let mut d1 = Diagnostics::default();
        let mut d2 = Diagnostics::default();
        let asym = pool_d2(&stats, 2.0, true, &mut d1).unwrap();
        let fform = pool_d2(&stats, 2.0, false, &mut d2).unwrap();
        let chisq = match asym.statistic {
            PooledStatistic::ChiSquare { chisq, .. } => chisq,
            _ => unreachable!(),
        };
        match fform.statistic {
            PooledStatistic::F { f, df1, df2, pvalue } => {
                assert!((f * df1 - chisq).abs() < 1e-12);
                assert!(df2.is_finite() && df2 > 0.0);
                assert!(pvalue > 0.0 && pvalue < 1.0);
            }
            _ => panic!("expected F form"),
        }
    }

    #[test]
    fn zero_ariv_f_form_matches_chisq_tail() {
        let mut diag = Diagnostics::default();
        let fform = pool_d2(&[7.0; 5], 4.0, false, &mut diag).unwrap();
        match fform.statistic {
            PooledStatistic::F { df2, pvalue, .. } => {
                assert!(df2.is_infinite());
                assert!((pvalue - chisq_sf(7.0, 4.0)).abs() < 1e-12);
            }
            _ => panic!("expected F form"),
        }
    }

    #[test]
    fn outcomes_exclude_failures_and_count_them() {
        let outcomes = vec![
            RefitOutcome::Ok { stat: 6.0, df: 2.0 },
            RefitOutcome::Failed("refit did not converge".to_string()),
            RefitOutcome::Ok { stat: 6.0, df: 2.0 },
        ];
        let mut diag = Diagnostics::default();
        let pooled = pool_d2_outcomes(&outcomes, true, &mut diag).unwrap();
        assert_eq!(diag.excluded_imputations, 1);
        assert_eq!(pooled.df, 2.0);
        assert!((pooled.test_stat - 3.0).abs() < 1e-12);
    }

    #[test]
    fn outcomes_average_slightly_varying_df() {
        let outcomes = vec![
            RefitOutcome::Ok { stat: 5.0, df: 2.0 },
            RefitOutcome::Ok { stat: 5.0, df: 3.0 },
        ];
        let mut diag = Diagnostics::default();
        let pooled = pool_d2_outcomes(&outcomes, true, &mut diag).unwrap();
        assert!((pooled.df - 2.5).abs() < 1e-12);
    }

    #[test]
    fn all_failed_outcomes_is_fatal() {
        let outcomes = vec![
            RefitOutcome::Failed("a".to_string()),
            RefitOutcome::Failed("b".to_string()),
        ];
        let mut diag = Diagnostics::default();
        let err = pool_d2_outcomes(&outcomes, true, &mut diag).unwrap_err();
        assert!(matches!(err, Error::Exhausted(_)));
        assert_eq!(diag.excluded_imputations, 2);
    }

    #[test]
    fn empty_input_is_fatal() {
        let mut diag = Diagnostics::default();
        assert!(pool_d2(&[], 2.0, true, &mut diag).is_err());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let mut diag = Diagnostics::default();
        assert!(pool_d2(&[1.0, f64::NAN], 2.0, true, &mut diag).is_err());
    }
}
