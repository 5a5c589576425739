//! Reconciliation of per-imputation convergence flags.

use mi_core::types::Diagnostics;
use mi_core::{Error, Result};

/// Intersect per-imputation convergence flags into the usable set.
///
/// With a single sequence this is a pass-through copy. With two sequences
/// (one per model being compared) the result is the elementwise AND; a
/// disagreement between the models is reported as a warning and the
/// comparison proceeds on the common subset. An empty usable set is fatal.
pub fn usable_set(a: &[bool], b: Option<&[bool]>, diag: &mut Diagnostics) -> Result<Vec<bool>> {
    let merged: Vec<bool> = match b {
        None => a.to_vec(),
        Some(b) => {
            if a.len() != b.len() {
                return Err(Error::Validation(format!(
                    "convergence flag sequences differ in length: {} vs {}",
                    a.len(),
                    b.len()
                )));
            }
            if a != b {
                diag.warn(
                    "models converged on different imputations; \
                     comparison restricted to the common subset",
                );
            }
            a.iter().zip(b).map(|(&x, &y)| x && y).collect()
        }
    };
    if !merged.iter().any(|&c| c) {
        return Err(Error::Exhausted(
            "no imputation converged for every model under comparison".to_string(),
        ));
    }
    Ok(merged)
}

/// Number of usable imputations in a flag sequence.
pub fn usable_count(flags: &[bool]) -> usize {
    flags.iter().filter(|&&c| c).count()
}

/// Indices of the usable imputations, in imputation order.
pub fn usable_indices(flags: &[bool]) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| if c { Some(i) } else { None })
        .collect()
}
