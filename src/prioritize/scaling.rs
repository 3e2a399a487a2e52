//! Rescaling of heterogeneous criteria onto a common [0, 1] scale.

use crate::activity::midranks;

/// Percentile rank `rank / max(rank)` with ties averaged, over the finite values.
///
/// Results lie in (0, 1] and the largest value maps to 1, tied or not.
/// Missing or non-finite inputs stay `None`.
pub fn percentile_rank(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| x.is_finite()).map(|x| (i, x)))
        .collect();
    let mut out = vec![None; values.len()];
    if present.is_empty() {
        return out;
    }
    let raw: Vec<f64> = present.iter().map(|&(_, x)| x).collect();
    let ranks = midranks(&raw);
    let top = ranks.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    for ((i, _), rank) in present.iter().zip(ranks) {
        out[*i] = Some(rank / top);
    }
    out
}

/// Min-max scaling to [0, 1] over the finite values.
///
/// With zero range every value maps to 1 when positive and 0 otherwise.
pub fn min_max_scale(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let finite = values.iter().flatten().copied().filter(|x| x.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
        (lo.min(x), hi.max(x))
    });
    values
        .iter()
        .map(|v| {
            let x = v.filter(|x| x.is_finite())?;
            Some(if max > min {
                (x - min) / (max - min)
            } else if x > 0.0 {
                1.0
            } else {
                0.0
            })
        })
        .collect()
}

/// Signed significance `-log10(p) * sign(logFC)`, `None` when either is missing.
pub fn signed_significance(logfc: Option<f64>, p_val: Option<f64>) -> Option<f64> {
    let (lfc, p) = (logfc?, p_val?);
    if !lfc.is_finite() || !p.is_finite() {
        return None;
    }
    let sign = if lfc > 0.0 {
        1.0
    } else if lfc < 0.0 {
        -1.0
    } else {
        0.0
    };
    Some(-p.max(f64::MIN_POSITIVE).log10() * sign)
}

/// Mean of the present values, `None` when none is present.
pub fn mean_present(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    (!present.is_empty()).then(|| present.iter().sum::<f64>() / present.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_percentile_rank_ties_and_missing() {
        let r = percentile_rank(&[Some(1.0), None, Some(3.0), Some(1.0), Some(f64::NAN)]);
        assert_eq!(r[1], None);
        assert_eq!(r[4], None);
        assert_relative_eq!(r[0].unwrap(), 1.5 / 3.0);
        assert_relative_eq!(r[3].unwrap(), 1.5 / 3.0);
        assert_relative_eq!(r[2].unwrap(), 1.0);
    }

    #[test]
    fn test_percentile_rank_tied_maximum_is_one() {
        let r = percentile_rank(&[Some(0.3), Some(0.9), Some(0.9)]);
        assert_relative_eq!(r[0].unwrap(), 1.0 / 2.5);
        assert_relative_eq!(r[1].unwrap(), 1.0);
        assert_relative_eq!(r[2].unwrap(), 1.0);
        assert_eq!(percentile_rank(&[Some(1.0); 4]), vec![Some(1.0); 4]);
    }

    #[test]
    fn test_min_max_scale() {
        let s = min_max_scale(&[Some(2.0), Some(4.0), None, Some(3.0)]);
        assert_eq!(s, vec![Some(0.0), Some(1.0), None, Some(0.5)]);
        assert_eq!(min_max_scale(&[Some(2.0), Some(2.0)]), vec![Some(1.0), Some(1.0)]);
        assert_eq!(min_max_scale(&[Some(0.0)]), vec![Some(0.0)]);
    }

    #[test]
    fn test_signed_significance() {
        assert_relative_eq!(signed_significance(Some(2.0), Some(0.001)).unwrap(), 3.0);
        assert_relative_eq!(signed_significance(Some(-1.0), Some(0.01)).unwrap(), -2.0);
        assert_eq!(signed_significance(None, Some(0.01)), None);
        assert!(signed_significance(Some(1.0), Some(0.0)).unwrap().is_finite());
    }

    proptest! {
        #[test]
        fn prop_percentile_rank_bounded(values in proptest::collection::vec(-1e6f64..1e6, 1..60)) {
            let input: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
            let ranks = percentile_rank(&input);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            for (v, r) in values.iter().zip(&ranks) {
                let r = r.unwrap();
                prop_assert!(r > 0.0 && r <= 1.0);
                if *v == max {
                    prop_assert!((r - 1.0).abs() < 1e-12);
                }
            }
        }

        #[test]
        fn prop_min_max_bounded(values in proptest::collection::vec(-1e3f64..1e3, 1..40)) {
            let input: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
            for s in min_max_scale(&input).into_iter().flatten() {
                prop_assert!((0.0..=1.0).contains(&s));
            }
        }
    }
}
