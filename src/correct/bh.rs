//! Benjamini-Hochberg false discovery rate correction.

/// Apply Benjamini-Hochberg FDR correction.
///
/// For each p-value the adjusted value is
/// `q[i] = min(p[i] * n / rank[i], q[i+1])`, capped at 1.
/// Non-finite p-values are left as NaN and do not count towards `n`.
pub fn correct_bh(p_values: &[f64]) -> Vec<f64> {
    let mut q_values = vec![f64::NAN; p_values.len()];

    let mut indices: Vec<usize> = (0..p_values.len())
        .filter(|&i| p_values[i].is_finite())
        .collect();
    let n = indices.len();
    if n == 0 {
        return q_values;
    }
    indices.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let n_f64 = n as f64;
    let mut running = 1.0f64;
    for (i, &orig_idx) in indices.iter().enumerate().rev() {
        let rank = (i + 1) as f64;
        running = running.min(p_values[orig_idx] * n_f64 / rank);
        q_values[orig_idx] = running.min(1.0);
    }
    q_values
}

/// Number of adjusted p-values below `alpha`.
pub fn n_significant(q_values: &[f64], alpha: f64) -> usize {
    q_values.iter().filter(|&&q| q < alpha).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bh_ordering() {
        let q = correct_bh(&[0.04, 0.01, 0.03, 0.005]);
        // 0.005 * 4 / 1
        assert_relative_eq!(q[3], 0.02, epsilon = 1e-10);
        // min(0.01 * 4 / 2, next)
        assert_relative_eq!(q[1], 0.02, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_known_values() {
        let q = correct_bh(&[0.005, 0.01, 0.02, 0.04, 0.1]);
        assert_relative_eq!(q[0], 0.025, epsilon = 1e-10);
        assert_relative_eq!(q[1], 0.025, epsilon = 1e-10);
        assert_relative_eq!(q[2], 1.0 / 30.0, epsilon = 1e-10);
        assert_relative_eq!(q[3], 0.05, epsilon = 1e-10);
        assert_relative_eq!(q[4], 0.1, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_bounded_and_monotone() {
        let p = [0.001, 0.01, 0.02, 0.05, 0.1, 0.5, 0.9];
        let q = correct_bh(&p);
        for w in q.windows(2) {
            assert!(w[0] <= w[1] + 1e-12);
        }
        assert!(q.iter().all(|&x| (0.0..=1.0).contains(&x)));
        for (pi, qi) in p.iter().zip(&q) {
            assert!(qi >= pi);
        }
    }

    #[test]
    fn test_bh_skips_nan() {
        let q = correct_bh(&[0.01, f64::NAN, 0.02]);
        assert!(q[1].is_nan());
        // n = 2, not 3
        assert_relative_eq!(q[0], 0.02, epsilon = 1e-10);
        assert_relative_eq!(q[2], 0.02, epsilon = 1e-10);
    }

    #[test]
    fn test_bh_empty_and_single() {
        assert!(correct_bh(&[]).is_empty());
        assert_relative_eq!(correct_bh(&[0.05])[0], 0.05);
    }

    #[test]
    fn test_n_significant() {
        let q = correct_bh(&[0.001, 0.01, 0.03, 0.1, 0.5]);
        assert!(n_significant(&q, 0.01) <= n_significant(&q, 0.05));
        assert!(n_significant(&q, 0.05) <= n_significant(&q, 0.10));
    }
}
