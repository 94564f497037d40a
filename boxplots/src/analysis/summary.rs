/// Box statistics for the replicate values of one category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionSummary {
    pub count: usize,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    /// Furthest value not below `q1 - 1.5 * IQR`.
    pub lower_whisker: f64,
    /// Furthest value not above `q3 + 1.5 * IQR`.
    pub upper_whisker: f64,
}

/// Quantile with linear interpolation between order statistics; `sorted` must be ascending.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let pos = (n as f64 - 1.0) * p;
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    if idx + 1 < n {
        sorted[idx] * (1.0 - frac) + sorted[idx + 1] * frac
    } else {
        sorted[idx]
    }
}

/// Returns `None` for an empty sample.
pub fn summarize(values: &[f64]) -> Option<ConditionSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let reach = 1.5 * (q3 - q1);
    let lower_whisker = sorted
        .iter()
        .copied()
        .find(|&v| v >= q1 - reach)
        .unwrap_or(sorted[0]);
    let upper_whisker = sorted
        .iter()
        .rev()
        .copied()
        .find(|&v| v <= q3 + reach)
        .unwrap_or(sorted[sorted.len() - 1]);

    Some(ConditionSummary {
        count: sorted.len(),
        min: sorted[0],
        q1,
        median: quantile(&sorted, 0.5),
        q3,
        max: sorted[sorted.len() - 1],
        lower_whisker,
        upper_whisker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_replicates() {
        let s = summarize(&[7.0, 5.0, 6.0]).unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.min, 5.0);
        assert_eq!(s.q1, 5.5);
        assert_eq!(s.median, 6.0);
        assert_eq!(s.q3, 6.5);
        assert_eq!(s.max, 7.0);
        assert_eq!(s.lower_whisker, 5.0);
        assert_eq!(s.upper_whisker, 7.0);
    }

    #[test]
    fn whiskers_stop_at_outliers() {
        let s = summarize(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(s.median, 3.0);
        assert_eq!(s.q1, 2.0);
        assert_eq!(s.q3, 4.0);
        assert_eq!(s.upper_whisker, 4.0);
        assert_eq!(s.max, 100.0);
    }

    #[test]
    fn single_and_empty() {
        let s = summarize(&[4.2]).unwrap();
        assert_eq!((s.min, s.median, s.max), (4.2, 4.2, 4.2));
        assert!(summarize(&[]).is_none());
    }
}
