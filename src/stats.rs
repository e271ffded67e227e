//! Order statistics over depth samples.
//!
//! All functions take an ascending-sorted slice and return `None` when empty.

/// Linear-interpolated quantile, `q` in 0..=1.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q.clamp(0.0, 1.0) * last as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let t = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * t)
}

pub fn median(sorted: &[f64]) -> Option<f64> {
    quantile(sorted, 0.5)
}

pub fn interquartile_range(sorted: &[f64]) -> Option<f64> {
    Some(quantile(sorted, 0.75)? - quantile(sorted, 0.25)?)
}

/// Mean after dropping `floor(n * fraction)` samples from each end.
/// Falls back to the median when trimming would leave nothing.
pub fn trimmed_mean(sorted: &[f64], fraction: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let cut = (sorted.len() as f64 * fraction.clamp(0.0, 0.5)).floor() as usize;
    let kept = &sorted[cut..sorted.len() - cut];
    if kept.is_empty() {
        return median(sorted);
    }
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    Some(var.sqrt())
}

/// Widen to f64, drop non-finite values, sort ascending.
pub fn sorted_samples(values: &[f32]) -> Vec<f64> {
    let mut out: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .collect();
    out.sort_by(f64::total_cmp);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even_samples() {
        assert_eq!(median(&[1.0, 2.0, 9.0]), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 4.0, 9.0]), Some(3.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn iqr_matches_linear_interpolation() {
        let s = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&s, 0.25), Some(2.0));
        assert_eq!(interquartile_range(&s), Some(2.0));
        assert_eq!(interquartile_range(&[7.0]), Some(0.0));
    }

    #[test]
    fn trimmed_mean_ignores_outliers() {
        let s = [1.0, 10.0, 10.0, 10.0, 100.0];
        assert_eq!(trimmed_mean(&s, 0.2), Some(10.0));
        assert_eq!(trimmed_mean(&s, 0.0), Some(26.2));
        assert_eq!(trimmed_mean(&[3.0, 5.0], 0.5), Some(4.0));
    }

    #[test]
    fn std_dev_of_constant_is_zero() {
        assert_eq!(std_dev(&[4.0, 4.0, 4.0]), Some(0.0));
        assert_eq!(std_dev(&[1.0, 3.0]), Some(1.0));
    }

    #[test]
    fn sorted_samples_drop_nan() {
        assert_eq!(sorted_samples(&[3.0, f32::NAN, 1.0]), vec![1.0, 3.0]);
    }
}
