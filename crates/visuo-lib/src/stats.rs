//! Small descriptive-statistics helpers shared by the extractors, the
//! aggregator and the rankers. All functions ignore nothing: callers filter
//! non-finite values first (see [`finite`]).

pub fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(percentile_sorted(&sorted, 50.0))
}

/// Sample standard deviation (n - 1); zero for a single value.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }
    let ss = values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    Some((ss / (values.len() as f64 - 1.0)).sqrt())
}

pub fn population_variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Linear-interpolated percentile (`q` in 0..=100) of an ascending slice.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Central moments m2, m3, m4 (population).
pub fn central_moments(values: &[f64]) -> Option<(f64, f64, f64)> {
    let m = mean(values)?;
    let n = values.len() as f64;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - m;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    Some((m2 / n, m3 / n, m4 / n))
}

pub fn skewness(values: &[f64]) -> f64 {
    match central_moments(values) {
        Some((m2, m3, _)) if m2 > 0.0 => m3 / m2.powf(1.5),
        _ => 0.0,
    }
}

/// Pearson kurtosis (normal distribution = 3).
pub fn kurtosis(values: &[f64]) -> f64 {
    match central_moments(values) {
        Some((m2, _, m4)) if m2 > 0.0 => m4 / (m2 * m2),
        _ => 0.0,
    }
}

/// Zero-mean, unit-variance copy; flat input is only mean-centered.
pub fn z_normalize(values: &[f64]) -> Vec<f64> {
    let Some(m) = mean(values) else {
        return Vec::new();
    };
    let sd = population_variance(values).unwrap_or(0.0).sqrt();
    values
        .iter()
        .map(|v| if sd > 0.0 { (v - m) / sd } else { v - m })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_matches_linear_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile_sorted(&sorted, 50.0), 2.5);
        assert_eq!(percentile_sorted(&sorted, 0.0), 1.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 4.0);
    }

    #[test]
    fn flat_series_has_no_shape_moments() {
        let flat = [5.0; 6];
        assert_eq!(skewness(&flat), 0.0);
        assert_eq!(kurtosis(&flat), 0.0);
        assert_eq!(z_normalize(&flat), vec![0.0; 6]);
        assert_eq!(sample_std(&flat), Some(0.0));
    }

    #[test]
    fn sample_std_uses_bessel_correction() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let sd = sample_std(&values).unwrap();
        assert!((sd - 1.2909944487358056).abs() < 1e-12);
    }
}
