//! Summary statistics over frame-level tracks.

const EPSILON: f64 = 1e-12;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Standard deviation relative to the magnitude of the mean.
///
/// Returns `None` for empty tracks and for tracks whose mean is (near) zero,
/// where the ratio carries no information.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if m.abs() < EPSILON {
        return None;
    }
    Some(std_dev(values)? / m.abs())
}
