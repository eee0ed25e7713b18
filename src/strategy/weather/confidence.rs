//! Forecast confidence scoring

/// How much of the expected clear-sky capacity the forecast delivers,
/// clamped to 1.0. The 0.7 divisor means ~70% of clear-sky output already
/// counts as fully trustworthy; nighttime (no expected capacity) scores 0.
pub fn period_confidence(pv_power_kw: f64, expected_capacity_kw: f64) -> f64 {
    if expected_capacity_kw <= 0.0 {
        return 0.0;
    }
    (pv_power_kw / expected_capacity_kw / 0.7).min(1.0)
}

/// Safety buffer scaled inversely with confidence: `min_buffer_watts` on a
/// fully trusted forecast, up to `multiplier_max` times that when the
/// forecast looks unreliable
pub fn confidence_scaled_buffer(
    min_buffer_watts: f64,
    multiplier_max: f64,
    confidence: f64,
) -> f64 {
    min_buffer_watts * (1.0 + (multiplier_max - 1.0) * (1.0 - confidence))
}
