use std::time::Duration;

/// Delays of the `multiplier - 1` sub-pulses that follow an immediate publish.
///
/// Sub-pulse `k` (`1 <= k < multiplier`) fires `k * interval / multiplier`
/// seconds after the pulse. Negative or NaN delays clamp to zero; a multiplier
/// of 0 or 1 yields no sub-pulses.
pub fn plan(interval: f64, multiplier: u32) -> Vec<Duration> {
    if multiplier <= 1 {
        return Vec::new();
    }
    let step = interval / f64::from(multiplier);
    (1..multiplier)
        .map(|k| clamp_delay(f64::from(k) * step))
        .collect()
}

fn clamp_delay(secs: f64) -> Duration {
    // `!(secs > 0.0)` also catches NaN
    if !(secs > 0.0) {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
