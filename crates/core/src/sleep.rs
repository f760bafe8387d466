use rand::Rng;
use std::thread;
use std::time::Duration;

/// Longest single pause any caller may request, in seconds.
pub const MAX_SECS: f64 = 600.0;

/// Sleep for `secs` seconds with +/-30% random jitter, capped at [`MAX_SECS`].
/// Non-positive or non-finite values return at once.
pub fn sleep_jitter(secs: f64) {
    if !(secs.is_finite() && secs > 0.0) {
        return;
    }
    let secs = secs.min(MAX_SECS);
    let jitter = secs * 0.3;
    let actual = secs + rand::thread_rng().gen_range(-jitter..=jitter);
    sleep_secs(actual.max(0.01));
}

/// Sleep for exactly `secs` seconds; values that don't fit a `Duration` return at once.
pub fn sleep_secs(secs: f64) {
    if secs <= 0.0 {
        return;
    }
    if let Ok(d) = Duration::try_from_secs_f64(secs) {
        thread::sleep(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_unusable_values_return_at_once() {
        let started = Instant::now();
        for secs in [f64::INFINITY, f64::NAN, f64::NEG_INFINITY, -1.0, 0.0, f64::MIN_POSITIVE / 4.0] {
            sleep_jitter(secs);
        }
        sleep_secs(1e20);
        sleep_secs(f64::NAN);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let started = Instant::now();
        sleep_jitter(0.05);
        let took = started.elapsed();
        assert!(took >= Duration::from_millis(34), "{:?}", took);
    }
}
