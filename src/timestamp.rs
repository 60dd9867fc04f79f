//! Time-base arithmetic.
//!
//! Streams express timestamps in their own rational time base. These helpers
//! move values between time bases, seconds, and FFmpeg's microsecond
//! `AV_TIME_BASE` without the truncation drift that naive float casts
//! accumulate over long files.

use std::time::Duration;

use ffmpeg_next::Rational;

/// FFmpeg's "no timestamp" sentinel (`AV_NOPTS_VALUE`).
pub(crate) const NO_TIMESTAMP: i64 = i64::MIN;

/// `AV_TIME_BASE` expressed as a rational: one microsecond per tick.
pub(crate) const MICROSECONDS: Rational = Rational(1, 1_000_000);

/// Rescale `value` from time base `from` to time base `to`.
///
/// Rounds to the nearest tick with halves away from zero. `i64::MIN` and
/// `i64::MAX` pass through unchanged so the no-timestamp sentinel survives
/// the conversion. A degenerate time base leaves the value untouched.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if value == i64::MIN || value == i64::MAX {
        return value;
    }

    let numerator = i128::from(value) * i128::from(from.numerator()) * i128::from(to.denominator());
    let mut denominator = i128::from(from.denominator()) * i128::from(to.numerator());
    if denominator == 0 {
        return value;
    }

    let mut numerator = numerator;
    if denominator < 0 {
        numerator = -numerator;
        denominator = -denominator;
    }

    let half = denominator / 2;
    let rounded = if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    };

    rounded.clamp(i128::from(i64::MIN + 1), i128::from(i64::MAX - 1)) as i64
}

/// Convert a timestamp to seconds.
pub fn to_seconds(value: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    value as f64 * f64::from(time_base.numerator()) / f64::from(time_base.denominator())
}

/// Convert a timestamp to microseconds (`AV_TIME_BASE` units).
pub fn to_microseconds(value: i64, time_base: Rational) -> i64 {
    rescale(value, time_base, MICROSECONDS)
}

/// Convert a number of seconds to microseconds, rounding to the nearest tick.
pub fn seconds_to_microseconds(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round() as i64
}

/// Convert microseconds to a timestamp in `time_base`.
pub fn from_microseconds(microseconds: i64, time_base: Rational) -> i64 {
    rescale(microseconds, MICROSECONDS, time_base)
}

/// Convert seconds to a [`Duration`], saturating negative or non-finite
/// values to zero.
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// Frames per second of a rational frame rate, or `None` when undefined.
pub fn frames_per_second(rate: Rational) -> Option<f64> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(f64::from(rate.numerator()) / f64::from(rate.denominator()))
    } else {
        None
    }
}

/// Approximate a frame rate in frames per second as a rational.
///
/// Integral rates map to `n/1`; NTSC-style rates such as 29.97 map to
/// `30000/1001`; anything else keeps three decimal places.
pub fn frame_rate_to_rational(fps: f64) -> Rational {
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-6 {
        return Rational(rounded as i32, 1);
    }

    let ntsc = (fps * 1001.0 / 1000.0).round();
    if (ntsc * 1000.0 / 1001.0 - fps).abs() < 1e-3 {
        return Rational((ntsc as i32) * 1000, 1001);
    }

    Rational((fps * 1000.0).round() as i32, 1000)
}

/// Whether `value` carries a real timestamp.
pub(crate) fn is_set(value: i64) -> bool {
    value != NO_TIMESTAMP
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_rounds_to_nearest() {
        // 1 tick of 1/3 in 1/2 units is 0.666.. which rounds up.
        assert_eq!(rescale(1, Rational(1, 3), Rational(1, 2)), 1);
        // 1 tick of 1/5 in 1/2 units is 0.4 which rounds down.
        assert_eq!(rescale(1, Rational(1, 5), Rational(1, 2)), 0);
        // Halves round away from zero.
        assert_eq!(rescale(1, Rational(1, 4), Rational(1, 2)), 1);
        assert_eq!(rescale(-1, Rational(1, 4), Rational(1, 2)), -1);
    }

    #[test]
    fn rescale_passes_sentinels_through() {
        assert_eq!(rescale(NO_TIMESTAMP, Rational(1, 90_000), MICROSECONDS), NO_TIMESTAMP);
        assert_eq!(rescale(i64::MAX, Rational(1, 90_000), MICROSECONDS), i64::MAX);
    }

    #[test]
    fn rescale_does_not_drift_over_long_files() {
        // Ten hours of 1/90000 ticks converted to 1/1000 and back.
        let ticks = 10 * 3600 * 90_000_i64 + 1;
        let millis = rescale(ticks, Rational(1, 90_000), Rational(1, 1000));
        assert_eq!(millis, 36_000_000);
        assert_eq!(rescale(millis, Rational(1, 1000), Rational(1, 90_000)), ticks - 1);
    }

    #[test]
    fn degenerate_time_base_is_identity() {
        assert_eq!(rescale(42, Rational(1, 0), Rational(1, 1000)), 42);
        assert_eq!(to_seconds(42, Rational(1, 0)), 0.0);
    }

    #[test]
    fn seconds_and_microseconds() {
        assert_eq!(seconds_to_microseconds(2.5), 2_500_000);
        assert_eq!(to_microseconds(45_000, Rational(1, 90_000)), 500_000);
        assert_eq!(from_microseconds(500_000, Rational(1, 90_000)), 45_000);
        assert!((to_seconds(3003, Rational(1, 30_000)) - 0.1001).abs() < 1e-9);
    }

    #[test]
    fn frame_rate_approximation() {
        assert_eq!(frame_rate_to_rational(30.0), Rational(30, 1));
        assert_eq!(frame_rate_to_rational(29.97), Rational(30_000, 1001));
        assert_eq!(frame_rate_to_rational(12.5), Rational(12_500, 1000));
        assert_eq!(frames_per_second(Rational(0, 0)), None);
        assert_eq!(frames_per_second(Rational(25, 1)), Some(25.0));
    }

    #[test]
    fn negative_seconds_saturate() {
        assert_eq!(seconds_to_duration(-1.0), Duration::ZERO);
        assert_eq!(seconds_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(seconds_to_duration(1.5), Duration::from_millis(1500));
    }
}
