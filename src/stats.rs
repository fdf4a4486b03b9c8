//! Reducing per-window scores to a mean and a confidence half-width.
//!
//! The margin of error is the two-sided 99.9% interval `t(n-1, 0.9995) * s / sqrt(n)`, where `s` is the
//! Bessel-corrected sample standard deviation. Anything that needs a variance refuses to run on fewer than two
//! samples instead of quietly producing `0` or `NaN`.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use thiserror::Error;

/// Cumulative probability the Student's t quantile is taken at.
pub const CONFIDENCE: f64 = 0.9995;

/// Errors produced by the reductions in this module.
#[derive(Debug, Error)]
pub enum StatsError {
    /// Too few samples for the requested statistic.
    #[error("not enough samples: need at least {required}, got {actual}")]
    InsufficientSamples {
        /// Minimum number of samples.
        required: usize,
        /// Number of samples provided.
        actual: usize,
    },
    /// The t distribution could not be constructed.
    #[error("could not build t distribution: {0}")]
    Distribution(#[from] statrs::StatsError),
}

fn require(samples: &[f64], required: usize) -> Result<(), StatsError> {
    if samples.len() < required {
        return Err(StatsError::InsufficientSamples {
            required,
            actual: samples.len(),
        });
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn len(samples: &[f64]) -> f64 {
    samples.len() as f64
}

/// Arithmetic mean.
///
/// # Errors
///
/// Returns [`StatsError::InsufficientSamples`] for an empty slice.
///
/// # Examples
///
/// ```
/// assert_eq!(mch::stats::mean(&[1.0, 2.0, 6.0]).unwrap(), 3.0);
/// ```
pub fn mean(samples: &[f64]) -> Result<f64, StatsError> {
    require(samples, 1)?;
    Ok(samples.iter().sum::<f64>() / len(samples))
}

/// Sample variance, dividing by `n - 1`.
///
/// # Errors
///
/// Returns [`StatsError::InsufficientSamples`] for fewer than two samples.
pub fn variance(samples: &[f64]) -> Result<f64, StatsError> {
    require(samples, 2)?;
    let mean = mean(samples)?;
    Ok(samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (len(samples) - 1.0))
}

/// Half-width of the 99.9% confidence interval around the mean.
///
/// # Errors
///
/// Returns [`StatsError::InsufficientSamples`] for fewer than two samples.
pub fn margin_of_error(samples: &[f64]) -> Result<f64, StatsError> {
    let variance = variance(samples)?;
    let t = StudentsT::new(0.0, 1.0, len(samples) - 1.0)?.inverse_cdf(CONFIDENCE);
    Ok(t * variance.sqrt() / len(samples).sqrt())
}

/// Display unit for scores. Scores are always measured in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeUnit {
    /// Nanoseconds.
    #[serde(rename = "ns")]
    Nanoseconds,
    /// Microseconds.
    #[serde(rename = "us")]
    Microseconds,
    /// Milliseconds.
    #[serde(rename = "ms")]
    Milliseconds,
    /// Seconds.
    #[serde(rename = "s")]
    Seconds,
    /// Minutes.
    #[serde(rename = "m")]
    Minutes,
}

impl TimeUnit {
    /// Length of one unit in nanoseconds.
    #[must_use]
    pub fn nanos(self) -> u64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
        }
    }

    /// Short name used in report units, like `ns`.
    #[must_use]
    pub fn abbreviation(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// Unknown time unit abbreviation.
#[derive(Debug, Error)]
#[error("invalid time unit: '{0}' (expected one of ns, us, ms, s, m)")]
pub struct UnknownTimeUnit(pub String);

impl FromStr for TimeUnit {
    type Err = UnknownTimeUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ns" => TimeUnit::Nanoseconds,
            "us" => TimeUnit::Microseconds,
            "ms" => TimeUnit::Milliseconds,
            "s" => TimeUnit::Seconds,
            "m" => TimeUnit::Minutes,
            _ => return Err(UnknownTimeUnit(s.to_string())),
        })
    }
}

/// Rescales a duration between units.
///
/// Converting to a coarser unit divides by the integral ratio, converting to a finer one multiplies by it, so the
/// ratio itself is always exact.
///
/// # Examples
///
/// ```
/// use mch::stats::{convert, TimeUnit};
///
/// assert_eq!(convert(1_500.0, TimeUnit::Nanoseconds, TimeUnit::Microseconds), 1.5);
/// assert_eq!(convert(2.0, TimeUnit::Minutes, TimeUnit::Seconds), 120.0);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn convert(value: f64, from: TimeUnit, to: TimeUnit) -> f64 {
    if from < to {
        value / (to.nanos() / from.nanos()) as f64
    } else {
        value * (from.nanos() / to.nanos()) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

    #[test]
    fn margin_of_error_matches_t_table() {
        // t(4, 0.9995) = 8.6103
        let margin = margin_of_error(&SAMPLES).unwrap();
        assert!((margin - 6.0884).abs() < 1e-3, "{margin}");
    }

    #[test]
    fn variance_is_bessel_corrected() {
        assert!((variance(&SAMPLES).unwrap() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn statistics_of_scattered_samples_are_sane() {
        let samples = [12.5, 3.0, 9.75, 100.0, 0.5, 42.0, 7.0];
        assert!(variance(&samples).unwrap() >= 0.0);
        assert!(margin_of_error(&samples).unwrap() >= 0.0);

        let mut reversed = samples;
        reversed.reverse();
        let mut rotated = samples;
        rotated.rotate_left(3);
        let m = mean(&samples).unwrap();
        assert!((mean(&reversed).unwrap() - m).abs() < 1e-9);
        assert!((mean(&rotated).unwrap() - m).abs() < 1e-9);
    }

    #[test]
    fn constant_samples_have_zero_error() {
        let samples = [10.0; 5];
        assert_eq!(mean(&samples).unwrap(), 10.0);
        assert_eq!(margin_of_error(&samples).unwrap(), 0.0);
    }

    #[test]
    fn single_sample_is_insufficient() {
        assert!(matches!(
            margin_of_error(&[1.0]),
            Err(StatsError::InsufficientSamples {
                required: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            mean(&[]),
            Err(StatsError::InsufficientSamples {
                required: 1,
                actual: 0
            })
        ));
    }

    #[test]
    fn convert_picks_direction_by_coarseness() {
        assert_eq!(convert(3.0e9, TimeUnit::Nanoseconds, TimeUnit::Seconds), 3.0);
        assert_eq!(convert(1.0, TimeUnit::Milliseconds, TimeUnit::Nanoseconds), 1.0e6);
        assert_eq!(convert(90.0, TimeUnit::Seconds, TimeUnit::Minutes), 1.5);
        assert_eq!(convert(7.0, TimeUnit::Microseconds, TimeUnit::Microseconds), 7.0);
    }

    #[test]
    fn time_units_parse_their_abbreviations() {
        for unit in [
            TimeUnit::Nanoseconds,
            TimeUnit::Microseconds,
            TimeUnit::Milliseconds,
            TimeUnit::Seconds,
            TimeUnit::Minutes,
        ] {
            assert_eq!(unit.abbreviation().parse::<TimeUnit>().unwrap(), unit);
        }
        assert!("h".parse::<TimeUnit>().is_err());
    }
}
