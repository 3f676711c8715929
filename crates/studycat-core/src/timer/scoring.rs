//! Point formulas for finished study time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const DEFAULT_LINEAR_PER_MIN: f64 = 0.10;

/// Active scoring function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// `perMin` points per minute plus one bonus point per 30 minutes,
    /// rounded to one decimal.
    #[default]
    LinearMin,
    /// One point per 10 minutes.
    StudyBunny,
    /// One point per 5 minutes plus five bonus points per 30 minutes.
    ForestLike,
}

impl ScoringMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMode::LinearMin => "linear_min",
            ScoringMode::StudyBunny => "study_bunny",
            ScoringMode::ForestLike => "forest_like",
        }
    }
}

impl fmt::Display for ScoringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoringMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear_min" => Ok(ScoringMode::LinearMin),
            "study_bunny" => Ok(ScoringMode::StudyBunny),
            "forest_like" => Ok(ScoringMode::ForestLike),
            other => Err(ValidationError::InvalidValue {
                field: "mode".into(),
                message: format!("unknown scoring mode '{other}'"),
            }),
        }
    }
}

/// Points earned for `minutes` of study under `mode`.
///
/// Negative or non-finite minutes score zero. A non-finite `linear_per_min`
/// falls back to [`DEFAULT_LINEAR_PER_MIN`].
pub fn calc_points(minutes: f64, mode: ScoringMode, linear_per_min: f64) -> f64 {
    let mins = if minutes.is_finite() { minutes.max(0.0) } else { 0.0 };
    match mode {
        ScoringMode::StudyBunny => (mins / 10.0).floor(),
        ScoringMode::ForestLike => (mins / 5.0).floor() + (mins / 30.0).floor() * 5.0,
        ScoringMode::LinearMin => {
            let per_min = if linear_per_min.is_finite() {
                linear_per_min
            } else {
                DEFAULT_LINEAR_PER_MIN
            };
            let base = mins * per_min;
            let bonus = (mins / 30.0).floor();
            ((base + bonus) * 10.0).round() / 10.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn study_bunny_counts_whole_ten_minutes() {
        assert_eq!(calc_points(9.99, ScoringMode::StudyBunny, 0.1), 0.0);
        assert_eq!(calc_points(25.0, ScoringMode::StudyBunny, 0.1), 2.0);
    }

    #[test]
    fn forest_like_adds_half_hour_bonus() {
        assert_eq!(calc_points(29.0, ScoringMode::ForestLike, 0.1), 5.0);
        assert_eq!(calc_points(30.0, ScoringMode::ForestLike, 0.1), 11.0);
        assert_eq!(calc_points(61.0, ScoringMode::ForestLike, 0.1), 22.0);
    }

    #[test]
    fn linear_rounds_to_one_decimal() {
        let minutes = 95.0 / 60.0;
        assert_eq!(calc_points(minutes, ScoringMode::LinearMin, 0.10), 0.2);
        assert_eq!(calc_points(30.0, ScoringMode::LinearMin, 0.10), 4.0);
        assert_eq!(calc_points(45.0, ScoringMode::LinearMin, 0.25), 12.3);
    }

    #[test]
    fn bad_inputs_score_zero_or_default() {
        assert_eq!(calc_points(-5.0, ScoringMode::ForestLike, 0.1), 0.0);
        assert_eq!(calc_points(f64::NAN, ScoringMode::LinearMin, 0.1), 0.0);
        assert_eq!(calc_points(10.0, ScoringMode::LinearMin, f64::NAN), 1.0);
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in [
            ScoringMode::LinearMin,
            ScoringMode::StudyBunny,
            ScoringMode::ForestLike,
        ] {
            assert_eq!(mode.as_str().parse::<ScoringMode>().unwrap(), mode);
        }
        assert!("pomodoro".parse::<ScoringMode>().is_err());
    }
}
