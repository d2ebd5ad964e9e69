use serde::Serialize;

use crate::engine::baseline::composite_baseline;
use crate::engine::config::{ScopeWeights, SeverityThresholds};
use crate::model::{Baselines, SeverityTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscoreableReason {
    /// No peer scope had any tests.
    NoBaseline,
    /// Peers were tested but the defect never occurred among them.
    ZeroBaseline,
    /// The vehicle's own test total was zero.
    NoVehicleTests,
}

impl UnscoreableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBaseline => "no_baseline",
            Self::ZeroBaseline => "zero_baseline",
            Self::NoVehicleTests => "no_vehicle_tests",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreOutcome {
    Scored { ratio: f64, composite: f64 },
    Unscoreable(UnscoreableReason),
}

pub fn score(vehicle_rate: f64, baselines: &Baselines, weights: &ScopeWeights) -> ScoreOutcome {
    if baselines.is_empty() {
        return ScoreOutcome::Unscoreable(UnscoreableReason::NoBaseline);
    }
    let Some(composite) = composite_baseline(baselines, weights) else {
        return ScoreOutcome::Unscoreable(UnscoreableReason::NoBaseline);
    };
    if composite <= 0.0 || !composite.is_finite() {
        return ScoreOutcome::Unscoreable(UnscoreableReason::ZeroBaseline);
    }

    ScoreOutcome::Scored {
        ratio: (vehicle_rate / composite).max(0.0),
        composite,
    }
}

pub fn classify(ratio: f64, thresholds: &SeverityThresholds) -> SeverityTier {
    thresholds.classify(ratio)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn national_only(rate: f64) -> Baselines {
        Baselines {
            national: Some(rate),
            ..Baselines::default()
        }
    }

    #[test]
    fn tier_boundaries_are_inclusive_below() {
        let thresholds = SeverityThresholds::default();
        assert_eq!(classify(1.4999, &thresholds), SeverityTier::Normal);
        assert_eq!(classify(1.5, &thresholds), SeverityTier::Elevated);
        assert_eq!(classify(1.9999, &thresholds), SeverityTier::Elevated);
        assert_eq!(classify(2.0, &thresholds), SeverityTier::Known);
        assert_eq!(classify(2.9999, &thresholds), SeverityTier::Known);
        assert_eq!(classify(3.0, &thresholds), SeverityTier::Major);
        assert_eq!(classify(0.0, &thresholds), SeverityTier::Normal);
    }

    #[test]
    fn ratio_divides_by_composite() {
        let outcome = score(3.0, &national_only(2.0), &ScopeWeights::default());
        assert_eq!(
            outcome,
            ScoreOutcome::Scored {
                ratio: 1.5,
                composite: 2.0
            }
        );
    }

    #[test]
    fn missing_baselines_are_unscoreable() {
        let outcome = score(3.0, &Baselines::default(), &ScopeWeights::default());
        assert_eq!(
            outcome,
            ScoreOutcome::Unscoreable(UnscoreableReason::NoBaseline)
        );
    }

    #[test]
    fn zero_composite_is_unscoreable_not_infinite() {
        let baselines = Baselines {
            national: Some(0.0),
            same_model_year: Some(0.0),
            same_make: None,
        };
        let outcome = score(3.0, &baselines, &ScopeWeights::default());
        assert_eq!(
            outcome,
            ScoreOutcome::Unscoreable(UnscoreableReason::ZeroBaseline)
        );
    }

    #[test]
    fn vehicle_without_occurrences_scores_zero() {
        let outcome = score(0.0, &national_only(1.0), &ScopeWeights::default());
        assert_eq!(
            outcome,
            ScoreOutcome::Scored {
                ratio: 0.0,
                composite: 1.0
            }
        );
    }

    proptest! {
        #[test]
        fn tiers_never_decrease_as_ratio_grows(low in 0.0_f64..10.0, delta in 0.0_f64..10.0) {
            let thresholds = SeverityThresholds::default();
            prop_assert!(classify(low, &thresholds) <= classify(low + delta, &thresholds));
        }

        #[test]
        fn scored_ratio_is_never_negative(vehicle in 0.0_f64..100.0, national in 0.001_f64..100.0) {
            match score(vehicle, &national_only(national), &ScopeWeights::default()) {
                ScoreOutcome::Scored { ratio, .. } => prop_assert!(ratio >= 0.0),
                ScoreOutcome::Unscoreable(reason) => prop_assert!(false, "unexpected {reason:?}"),
            }
        }
    }
}
