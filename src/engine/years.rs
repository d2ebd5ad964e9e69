use std::cmp::Ordering;

use crate::model::{YearRecommendation, YearRecommendations, YearStat};

/// Ranks model years by pass rate after dropping years with too few tests to trust.
/// Equal pass rates prefer the larger sample; remaining ties fall back to model year so
/// the ordering is total.
pub fn recommend_years(stats: &[YearStat], min_tests: u64) -> YearRecommendations {
    let eligible = stats
        .iter()
        .filter(|stat| stat.total_tests >= min_tests && stat.pass_rate.is_finite())
        .map(|stat| YearRecommendation {
            model_year: stat.model_year,
            pass_rate: stat.pass_rate,
            total_tests: stat.total_tests,
        })
        .collect::<Vec<YearRecommendation>>();

    let mut best = eligible.clone();
    best.sort_by(|left, right| {
        right
            .pass_rate
            .total_cmp(&left.pass_rate)
            .then_with(|| larger_sample_first(left, right))
    });

    let mut worst = eligible;
    worst.sort_by(|left, right| {
        left.pass_rate
            .total_cmp(&right.pass_rate)
            .then_with(|| larger_sample_first(left, right))
    });

    YearRecommendations { best, worst }
}

fn larger_sample_first(left: &YearRecommendation, right: &YearRecommendation) -> Ordering {
    right
        .total_tests
        .cmp(&left.total_tests)
        .then(left.model_year.cmp(&right.model_year))
}
