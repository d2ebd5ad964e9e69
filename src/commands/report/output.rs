use std::io::Write;

use anyhow::{Context, Result};

use crate::model::{KnownIssue, Report, YearRecommendation};

pub(super) fn write_json_report<W: Write>(output: &mut W, report: &Report) -> Result<()> {
    serde_json::to_writer_pretty(&mut *output, report)
        .context("failed to serialize report json output")?;
    writeln!(output)?;
    Ok(())
}

pub(super) fn write_text_report<W: Write>(output: &mut W, report: &Report) -> Result<()> {
    writeln!(
        output,
        "Vehicle: {} ({} tests)",
        report.vehicle, report.vehicle_total_tests
    )?;
    writeln!(
        output,
        "Config: v{} rate_mode={} checksum={}",
        report.config_version, report.rate_mode, report.config_checksum
    )?;

    for (label, issues) in [
        ("Major issues", &report.major_issues),
        ("Known issues", &report.known_issues),
        ("Elevated issues", &report.elevated_issues),
    ] {
        writeln!(output, "{label}: {}", issues.len())?;
        for (index, issue) in issues.iter().enumerate() {
            write_issue(output, index + 1, issue)?;
        }
    }

    writeln!(output, "Categories: {}", report.category_summaries.len())?;
    for summary in &report.category_summaries {
        writeln!(
            output,
            "\t{}\tvehicle={:.3}% national={:.3}%{}",
            summary.category,
            summary.vehicle_rate,
            summary.national_rate,
            if summary.is_elevated { "\televated" } else { "" }
        )?;
    }

    write_year_lines(output, "Best years", &report.year_recommendations.best)?;
    write_year_lines(output, "Worst years", &report.year_recommendations.worst)?;

    if report.unscoreable_count > 0 {
        writeln!(output, "Unscoreable subjects: {}", report.unscoreable_count)?;
    }

    Ok(())
}

fn write_issue<W: Write>(output: &mut W, rank: usize, issue: &KnownIssue) -> Result<()> {
    writeln!(
        output,
        "{rank}.\t{}\t[{}]\tratio={:.2}x",
        issue.subject_key, issue.category, issue.ratio
    )?;
    writeln!(
        output,
        "\tvehicle={:.3}% baseline={:.3}% occurrences={} variants={}",
        issue.vehicle_rate, issue.composite_baseline, issue.total_occurrences, issue.variant_count
    )?;

    if issue.variant_count > 1 {
        for description in &issue.variant_descriptions {
            writeln!(output, "\t- {description}")?;
        }
    }

    if let Some(onset) = issue.typical_mileage_onset {
        let premature = if issue.onset_is_premature == Some(true) {
            " (premature)"
        } else {
            ""
        };
        writeln!(output, "\tonset ~{onset:.0} miles{premature}")?;
    }

    if let Some(years) = &issue.affected_model_years
        && !years.is_empty()
    {
        let joined = years
            .iter()
            .map(u32::to_string)
            .collect::<Vec<String>>()
            .join(", ");
        writeln!(output, "\talso affects: {joined}")?;
    }

    if issue.low_confidence == Some(true) {
        writeln!(output, "\tlow confidence")?;
    }

    Ok(())
}

pub(crate) fn write_year_lines<W: Write>(
    output: &mut W,
    label: &str,
    years: &[YearRecommendation],
) -> Result<()> {
    writeln!(output, "{label}: {}", years.len())?;
    for year in years {
        writeln!(
            output,
            "\t{}\tpass_rate={:.1}%\ttests={}",
            year.model_year, year.pass_rate, year.total_tests
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::model::{
        Baselines, CategorySummary, SeverityTier, VehicleKey, YearRecommendations,
    };

    fn issue() -> KnownIssue {
        KnownIssue {
            subject_key: "Brake imbalance".to_string(),
            category: "Brakes".to_string(),
            ratio: 3.3012,
            severity_tier: SeverityTier::Major,
            vehicle_rate: 2.6816,
            composite_baseline: 0.8124,
            baselines: Baselines::default(),
            total_occurrences: 21_346,
            variant_count: 2,
            variant_descriptions: vec![
                "Brakes imbalanced across an axle".to_string(),
                "Braking effort not recording at a wheel".to_string(),
            ],
            typical_mileage_onset: Some(48_250.0),
            onset_is_premature: Some(true),
            affected_model_years: Some(BTreeSet::from([2011, 2014])),
            low_confidence: None,
        }
    }

    fn report() -> Report {
        Report {
            vehicle: VehicleKey::new("VAUXHALL", "CORSA", 2012, "PE"),
            vehicle_total_tests: 796_000,
            config_version: 1,
            config_checksum: "abc123".to_string(),
            rate_mode: "group_before_rate".to_string(),
            major_issues: vec![issue()],
            known_issues: Vec::new(),
            elevated_issues: Vec::new(),
            category_summaries: vec![CategorySummary {
                category: "Brakes".to_string(),
                vehicle_rate: 5.0,
                national_rate: 4.0,
                is_elevated: true,
            }],
            year_recommendations: YearRecommendations {
                best: vec![YearRecommendation {
                    model_year: 2015,
                    pass_rate: 81.34,
                    total_tests: 9_000,
                }],
                worst: Vec::new(),
            },
            unscoreable_count: 2,
        }
    }

    fn render(report: &Report) -> String {
        let mut buffer = Vec::new();
        write_text_report(&mut buffer, report).expect("text should render");
        String::from_utf8(buffer).expect("text should be utf-8")
    }

    #[test]
    fn text_report_lists_issue_details() {
        let text = render(&report());

        assert!(text.starts_with("Vehicle: VAUXHALL CORSA 2012 PE (796000 tests)\n"));
        assert!(text.contains("Major issues: 1\n1.\tBrake imbalance\t[Brakes]\tratio=3.30x\n"));
        assert!(text.contains("occurrences=21346 variants=2"));
        assert!(text.contains("\t- Braking effort not recording at a wheel\n"));
        assert!(text.contains("\tonset ~48250 miles (premature)\n"));
        assert!(text.contains("\talso affects: 2011, 2014\n"));
        assert!(text.contains("\tBrakes\tvehicle=5.000% national=4.000%\televated\n"));
        assert!(text.contains("Best years: 1\n\t2015\tpass_rate=81.3%\ttests=9000\n"));
        assert!(text.contains("Unscoreable subjects: 2\n"));
        assert!(!text.contains("low confidence"));
    }

    #[test]
    fn json_report_is_parseable() {
        let mut buffer = Vec::new();
        write_json_report(&mut buffer, &report()).expect("json should render");

        let parsed: Report = serde_json::from_slice(&buffer).expect("json should parse");
        assert_eq!(parsed, report());
    }
}
