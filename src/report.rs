use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{AssessmentRow, RiskLevel};
use crate::predict::RULES_VERSION;

pub fn summarize_levels(assessments: &[AssessmentRow]) -> Vec<(RiskLevel, usize)> {
    let levels = [
        RiskLevel::High,
        RiskLevel::Medium,
        RiskLevel::Low,
        RiskLevel::Unknown,
    ];
    levels
        .into_iter()
        .map(|level| {
            (
                level,
                assessments.iter().filter(|a| a.risk_level == level).count(),
            )
        })
        .filter(|(_, count)| *count > 0)
        .collect()
}

pub fn build_report(assessments: &[AssessmentRow], generated_on: NaiveDate) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Student Risk Report");
    let _ = writeln!(
        output,
        "Generated {} from the latest assessment of each student",
        generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    let mix = summarize_levels(assessments);
    if mix.is_empty() {
        let _ = writeln!(output, "No assessments recorded yet.");
    } else {
        for (level, count) in mix {
            let _ = writeln!(output, "- {}: {} students", level, count);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    let mut flagged: Vec<&AssessmentRow> = assessments
        .iter()
        .filter(|a| matches!(a.risk_level, RiskLevel::High | RiskLevel::Medium))
        .collect();
    flagged.sort_by(|a, b| {
        let rank = |level: RiskLevel| match level {
            RiskLevel::High => 0,
            RiskLevel::Medium => 1,
            _ => 2,
        };
        rank(a.risk_level)
            .cmp(&rank(b.risk_level))
            .then(b.probability.partial_cmp(&a.probability).unwrap_or(std::cmp::Ordering::Equal))
    });

    if flagged.is_empty() {
        let _ = writeln!(output, "No students currently flagged.");
    } else {
        for assessment in flagged.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) {} at {:.0}% confidence",
                assessment.full_name,
                assessment.student_code,
                assessment.email,
                assessment.risk_level,
                assessment.probability * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Assessment Sources");

    if assessments.is_empty() {
        let _ = writeln!(output, "No assessments recorded yet.");
    } else {
        let by_rules = assessments
            .iter()
            .filter(|a| a.model_version == RULES_VERSION)
            .count();
        let by_model = assessments.len() - by_rules;
        let _ = writeln!(output, "- classifier: {} students", by_model);
        let _ = writeln!(output, "- rule fallback: {} students", by_rules);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn assessment(code: &str, level: RiskLevel, probability: f64, version: &str) -> AssessmentRow {
        AssessmentRow {
            student_code: code.to_string(),
            full_name: format!("Student {code}"),
            email: format!("{code}@example.edu"),
            risk_level: level,
            probability,
            model_version: version.to_string(),
            assessed_at: Utc.with_ymd_and_hms(2026, 3, 30, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn report_lists_mix_and_flagged_students() {
        let assessments = vec![
            assessment("S1", RiskLevel::Low, 0.9, "forest-1"),
            assessment("S2", RiskLevel::High, 0.8, "forest-1"),
            assessment("S3", RiskLevel::Medium, 0.6, "rules-v1"),
        ];
        let report = build_report(&assessments, NaiveDate::from_ymd_opt(2026, 3, 30).unwrap());

        assert!(report.contains("# Student Risk Report"));
        assert!(report.contains("High Risk: 1 students"));
        assert!(report.contains("Student S2"));
        assert!(report.contains("Student S3"));
        assert!(!report.contains("Student S1 ("));
        assert!(report.contains("classifier: 2 students"));
        assert!(report.contains("rule fallback: 1 students"));
    }

    #[test]
    fn high_risk_sorts_ahead_of_medium() {
        let assessments = vec![
            assessment("M", RiskLevel::Medium, 0.95, "forest-1"),
            assessment("H", RiskLevel::High, 0.55, "forest-1"),
        ];
        let report = build_report(&assessments, NaiveDate::from_ymd_opt(2026, 3, 30).unwrap());
        let high_at = report.find("Student H").unwrap();
        let medium_at = report.find("Student M").unwrap();
        assert!(high_at < medium_at);
    }

    #[test]
    fn empty_assessments_produce_a_complete_but_quiet_report() {
        let report = build_report(&[], NaiveDate::from_ymd_opt(2026, 3, 30).unwrap());
        assert!(report.contains("No assessments recorded yet."));
        assert!(report.contains("No students currently flagged."));
    }
}
