use crate::models::RiskLevel;

/// Single named threshold policy. Earlier call sites disagreed on the high
/// cutoffs (60/70 in one place, 50/60 in another); this is the one canonical
/// set, overridable from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct RiskThresholds {
    pub high_grade: f64,
    pub high_attendance: f64,
    pub medium_grade: f64,
    pub medium_attendance: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high_grade: 60.0,
            high_attendance: 70.0,
            medium_grade: 75.0,
            medium_attendance: 80.0,
        }
    }
}

/// Deterministic classification from grade average and attendance rate.
/// Pure and total: no learned state, never fails, always one of the three
/// canonical labels. Used as the serving fallback and to label training data.
pub fn classify_by_rules(
    grade_average: f64,
    attendance_rate: f64,
    thresholds: &RiskThresholds,
) -> RiskLevel {
    if grade_average < thresholds.high_grade || attendance_rate < thresholds.high_attendance {
        RiskLevel::High
    } else if grade_average < thresholds.medium_grade
        || attendance_rate < thresholds.medium_attendance
    {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}
