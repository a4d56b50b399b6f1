use serde::{Deserialize, Serialize};

use crate::models::StudentHistory;

/// Ordered feature manifest. Training and serving both derive their vectors
/// from this list; the trained artifact persists it and refuses to load if
/// it no longer matches.
pub const FEATURE_NAMES: [&str; 6] = [
    "grade_average",
    "attendance_rate",
    "recent_grade_average",
    "grade_trend",
    "missing_assignments",
    "course_count",
];

/// How many of the most recent grades feed the recency features.
pub const RECENT_GRADE_WINDOW: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub grade_average: f64,
    pub attendance_rate: f64,
    pub recent_grade_average: f64,
    pub grade_trend: f64,
    pub missing_assignments: f64,
    pub course_count: f64,
}

impl FeatureSet {
    /// Vector in `FEATURE_NAMES` order.
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.grade_average,
            self.attendance_rate,
            self.recent_grade_average,
            self.grade_trend,
            self.missing_assignments,
            self.course_count,
        ]
    }
}

/// Summarize a student's academic history into the fixed feature set.
/// Total over any input: missing or empty history yields zeros, never an
/// error, so prediction can always run.
pub fn extract_features(history: &StudentHistory) -> FeatureSet {
    let scores: Vec<f64> = history
        .grades
        .iter()
        .map(|g| safe_score(g.score))
        .collect();

    let grade_average = mean(&scores);

    let present = history.attendance.iter().filter(|a| a.present).count();
    let attendance_rate = if history.attendance.is_empty() {
        0.0
    } else {
        present as f64 / history.attendance.len() as f64 * 100.0
    };

    // Most recent first, so the window is the head of the sorted list.
    let mut dated: Vec<(chrono::NaiveDate, f64)> = history
        .grades
        .iter()
        .map(|g| (g.graded_on, safe_score(g.score)))
        .collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0));

    let recent: Vec<f64> = dated
        .iter()
        .take(RECENT_GRADE_WINDOW)
        .map(|(_, s)| *s)
        .collect();
    let older: Vec<f64> = dated
        .iter()
        .skip(RECENT_GRADE_WINDOW)
        .map(|(_, s)| *s)
        .collect();

    let recent_grade_average = mean(&recent);
    // No older records means no trend signal, not a fabricated one.
    let grade_trend = if older.is_empty() {
        0.0
    } else {
        recent_grade_average - mean(&older)
    };

    let completed = history.grades.len() as i64;
    let expected = history.expected_assignments.unwrap_or(completed);
    let missing_assignments = (expected - completed).max(0) as f64;

    FeatureSet {
        grade_average,
        attendance_rate,
        recent_grade_average,
        grade_trend,
        missing_assignments,
        course_count: history.active_course_count as f64,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Dirty numeric data degrades to 0.0 instead of poisoning the vector.
fn safe_score(score: f64) -> f64 {
    if score.is_finite() {
        score
    } else {
        0.0
    }
}
