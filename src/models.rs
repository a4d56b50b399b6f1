use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical risk buckets. `Unknown` only appears when an unrecognized
/// label is read back from storage; prediction never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
            RiskLevel::Unknown => "Unknown Risk",
        }
    }

    pub fn from_label(label: &str) -> RiskLevel {
        match label {
            "Low Risk" => RiskLevel::Low,
            "Medium Risk" => RiskLevel::Medium,
            "High Risk" => RiskLevel::High,
            _ => RiskLevel::Unknown,
        }
    }

    /// Class index shared by training labels and classifier output.
    pub fn class_index(&self) -> Option<usize> {
        match self {
            RiskLevel::Low => Some(0),
            RiskLevel::Medium => Some(1),
            RiskLevel::High => Some(2),
            RiskLevel::Unknown => None,
        }
    }

    pub fn from_class_index(index: usize) -> Option<RiskLevel> {
        match index {
            0 => Some(RiskLevel::Low),
            1 => Some(RiskLevel::Medium),
            2 => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: Uuid,
    pub student_code: String,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub score: f64,
    pub max_score: f64,
    pub weight: f64,
    pub assignment_name: String,
    pub graded_on: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub session_date: NaiveDate,
    pub present: bool,
    pub session_type: String,
}

/// Everything feature extraction needs about one student, fetched up front.
#[derive(Debug, Clone)]
pub struct StudentHistory {
    pub student: StudentRow,
    pub grades: Vec<GradeRecord>,
    pub attendance: Vec<AttendanceRecord>,
    pub active_course_count: usize,
    /// Summed assignment catalog of the active courses; `None` when the
    /// catalog has no entry for any of them.
    pub expected_assignments: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AssessmentRow {
    pub student_code: String,
    pub full_name: String,
    pub email: String,
    pub risk_level: RiskLevel,
    pub probability: f64,
    pub model_version: String,
    pub assessed_at: DateTime<Utc>,
}
