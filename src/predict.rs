use tracing::warn;

use crate::classifier::ModelArtifact;
use crate::features::{extract_features, FeatureSet};
use crate::models::{RiskLevel, StudentHistory, StudentRow};
use crate::risk::{classify_by_rules, RiskThresholds};

/// Reported when the rule fallback decides: the rules are certain of their
/// own answer and there is no posterior to report.
pub const FALLBACK_PROBABILITY: f64 = 1.0;

/// Version tag recorded on assessments produced by the rule fallback.
pub const RULES_VERSION: &str = "rules-v1";

#[derive(Debug, Clone)]
pub struct Prediction {
    pub level: RiskLevel,
    pub probability: f64,
    pub features: FeatureSet,
    pub model_version: String,
}

/// Classify one student. Never fails and never yields "Unknown Risk":
/// any model problem (missing, corrupt, mismatched, inference error) drops
/// to the deterministic threshold policy.
pub fn predict_one(
    history: &StudentHistory,
    model: Option<&ModelArtifact>,
    thresholds: &RiskThresholds,
) -> Prediction {
    let features = extract_features(history);

    if let Some(artifact) = model {
        match artifact.predict(&features.to_vector()) {
            Ok((level, probability)) => {
                return Prediction {
                    level,
                    probability,
                    features,
                    model_version: artifact.version.clone(),
                };
            }
            Err(e) => {
                warn!(
                    student = %history.student.student_code,
                    error = %e,
                    "model prediction failed, using rule fallback"
                );
            }
        }
    }

    let level = classify_by_rules(features.grade_average, features.attendance_rate, thresholds);
    Prediction {
        level,
        probability: FALLBACK_PROBABILITY,
        features,
        model_version: RULES_VERSION.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub updated: usize,
    pub failed: usize,
    pub high_risk: usize,
}

/// Predict across a roster where individual histories may have failed to
/// load. A bad student is counted and skipped; everyone else still gets an
/// assessment.
pub fn assess_roster(
    histories: Vec<anyhow::Result<StudentHistory>>,
    model: Option<&ModelArtifact>,
    thresholds: &RiskThresholds,
) -> (Vec<(StudentRow, Prediction)>, usize) {
    let mut assessments = Vec::with_capacity(histories.len());
    let mut failed = 0;
    for history in histories {
        match history {
            Ok(history) => {
                let prediction = predict_one(&history, model, thresholds);
                assessments.push((history.student, prediction));
            }
            Err(e) => {
                warn!(error = %e, "skipping student whose history failed to load");
                failed += 1;
            }
        }
    }
    (assessments, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ForestConfig, RiskForest, StandardScaler};
    use crate::models::{AttendanceRecord, GradeRecord, StudentHistory};
    use crate::train::{train, TrainConfig};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn history_with(code: &str, grade: f64, attendance_pct: f64) -> StudentHistory {
        let base = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let grades = (0..8)
            .map(|i| GradeRecord {
                score: grade,
                max_score: 100.0,
                weight: 0.1,
                assignment_name: format!("Assignment {}", i + 1),
                graded_on: base - chrono::Duration::days(i * 7),
            })
            .collect();
        let present_sessions = (attendance_pct / 100.0 * 20.0).round() as i64;
        let attendance = (0..20)
            .map(|i| AttendanceRecord {
                session_date: base - chrono::Duration::days(i),
                present: i < present_sessions,
                session_type: "Lecture".to_string(),
            })
            .collect();
        StudentHistory {
            student: StudentRow {
                id: Uuid::new_v4(),
                student_code: code.to_string(),
                full_name: format!("Student {code}"),
                email: format!("{code}@example.com"),
            },
            grades,
            attendance,
            active_course_count: 3,
            expected_assignments: Some(10),
        }
    }

    fn quick_train_config() -> TrainConfig {
        TrainConfig {
            test_fraction: 0.2,
            seed: 42,
            forest: ForestConfig {
                n_trees: 15,
                max_depth: 5,
                seed: 7,
            },
        }
    }

    fn trained_artifact() -> ModelArtifact {
        let mut roster = Vec::new();
        for i in 0..10 {
            roster.push(history_with(&format!("L{i}"), 88.0 + i as f64, 95.0));
            roster.push(history_with(&format!("M{i}"), 68.0 + i as f64 * 0.5, 85.0));
            roster.push(history_with(&format!("H{i}"), 45.0 + i as f64, 55.0));
        }
        let (artifact, _) = train(&roster, &RiskThresholds::default(), &quick_train_config()).unwrap();
        artifact
    }

    #[test]
    fn no_model_falls_back_to_rules_with_placeholder_probability() {
        let prediction = predict_one(
            &history_with("s", 55.0, 65.0),
            None,
            &RiskThresholds::default(),
        );
        assert_eq!(prediction.level, RiskLevel::High);
        assert_eq!(prediction.probability, FALLBACK_PROBABILITY);
        assert_eq!(prediction.model_version, RULES_VERSION);
    }

    #[test]
    fn broken_model_falls_back_to_rules() {
        // Internals fitted on two features cannot serve the six-feature
        // manifest; prediction must degrade to the rules, not fail.
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![10.0, 12.0]];
        let labels = vec![0, 1, 2];
        let scaler = StandardScaler::fit(&rows);
        let forest = RiskForest::fit(&rows, &labels, &ForestConfig {
            n_trees: 5,
            max_depth: 3,
            seed: 1,
        })
        .unwrap();
        let broken = ModelArtifact::new(scaler, forest, 0.5);

        let prediction = predict_one(
            &history_with("s", 78.0, 88.0),
            Some(&broken),
            &RiskThresholds::default(),
        );
        assert_eq!(prediction.level, RiskLevel::Low);
        assert_eq!(prediction.model_version, RULES_VERSION);
    }

    #[test]
    fn model_predictions_stay_in_the_canonical_label_set() {
        let artifact = trained_artifact();
        for (grade, attendance) in [(95.0, 98.0), (70.0, 82.0), (40.0, 50.0), (0.0, 0.0)] {
            let prediction = predict_one(
                &history_with("s", grade, attendance),
                Some(&artifact),
                &RiskThresholds::default(),
            );
            assert_ne!(prediction.level, RiskLevel::Unknown);
            assert!((0.0..=1.0).contains(&prediction.probability));
            assert_ne!(prediction.model_version, RULES_VERSION);
        }
    }

    #[test]
    fn prediction_always_carries_the_feature_snapshot() {
        let prediction = predict_one(
            &history_with("s", 82.0, 91.0),
            None,
            &RiskThresholds::default(),
        );
        assert!((prediction.features.grade_average - 82.0).abs() < 1e-9);
        assert!((prediction.features.attendance_rate - 90.0).abs() < 1.0);
        assert_eq!(prediction.features.course_count, 3.0);
    }

    #[test]
    fn one_bad_history_does_not_stop_the_batch() {
        let histories = vec![
            Ok(history_with("a", 90.0, 95.0)),
            Err(anyhow::anyhow!("grade rows are unreadable")),
            Ok(history_with("b", 45.0, 50.0)),
        ];
        let (assessments, failed) =
            assess_roster(histories, None, &RiskThresholds::default());
        assert_eq!(assessments.len(), 2);
        assert_eq!(failed, 1);
        assert_eq!(assessments[0].1.level, RiskLevel::Low);
        assert_eq!(assessments[1].1.level, RiskLevel::High);
    }

    #[test]
    fn empty_roster_yields_an_empty_batch() {
        let (assessments, failed) = assess_roster(vec![], None, &RiskThresholds::default());
        assert!(assessments.is_empty());
        assert_eq!(failed, 0);
    }
}
