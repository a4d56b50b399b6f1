use tracing::warn;

use crate::models::StudentRow;
use crate::predict::Prediction;

/// Delivery-side seam. The core decides WHEN a student warrants an alert;
/// implementations decide how it leaves the system.
pub trait Notifier {
    fn notify_high_risk(&mut self, student: &StudentRow, prediction: &Prediction);
}

pub fn alert_message(student: &StudentRow, prediction: &Prediction) -> String {
    format!(
        "High risk alert for {}. Grades: {:.1}%, Attendance: {:.1}%",
        student.full_name,
        prediction.features.grade_average,
        prediction.features.attendance_rate
    )
}

/// Default delivery: surface the alert in the logs. Email/SMS transports
/// plug in behind the same trait.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_high_risk(&mut self, student: &StudentRow, prediction: &Prediction) {
        warn!(
            student = %student.student_code,
            email = %student.email,
            probability = prediction.probability,
            "high risk alert: {}",
            alert_message(student, prediction)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSet;
    use crate::models::RiskLevel;
    use uuid::Uuid;

    struct RecordingNotifier {
        alerts: Vec<String>,
    }

    impl Notifier for RecordingNotifier {
        fn notify_high_risk(&mut self, student: &StudentRow, prediction: &Prediction) {
            self.alerts.push(alert_message(student, prediction));
        }
    }

    fn sample() -> (StudentRow, Prediction) {
        let student = StudentRow {
            id: Uuid::new_v4(),
            student_code: "S1001".to_string(),
            full_name: "Avery Lee".to_string(),
            email: "avery@example.com".to_string(),
        };
        let prediction = Prediction {
            level: RiskLevel::High,
            probability: 0.85,
            features: FeatureSet {
                grade_average: 48.5,
                attendance_rate: 55.0,
                recent_grade_average: 44.0,
                grade_trend: -6.0,
                missing_assignments: 4.0,
                course_count: 3.0,
            },
            model_version: "forest-test".to_string(),
        };
        (student, prediction)
    }

    #[test]
    fn alert_message_names_the_student_and_the_numbers() {
        let (student, prediction) = sample();
        let message = alert_message(&student, &prediction);
        assert!(message.contains("Avery Lee"));
        assert!(message.contains("48.5"));
        assert!(message.contains("55.0"));
    }

    #[test]
    fn notifier_receives_each_alert() {
        let (student, prediction) = sample();
        let mut notifier = RecordingNotifier { alerts: Vec::new() };
        notifier.notify_high_risk(&student, &prediction);
        notifier.notify_high_risk(&student, &prediction);
        assert_eq!(notifier.alerts.len(), 2);
    }
}
