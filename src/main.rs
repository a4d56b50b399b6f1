use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod classifier;
mod db;
mod features;
mod models;
mod notify;
mod predict;
mod report;
mod risk;
mod train;

use classifier::{ModelArtifact, ModelError};
use models::RiskLevel;
use notify::Notifier;
use risk::RiskThresholds;

#[derive(Parser)]
#[command(name = "student-early-warning")]
#[command(about = "Student academic risk tracking and prediction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ThresholdArgs {
    /// Grade average below this is High Risk
    #[arg(long, default_value_t = 60.0)]
    high_grade: f64,
    /// Attendance rate below this is High Risk
    #[arg(long, default_value_t = 70.0)]
    high_attendance: f64,
    /// Grade average below this is Medium Risk
    #[arg(long, default_value_t = 75.0)]
    medium_grade: f64,
    /// Attendance rate below this is Medium Risk
    #[arg(long, default_value_t = 80.0)]
    medium_attendance: f64,
}

impl ThresholdArgs {
    fn to_thresholds(&self) -> RiskThresholds {
        RiskThresholds {
            high_grade: self.high_grade,
            high_attendance: self.high_attendance,
            medium_grade: self.medium_grade,
            medium_attendance: self.medium_attendance,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Train the risk classifier from all student histories
    Train {
        #[arg(long, default_value = "data/risk_model.bin")]
        model_path: PathBuf,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Predict risk for a single student
    #[command(group(
        ArgGroup::new("who")
            .args(["code", "email"])
            .required(true)
            .multiple(false)
    ))]
    Predict {
        #[arg(long)]
        code: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "data/risk_model.bin")]
        model_path: PathBuf,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Predict risk across all students and persist the results
    PredictAll {
        #[arg(long, default_value = "data/risk_model.bin")]
        model_path: PathBuf,
        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Generate a markdown report from the latest assessments
    Report {
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

/// A missing or unusable artifact is not fatal; prediction degrades to the
/// rule policy.
fn load_model(path: &Path) -> Option<ModelArtifact> {
    match ModelArtifact::load(path) {
        Ok(artifact) => Some(artifact),
        Err(ModelError::NotFound(_)) => {
            tracing::info!(path = %path.display(), "no trained model yet, using rule fallback");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not load model artifact, using rule fallback");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Train {
            model_path,
            thresholds,
        } => {
            let thresholds = thresholds.to_thresholds();
            let students = db::list_students(&pool).await?;
            let mut histories = Vec::with_capacity(students.len());
            for student in &students {
                histories.push(db::fetch_history(&pool, student).await?);
            }

            match train::train(&histories, &thresholds, &train::TrainConfig::default()) {
                Ok((artifact, summary)) => {
                    artifact.save(&model_path)?;
                    println!(
                        "Model trained on {} students ({} train / {} test).",
                        summary.n_samples, summary.n_train, summary.n_test
                    );
                    println!("Accuracy: {:.3}", summary.accuracy);
                    for class in &summary.per_class {
                        println!(
                            "- {}: precision {:.2}, recall {:.2}, f1 {:.2}, support {}",
                            class.level, class.precision, class.recall, class.f1, class.support
                        );
                    }
                    println!(
                        "Artifact {} saved to {}.",
                        summary.model_version,
                        model_path.display()
                    );
                }
                Err(e @ train::TrainError::NoTrainingData)
                | Err(e @ train::TrainError::SingleClass(_)) => {
                    println!("Training skipped: {e}");
                }
                Err(train::TrainError::Model(e)) => return Err(e.into()),
            }
        }
        Commands::Predict {
            code,
            email,
            model_path,
            thresholds,
        } => {
            let thresholds = thresholds.to_thresholds();
            let student = db::find_student(&pool, code.as_deref(), email.as_deref()).await?;
            let history = db::fetch_history(&pool, &student).await?;
            let model = load_model(&model_path);
            let prediction = predict::predict_one(&history, model.as_ref(), &thresholds);
            db::save_assessment(&pool, student.id, &prediction).await?;

            println!(
                "{} ({}) -> {} at {:.0}% confidence [{}]",
                student.full_name,
                student.student_code,
                prediction.level,
                prediction.probability * 100.0,
                prediction.model_version
            );
            println!("- grade_average: {:.1}", prediction.features.grade_average);
            println!("- attendance_rate: {:.1}", prediction.features.attendance_rate);
            println!(
                "- recent_grade_average: {:.1}",
                prediction.features.recent_grade_average
            );
            println!("- grade_trend: {:.1}", prediction.features.grade_trend);
            println!(
                "- missing_assignments: {:.0}",
                prediction.features.missing_assignments
            );
            println!("- course_count: {:.0}", prediction.features.course_count);
        }
        Commands::PredictAll {
            model_path,
            thresholds,
        } => {
            let thresholds = thresholds.to_thresholds();
            let students = db::list_students(&pool).await?;
            let mut histories = Vec::with_capacity(students.len());
            for student in &students {
                let history = db::fetch_history(&pool, student)
                    .await
                    .with_context(|| format!("loading history for {}", student.student_code));
                histories.push(history);
            }

            let model = load_model(&model_path);
            let (assessments, load_failures) =
                predict::assess_roster(histories, model.as_ref(), &thresholds);

            let mut outcome = predict::BatchOutcome {
                failed: load_failures,
                ..Default::default()
            };
            let mut notifier = notify::LogNotifier;

            for (student, prediction) in &assessments {
                match db::save_assessment(&pool, student.id, prediction).await {
                    Ok(()) => {
                        outcome.updated += 1;
                        if prediction.level == RiskLevel::High {
                            outcome.high_risk += 1;
                            let message = notify::alert_message(student, prediction);
                            if let Err(e) =
                                db::insert_notification(&pool, student.id, &message, "high").await
                            {
                                tracing::warn!(
                                    student = %student.student_code,
                                    error = %e,
                                    "failed to record notification"
                                );
                            }
                            notifier.notify_high_risk(student, prediction);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            student = %student.student_code,
                            error = %e,
                            "failed to persist assessment"
                        );
                        outcome.failed += 1;
                    }
                }
            }

            println!(
                "Assessed {} students: {} high risk, {} failed.",
                outcome.updated, outcome.high_risk, outcome.failed
            );
        }
        Commands::Report { out } => {
            let assessments = db::latest_assessments(&pool).await?;
            let report = report::build_report(&assessments, chrono::Utc::now().date_naive());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
