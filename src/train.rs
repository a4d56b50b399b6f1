use thiserror::Error;

use crate::classifier::{ForestConfig, Lcg, ModelArtifact, ModelError, RiskForest, StandardScaler};
use crate::features::{extract_features, FEATURE_NAMES};
use crate::models::{RiskLevel, StudentHistory};
use crate::risk::{classify_by_rules, RiskThresholds};

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("no training data: the student roster produced no samples")]
    NoTrainingData,
    #[error("training data contains only the \"{0}\" class; at least two classes are required")]
    SingleClass(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, Copy)]
pub struct TrainConfig {
    pub test_fraction: f64,
    pub seed: u64,
    pub forest: ForestConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            forest: ForestConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassReport {
    pub level: RiskLevel,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_version: String,
    pub accuracy: f64,
    pub feature_names: Vec<String>,
    pub n_samples: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub per_class: Vec<ClassReport>,
}

/// Feature vectors plus labels for every student on the roster. Labels come
/// from the same threshold policy the serving fallback uses, so the class
/// encoding is identical on both sides.
pub fn build_dataset(
    histories: &[StudentHistory],
    thresholds: &RiskThresholds,
) -> (Vec<Vec<f64>>, Vec<usize>) {
    let mut rows = Vec::with_capacity(histories.len());
    let mut labels = Vec::with_capacity(histories.len());
    for history in histories {
        let features = extract_features(history);
        let level = classify_by_rules(features.grade_average, features.attendance_rate, thresholds);
        let Some(label) = level.class_index() else {
            continue;
        };
        rows.push(features.to_vector());
        labels.push(label);
    }
    (rows, labels)
}

/// Seeded 80/20-style split, stratified by label. Classes too small to
/// contribute a held-out sample stay entirely in the training split.
pub fn stratified_split(
    labels: &[usize],
    test_fraction: f64,
    seed: u64,
) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); 3];
    for (index, &label) in labels.iter().enumerate() {
        by_class[label].push(index);
    }

    let mut rng = Lcg::new(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for mut members in by_class {
        for i in (1..members.len()).rev() {
            let j = rng.next_usize(i + 1);
            members.swap(i, j);
        }
        let n_test = (members.len() as f64 * test_fraction).floor() as usize;
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Fit the full pipeline and evaluate it on the held-out split. The caller
/// persists the returned artifact; nothing is written here, so a failed run
/// leaves any previous artifact untouched.
pub fn train(
    histories: &[StudentHistory],
    thresholds: &RiskThresholds,
    config: &TrainConfig,
) -> Result<(ModelArtifact, TrainingReport), TrainError> {
    let (rows, labels) = build_dataset(histories, thresholds);
    if rows.is_empty() {
        return Err(TrainError::NoTrainingData);
    }

    let mut seen = [false; 3];
    for &label in &labels {
        seen[label] = true;
    }
    if seen.iter().filter(|&&s| s).count() < 2 {
        let only = labels.first().and_then(|&l| RiskLevel::from_class_index(l));
        return Err(TrainError::SingleClass(
            only.map(|l| l.as_str().to_string()).unwrap_or_default(),
        ));
    }

    let (train_idx, test_idx) = stratified_split(&labels, config.test_fraction, config.seed);
    let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
    let train_labels: Vec<usize> = train_idx.iter().map(|&i| labels[i]).collect();

    let scaler = StandardScaler::fit(&train_rows);
    let forest = RiskForest::fit(&scaler.transform(&train_rows), &train_labels, &config.forest)?;

    // Tiny rosters can leave the test split empty; fall back to evaluating
    // on the training split rather than reporting nothing.
    let (eval_idx, n_test) = if test_idx.is_empty() {
        (&train_idx, 0)
    } else {
        (&test_idx, test_idx.len())
    };
    let eval_rows: Vec<Vec<f64>> = eval_idx.iter().map(|&i| scaler.transform_row(&rows[i])).collect();
    let eval_labels: Vec<usize> = eval_idx.iter().map(|&i| labels[i]).collect();
    let predicted = forest.predict_batch(&eval_rows)?;
    let (accuracy, per_class) = evaluate(&eval_labels, &predicted);

    let artifact = ModelArtifact::new(scaler, forest, accuracy);
    let report = TrainingReport {
        model_version: artifact.version.clone(),
        accuracy,
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        n_samples: rows.len(),
        n_train: train_idx.len(),
        n_test,
        per_class,
    };
    Ok((artifact, report))
}

/// Accuracy plus per-class precision/recall/F1 with support counts.
fn evaluate(y_true: &[usize], y_pred: &[usize]) -> (f64, Vec<ClassReport>) {
    let n = y_true.len().max(1);
    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    let accuracy = correct as f64 / n as f64;

    let mut per_class = Vec::new();
    for class in 0..3 {
        let tp = y_true
            .iter()
            .zip(y_pred)
            .filter(|(&t, &p)| t == class && p == class)
            .count();
        let fp = y_true
            .iter()
            .zip(y_pred)
            .filter(|(&t, &p)| t != class && p == class)
            .count();
        let fn_count = y_true
            .iter()
            .zip(y_pred)
            .filter(|(&t, &p)| t == class && p != class)
            .count();
        let support = y_true.iter().filter(|&&t| t == class).count();
        if support == 0 && tp + fp == 0 {
            continue;
        }

        let precision = if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            0.0
        };
        let recall = if tp + fn_count > 0 {
            tp as f64 / (tp + fn_count) as f64
        } else {
            0.0
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        if let Some(level) = RiskLevel::from_class_index(class) {
            per_class.push(ClassReport {
                level,
                precision,
                recall,
                f1,
                support,
            });
        }
    }
    (accuracy, per_class)
}
