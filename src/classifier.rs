use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters, SplitCriterion,
};
use thiserror::Error;

use crate::features::FEATURE_NAMES;
use crate::models::RiskLevel;

/// Bump when the serialized artifact layout changes.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

const N_CLASSES: usize = 3;

type Tree = DecisionTreeClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("no trained model at {0}")]
    NotFound(PathBuf),
    #[error("failed to read model artifact: {0}")]
    Io(String),
    #[error("model artifact is corrupt: {0}")]
    Corrupt(String),
    #[error("feature manifest mismatch: artifact was trained on {found:?}")]
    FeatureMismatch { found: Vec<String> },
    #[error("model fitting failed: {0}")]
    Fit(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Small deterministic generator so bootstrap sampling and data splits are
/// reproducible without pulling in an RNG crate.
#[derive(Debug, Clone)]
pub(crate) struct Lcg(u64);

impl Lcg {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(2) | 1)
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0
    }

    pub(crate) fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub(crate) fn next_usize(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound.max(1) as u64) as usize
    }
}

/// Per-feature standardization fitted on the training split. The fitted
/// means and deviations travel inside the artifact so serving scales inputs
/// exactly the way training did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len().max(1) as f64;

        let mut means = vec![0.0; n_features];
        for row in rows {
            for (i, value) in row.iter().enumerate() {
                means[i] += value;
            }
        }
        for mean in means.iter_mut() {
            *mean /= n;
        }

        let mut stds = vec![0.0; n_features];
        for row in rows {
            for (i, value) in row.iter().enumerate() {
                let d = value - means[i];
                stds[i] += d * d;
            }
        }
        for std in stds.iter_mut() {
            *std = (*std / n).sqrt();
            // A constant feature scales by 1 instead of dividing by zero.
            if *std < 1e-12 {
                *std = 1.0;
            }
        }

        Self { means, stds }
    }

    pub fn arity(&self) -> usize {
        self.means.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(value, (mean, std))| (value - mean) / std)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: u16,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            seed: 42,
        }
    }
}

/// Bagged decision trees with class-balanced bootstrap sampling. The
/// reported probability is the share of trees voting for the winning class.
#[derive(Serialize, Deserialize)]
pub struct RiskForest {
    trees: Vec<Tree>,
}

impl RiskForest {
    pub fn fit(rows: &[Vec<f64>], labels: &[usize], config: &ForestConfig) -> Result<Self, ModelError> {
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(ModelError::Fit(format!(
                "expected matching non-empty samples and labels, got {} and {}",
                rows.len(),
                labels.len()
            )));
        }

        // Inverse-frequency weights so minority classes are sampled into
        // each bootstrap at the same effective rate as majority classes.
        let mut class_counts = [0usize; N_CLASSES];
        for &label in labels {
            if label >= N_CLASSES {
                return Err(ModelError::Fit(format!("label {label} out of range")));
            }
            class_counts[label] += 1;
        }
        let observed = class_counts.iter().filter(|&&c| c > 0).count().max(1);
        let weights: Vec<f64> = labels
            .iter()
            .map(|&label| rows.len() as f64 / (observed as f64 * class_counts[label] as f64))
            .collect();
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for w in &weights {
            total += w;
            cumulative.push(total);
        }

        let mut rng = Lcg::new(config.seed);
        let mut trees = Vec::with_capacity(config.n_trees);

        for _ in 0..config.n_trees {
            let mut sample_rows = Vec::with_capacity(rows.len());
            let mut sample_labels = Vec::with_capacity(rows.len());
            for _ in 0..rows.len() {
                let draw = rng.next_f64() * total;
                let index = cumulative.partition_point(|&c| c < draw).min(rows.len() - 1);
                sample_rows.push(rows[index].clone());
                sample_labels.push(labels[index] as i32);
            }

            let x = to_matrix(&sample_rows);
            let params = DecisionTreeClassifierParameters::default()
                .with_max_depth(config.max_depth)
                .with_criterion(SplitCriterion::Gini);
            let tree = DecisionTreeClassifier::fit(&x, &sample_labels, params)
                .map_err(|e| ModelError::Fit(format!("decision tree fit failed: {e}")))?;
            trees.push(tree);
        }

        Ok(Self { trees })
    }

    /// Vote distribution over the three classes for one feature row.
    pub fn predict_proba(&self, row: &[f64]) -> Result<[f64; N_CLASSES], ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::Inference("forest has no trees".to_string()));
        }
        let x = to_matrix(&[row.to_vec()]);
        let mut votes = [0usize; N_CLASSES];
        for tree in &self.trees {
            let predicted = tree
                .predict(&x)
                .map_err(|e| ModelError::Inference(format!("tree prediction failed: {e}")))?;
            let class = predicted[0];
            if class < 0 || class as usize >= N_CLASSES {
                return Err(ModelError::Inference(format!("vote for class {class} out of range")));
            }
            votes[class as usize] += 1;
        }
        let total = self.trees.len() as f64;
        Ok([
            votes[0] as f64 / total,
            votes[1] as f64 / total,
            votes[2] as f64 / total,
        ])
    }

    /// Winning class index and its vote share.
    pub fn predict(&self, row: &[f64]) -> Result<(usize, f64), ModelError> {
        let proba = self.predict_proba(row)?;
        let mut best = 0;
        for class in 1..N_CLASSES {
            if proba[class] > proba[best] {
                best = class;
            }
        }
        Ok((best, proba[best]))
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Result<Vec<usize>, ModelError> {
        rows.iter().map(|r| self.predict(r).map(|(c, _)| c)).collect()
    }
}

fn to_matrix(rows: &[Vec<f64>]) -> DenseMatrix<f64> {
    let nrows = rows.len();
    let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
    let data: Vec<f64> = rows.iter().flatten().copied().collect();
    DenseMatrix::new(nrows, ncols, data, false)
}

/// The one persisted model: fitted scaler + forest plus the manifest that
/// pins feature order and records held-out accuracy.
#[derive(Serialize, Deserialize)]
pub struct ModelArtifact {
    format_version: u32,
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub accuracy: f64,
    scaler: StandardScaler,
    forest: RiskForest,
}

impl ModelArtifact {
    pub fn new(scaler: StandardScaler, forest: RiskForest, accuracy: f64) -> Self {
        let trained_at = Utc::now();
        Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            version: format!("forest-{}", trained_at.format("%Y%m%dT%H%M%SZ")),
            trained_at,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            accuracy,
            scaler,
            forest,
        }
    }

    /// Scale then classify one feature vector. The caller decides what a
    /// failure means; serving falls back to the rule policy.
    pub fn predict(&self, features: &[f64]) -> Result<(RiskLevel, f64), ModelError> {
        if features.len() != self.feature_names.len() || features.len() != self.scaler.arity() {
            return Err(ModelError::FeatureMismatch {
                found: self.feature_names.clone(),
            });
        }
        let scaled = self.scaler.transform_row(features);
        let (class, probability) = self.forest.predict(&scaled)?;
        let level = RiskLevel::from_class_index(class)
            .ok_or_else(|| ModelError::Inference(format!("class index {class} out of range")))?;
        Ok((level, probability))
    }

    /// Write atomically: serialize to a sibling temp file, then rename, so a
    /// half-written artifact can never shadow a valid one.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ModelError::Io(e.to_string()))?;
            }
        }
        let bytes = bincode::serialize(self).map_err(|e| ModelError::Corrupt(e.to_string()))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, bytes).map_err(|e| ModelError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| ModelError::Io(e.to_string()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(ModelError::Io(e.to_string())),
        };
        let artifact: ModelArtifact =
            bincode::deserialize(&bytes).map_err(|e| ModelError::Corrupt(e.to_string()))?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(ModelError::Corrupt(format!(
                "unsupported artifact format {}",
                artifact.format_version
            )));
        }
        if artifact.feature_names != FEATURE_NAMES {
            return Err(ModelError::FeatureMismatch {
                found: artifact.feature_names,
            });
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ForestConfig {
        ForestConfig {
            n_trees: 15,
            max_depth: 5,
            seed: 7,
        }
    }

    /// Two well-separated clusters per class across six features.
    fn separable_dataset() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..12 {
            let jitter = i as f64 * 0.3;
            rows.push(vec![90.0 + jitter, 95.0, 90.0, 1.0, 0.0, 4.0]);
            labels.push(0);
            rows.push(vec![68.0 + jitter, 77.0, 66.0, -2.0, 2.0, 3.0]);
            labels.push(1);
            rows.push(vec![40.0 + jitter, 50.0, 35.0, -8.0, 6.0, 2.0]);
            labels.push(2);
        }
        (rows, labels)
    }

    #[test]
    fn scaler_centers_and_scales() {
        let rows = vec![vec![0.0, 10.0], vec![4.0, 10.0], vec![8.0, 10.0]];
        let scaler = StandardScaler::fit(&rows);
        let mid = scaler.transform_row(&[4.0, 10.0]);
        assert!(mid[0].abs() < 1e-9);
        // Constant column passes through unscaled instead of dividing by zero.
        assert!(mid[1].abs() < 1e-9);
        let low = scaler.transform_row(&[0.0, 10.0]);
        let high = scaler.transform_row(&[8.0, 10.0]);
        assert!((low[0] + high[0]).abs() < 1e-9);
    }

    #[test]
    fn forest_learns_separable_classes() {
        let (rows, labels) = separable_dataset();
        let scaler = StandardScaler::fit(&rows);
        let scaled = scaler.transform(&rows);
        let forest = RiskForest::fit(&scaled, &labels, &test_config()).unwrap();

        let (class, probability) = forest
            .predict(&scaler.transform_row(&[92.0, 96.0, 91.0, 0.5, 0.0, 4.0]))
            .unwrap();
        assert_eq!(class, 0);
        assert!(probability > 0.5);

        let (class, _) = forest
            .predict(&scaler.transform_row(&[38.0, 48.0, 33.0, -9.0, 7.0, 2.0]))
            .unwrap();
        assert_eq!(class, 2);
    }

    #[test]
    fn vote_shares_form_a_distribution() {
        let (rows, labels) = separable_dataset();
        let forest = RiskForest::fit(&rows, &labels, &test_config()).unwrap();
        let proba = forest.predict_proba(&rows[0]).unwrap();
        let sum: f64 = proba.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn fitting_is_deterministic_for_a_fixed_seed() {
        let (rows, labels) = separable_dataset();
        let a = RiskForest::fit(&rows, &labels, &test_config()).unwrap();
        let b = RiskForest::fit(&rows, &labels, &test_config()).unwrap();
        for row in &rows {
            assert_eq!(a.predict(row).unwrap(), b.predict(row).unwrap());
        }
    }

    #[test]
    fn artifact_round_trip_preserves_predictions() {
        let (rows, labels) = separable_dataset();
        let scaler = StandardScaler::fit(&rows);
        let scaled = scaler.transform(&rows);
        let forest = RiskForest::fit(&scaled, &labels, &test_config()).unwrap();
        let artifact = ModelArtifact::new(scaler, forest, 0.9);

        let fixed = [55.0, 65.0, 50.0, -5.0, 3.0, 2.0];
        let before = artifact.predict(&fixed).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_model.bin");
        artifact.save(&path).unwrap();

        let reloaded = ModelArtifact::load(&path).unwrap();
        let after = reloaded.predict(&fixed).unwrap();
        assert_eq!(before.0, after.0);
        assert!((before.1 - after.1).abs() < 1e-12);
        assert_eq!(reloaded.accuracy, 0.9);
        assert_eq!(reloaded.feature_names, FEATURE_NAMES);
    }

    #[test]
    fn loading_a_missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelArtifact::load(&dir.path().join("absent.bin")).unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }

    #[test]
    fn loading_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_model.bin");
        std::fs::write(&path, b"not a model").unwrap();
        let err = ModelArtifact::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::Corrupt(_)));
    }

    #[test]
    fn predicting_with_wrong_arity_is_a_feature_mismatch() {
        let (rows, labels) = separable_dataset();
        let scaler = StandardScaler::fit(&rows);
        let forest = RiskForest::fit(&rows, &labels, &test_config()).unwrap();
        let artifact = ModelArtifact::new(scaler, forest, 0.5);
        let err = artifact.predict(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, ModelError::FeatureMismatch { .. }));
    }

    #[test]
    fn lcg_is_reproducible() {
        let mut a = Lcg::new(42);
        let mut b = Lcg::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
        let mut c = Lcg::new(42);
        for _ in 0..100 {
            let v = c.next_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }
}
