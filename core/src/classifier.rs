//! Pointwise relevance classifier.

use crate::RankError;
use serde::Deserialize;
use std::path::Path;

/// Logistic regression over the two similarity features
/// `[qe_score, te_score]`, trained offline and exported as a small JSON
/// artifact. Loaded once at startup and shared read-only across requests.
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    coefficients: Vec<f32>,
    intercept: f32,
}

impl LogisticModel {
    pub const NUM_FEATURES: usize = 2;

    pub fn new(coefficients: [f32; Self::NUM_FEATURES], intercept: f32) -> Self {
        Self {
            coefficients: coefficients.to_vec(),
            intercept,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, RankError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RankError::Validation(format!(
                "could not read classifier artifact {}: {err}",
                path.display()
            ))
        })?;
        let model: Self = serde_json::from_str(&raw).map_err(|err| {
            RankError::Validation(format!("could not parse classifier artifact: {err}"))
        })?;

        if model.coefficients.len() != Self::NUM_FEATURES {
            return Err(RankError::Validation(format!(
                "classifier artifact has {} coefficients, expected {}",
                model.coefficients.len(),
                Self::NUM_FEATURES
            )));
        }
        Ok(model)
    }

    /// Probability of the positive class for each feature row.
    pub fn predict_proba(&self, features: &[[f32; Self::NUM_FEATURES]]) -> Vec<f32> {
        features
            .iter()
            .map(|row| {
                let logit = self.intercept
                    + row
                        .iter()
                        .zip(self.coefficients.iter())
                        .map(|(x, w)| x * w)
                        .sum::<f32>();
                // Sigmoid
                1.0 / (1.0 + (-logit).exp())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn model(coefficients: Vec<f32>, intercept: f32) -> LogisticModel {
        LogisticModel {
            coefficients,
            intercept,
        }
    }

    #[test]
    fn test_zero_features_give_intercept_prior() {
        let m = model(vec![1.0, 1.0], 0.0);
        let probs = m.predict_proba(&[[0.0, 0.0]]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_monotone_in_positive_coefficients() {
        let m = model(vec![2.0, 1.0], -0.5);
        let probs = m.predict_proba(&[[0.1, 0.1], [0.5, 0.5], [0.9, 0.9]]);
        assert!(probs[0] < probs[1]);
        assert!(probs[1] < probs[2]);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"coefficients": [1.5, -0.25], "intercept": 0.1}}"#).unwrap();

        let m = LogisticModel::from_file(file.path()).unwrap();
        assert_eq!(m.coefficients, vec![1.5, -0.25]);
        assert_eq!(m.intercept, 0.1);
    }

    #[test]
    fn test_from_file_rejects_wrong_arity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"coefficients": [1.0], "intercept": 0.0}}"#).unwrap();

        assert!(matches!(
            LogisticModel::from_file(file.path()),
            Err(RankError::Validation(_))
        ));
    }
}
