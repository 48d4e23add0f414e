use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::engine::EngineError;

pub const MODEL_VERSION: u32 = 1;

/// Harmonic bins in the stock models
pub const DEFAULT_HARMONICS: usize = 60;
/// Noise filter bands in the stock models (128-tap filter)
pub const DEFAULT_NOISE_BANDS: usize = 65;

/// Static timbre for the harmonic-plus-noise engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimbreModel {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub name: String,
    /// Relative weight per harmonic, fundamental first
    pub harmonics: Vec<f32>,
    /// Noise filter magnitude per band, DC to Nyquist; empty for no noise
    #[serde(default)]
    pub noise_magnitudes: Vec<f32>,
    #[serde(default = "unity")]
    pub harmonic_gain: f32,
    #[serde(default = "unity")]
    pub noise_gain: f32,
    /// dB spanned by loudness 0..1
    #[serde(default = "default_loudness_range")]
    pub loudness_range_db: f32,
}

fn default_version() -> u32 {
    MODEL_VERSION
}

fn unity() -> f32 {
    1.0
}

fn default_loudness_range() -> f32 {
    40.0
}

impl TimbreModel {
    /// Load and validate a model file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::ModelNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // Peek at version before committing to the layout
        let raw: Value = serde_json::from_str(&json).map_err(|source| EngineError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
        if version > MODEL_VERSION {
            return Err(EngineError::InvalidModel(format!(
                "model version {} is newer than supported version {}",
                version, MODEL_VERSION
            )));
        }

        let model: TimbreModel =
            serde_json::from_value(raw).map_err(|source| EngineError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.harmonics.is_empty() {
            return Err(EngineError::InvalidModel("no harmonics".into()));
        }
        if self.noise_magnitudes.len() == 1 {
            return Err(EngineError::InvalidModel(
                "noise needs at least 2 bands".into(),
            ));
        }
        check_weights("harmonics", &self.harmonics)?;
        check_weights("noise_magnitudes", &self.noise_magnitudes)?;
        check_weights(
            "gains",
            &[self.harmonic_gain, self.noise_gain, self.loudness_range_db],
        )?;
        Ok(())
    }

    /// Noise filter length implied by the band count
    pub fn noise_taps(&self) -> usize {
        self.noise_magnitudes.len().saturating_sub(1) * 2
    }
}

fn check_weights(field: &str, values: &[f32]) -> Result<(), EngineError> {
    match values.iter().position(|v| !v.is_finite() || *v < 0.0) {
        Some(i) => Err(EngineError::InvalidModel(format!(
            "{}[{}] must be finite and non-negative, got {}",
            field, i, values[i]
        ))),
        None => Ok(()),
    }
}

impl Default for TimbreModel {
    /// Bowed-string-like spectrum with a little breath noise
    fn default() -> Self {
        let harmonics = (1..=DEFAULT_HARMONICS).map(|k| 1.0 / k as f32).collect();
        let noise_magnitudes = (0..DEFAULT_NOISE_BANDS)
            .map(|band| 0.02 * (-(band as f32) / 16.0).exp())
            .collect();
        Self {
            version: MODEL_VERSION,
            name: "default".to_string(),
            harmonics,
            noise_magnitudes,
            harmonic_gain: 1.0,
            noise_gain: 1.0,
            loudness_range_db: default_loudness_range(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_model(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_model_with_defaults() {
        let file = write_model(r#"{"harmonics": [1.0, 0.5]}"#);
        let model = TimbreModel::load(file.path()).unwrap();
        assert_eq!(model.harmonics, vec![1.0, 0.5]);
        assert!(model.noise_magnitudes.is_empty());
        assert_eq!(model.harmonic_gain, 1.0);
        assert_eq!(model.loudness_range_db, 40.0);
        assert_eq!(model.noise_taps(), 0);
    }

    #[test]
    fn missing_file_is_model_not_found() {
        let err = TimbreModel::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, EngineError::ModelNotFound(_)));
        assert!(err.to_string().starts_with("Model not found"));
    }

    #[test]
    fn rejects_bad_models() {
        for json in [
            r#"{"harmonics": []}"#,
            r#"{"harmonics": [1.0, -0.5]}"#,
            r#"{"harmonics": [1.0], "noise_magnitudes": [0.1]}"#,
            r#"{"harmonics": [1.0], "noise_gain": -1}"#,
            r#"{"version": 99, "harmonics": [1.0]}"#,
        ] {
            let file = write_model(json);
            assert!(
                matches!(TimbreModel::load(file.path()), Err(EngineError::InvalidModel(_))),
                "{} should be invalid",
                json
            );
        }

        let file = write_model("not json");
        assert!(matches!(
            TimbreModel::load(file.path()),
            Err(EngineError::Parse { .. })
        ));
    }

    #[test]
    fn default_model_is_valid() {
        let model = TimbreModel::default();
        model.validate().unwrap();
        assert_eq!(model.noise_taps(), 128);
    }
}
