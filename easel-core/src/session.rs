use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::request::{DEFAULT_GUIDANCE_SCALE, DEFAULT_STEPS, GUIDANCE_SCALE_RANGE, STEPS_RANGE};
use crate::{EngineError, GenerationRequest, ModelRegistry, Seed, SessionError};

/// Session file name, relative to the working directory.
pub const DEFAULT_SESSION_FILE: &str = "session_config.json";

/// Last-used request fields, persisted between runs. Missing fields take their
/// defaults individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub prompt: String,
    pub neg_prompt: String,
    pub model_name: String,
    pub steps: u32,
    pub cfg: f64,
    pub seed: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            neg_prompt: String::new(),
            model_name: ModelRegistry::default_descriptor().display_name.to_string(),
            steps: DEFAULT_STEPS,
            cfg: DEFAULT_GUIDANCE_SCALE,
            seed: Seed::RANDOM_SENTINEL,
        }
    }
}

impl SessionConfig {
    pub fn from_request(request: &GenerationRequest) -> Self {
        Self {
            prompt: request.prompt.clone(),
            neg_prompt: request.negative_prompt.clone(),
            model_name: request.model.display_name.to_string(),
            steps: request.steps,
            cfg: request.guidance_scale,
            seed: request.seed.to_raw(),
        }
    }

    /// Builds a request from the stored fields. Fails on an unregistered model
    /// name or an out-of-range seed; the remaining fields are checked by the
    /// engine.
    pub fn to_request(&self) -> Result<GenerationRequest, EngineError> {
        let model = ModelRegistry::resolve(&self.model_name)?;
        let seed = Seed::from_raw(self.seed)?;
        Ok(GenerationRequest::new(self.prompt.clone(), model)
            .with_negative_prompt(self.neg_prompt.clone())
            .with_steps(self.steps)
            .with_guidance_scale(self.cfg)
            .with_seed(seed))
    }

    /// Resets each field the engine would reject to its default, leaving the
    /// others as restored.
    fn replace_unusable_fields(&mut self) {
        let defaults = Self::default();

        if ModelRegistry::resolve(&self.model_name).is_err() {
            tracing::warn!(
                "Session names unknown model '{}', using the default",
                self.model_name
            );
            self.model_name = defaults.model_name;
        }
        if !STEPS_RANGE.contains(&self.steps) {
            tracing::warn!("Session steps {} out of range, using {}", self.steps, defaults.steps);
            self.steps = defaults.steps;
        }
        if !GUIDANCE_SCALE_RANGE.contains(&self.cfg) {
            tracing::warn!("Session cfg {} out of range, using {}", self.cfg, defaults.cfg);
            self.cfg = defaults.cfg;
        }
        if Seed::from_raw(self.seed).is_err() {
            tracing::warn!("Session seed {} out of range, using a random seed", self.seed);
            self.seed = defaults.seed;
        }
    }
}

/// Reads and writes the [`SessionConfig`] file.
#[derive(Debug, Clone)]
pub struct SessionConfigStore {
    path: PathBuf,
}

impl Default for SessionConfigStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_FILE)
    }
}

impl SessionConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing or malformed file yields the defaults.
    pub fn load(&self) -> SessionConfig {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!("No session restored from {}: {e}", self.path.display());
                return SessionConfig::default();
            }
        };

        let mut config: SessionConfig = match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Ignoring malformed session file {}: {e}",
                    self.path.display()
                );
                return SessionConfig::default();
            }
        };

        config.replace_unusable_fields();
        tracing::info!("Restored session from {}", self.path.display());
        config
    }

    /// Writes to a sibling temp file, then renames it over the session file.
    pub fn save(&self, config: &SessionConfig) -> Result<(), SessionError> {
        let json = serde_json::to_string_pretty(config)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        tracing::info!("Saved session to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> SessionConfigStore {
        SessionConfigStore::new(dir.path().join(DEFAULT_SESSION_FILE))
    }

    fn defaults() -> SessionConfig {
        SessionConfig {
            prompt: String::new(),
            neg_prompt: String::new(),
            model_name: "Stable Diffusion v1.5".to_string(),
            steps: 25,
            cfg: 7.5,
            seed: -1,
        }
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(store_in(&dir).load(), defaults());
    }

    #[test]
    fn partial_file_keeps_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"steps": 50}"#).unwrap();

        let expected = SessionConfig {
            steps: 50,
            ..defaults()
        };
        assert_eq!(store.load(), expected);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        for contents in ["not json", r#"{"steps": "many"}"#, "[1, 2]", ""] {
            fs::write(store.path(), contents).unwrap();
            assert_eq!(store.load(), defaults(), "contents: {contents:?}");
        }
    }

    #[test]
    fn unknown_model_name_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), r#"{"model_name": "Midjourney", "prompt": "cat"}"#).unwrap();

        let config = store.load();
        assert_eq!(config.model_name, "Stable Diffusion v1.5");
        assert_eq!(config.prompt, "cat");
    }

    #[test]
    fn out_of_range_fields_fall_back_individually() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let cases = [
            (r#"{"prompt": "cat", "steps": 5}"#, "steps"),
            (r#"{"prompt": "cat", "seed": -5}"#, "seed"),
            (r#"{"prompt": "cat", "seed": 4294967296}"#, "seed"),
            (r#"{"prompt": "cat", "cfg": 99.0}"#, "cfg"),
        ];
        for (contents, field) in cases {
            fs::write(store.path(), contents).unwrap();
            let config = store.load();
            assert_eq!(config.prompt, "cat", "{field}");
            assert_eq!(
                config,
                SessionConfig {
                    prompt: "cat".to_string(),
                    ..defaults()
                },
                "{field} not reset"
            );
            let request = config.to_request().unwrap();
            assert!(request.validate().is_ok(), "{field}");
        }
    }

    #[test]
    fn in_range_fields_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{"prompt": "cat", "steps": 150, "cfg": 1.0, "seed": 0}"#,
        )
        .unwrap();

        let config = store.load();
        assert_eq!((config.steps, config.cfg, config.seed), (150, 1.0, 0));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let config = SessionConfig {
            prompt: "Photo of a majestic lion drinking from a river".to_string(),
            neg_prompt: "cartoon, blurry".to_string(),
            model_name: "Kandinsky 2.2".to_string(),
            steps: 30,
            cfg: 12.5,
            seed: 4_294_967_295,
        };

        store.save(&config).unwrap();
        assert_eq!(store.load(), config);

        let overwritten = SessionConfig {
            seed: -1,
            ..config
        };
        store.save(&overwritten).unwrap();
        assert_eq!(store.load(), overwritten);
    }

    #[test]
    fn file_uses_flat_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save(&defaults()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        for key in ["prompt", "neg_prompt", "model_name", "steps", "cfg", "seed"] {
            assert!(raw.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn request_conversion_round_trips() {
        let config = SessionConfig {
            prompt: "a red cube".to_string(),
            seed: 42,
            ..defaults()
        };
        let request = config.to_request().unwrap();
        assert_eq!(request.seed, Seed::Fixed(42));
        assert_eq!(request.model, ModelRegistry::default_descriptor());
        assert_eq!(SessionConfig::from_request(&request), config);
    }

    #[test]
    fn to_request_rejects_unknown_model() {
        let config = SessionConfig {
            model_name: "nope".to_string(),
            ..defaults()
        };
        assert!(matches!(
            config.to_request(),
            Err(EngineError::UnknownModel(_))
        ));
    }
}
