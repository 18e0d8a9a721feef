// Language configuration management for the execution subsystem
use crate::error::ExecutorError;
use runbox_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/languages.json";

const DEFAULT_MEMORY_LIMIT_MB: u32 = 256;
const DEFAULT_CPU_LIMIT: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: Language,
    pub display_name: String,
    pub version: String,
    pub worker_image: String,
    /// Relative to the docker directory
    pub worker_dockerfile: String,
    /// Relative to the docker directory
    pub ephemeral_dockerfile: String,
    pub memory_limit_mb: u32,
    /// Fractional CPUs, e.g. 0.5
    pub cpu_limit: f32,
}

impl LanguageConfig {
    pub fn builtin(language: Language) -> Self {
        Self {
            name: language,
            display_name: language.display_name().to_string(),
            version: language.version_label().to_string(),
            worker_image: language.default_worker_image(),
            worker_dockerfile: language.default_worker_dockerfile(),
            ephemeral_dockerfile: language.default_ephemeral_dockerfile(),
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            cpu_limit: DEFAULT_CPU_LIMIT,
        }
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Per-language settings, always complete: entries missing from the file
/// fall back to [`LanguageConfig::builtin`].
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    pub fn builtin() -> Self {
        let configs = Language::ALL
            .iter()
            .map(|lang| (*lang, LanguageConfig::builtin(*lang)))
            .collect();
        Self { configs }
    }

    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self, ExecutorError> {
        if !config_path.exists() {
            return Err(ExecutorError::Config(format!(
                "Language config file not found: {}",
                config_path.display()
            )));
        }

        let content = fs::read_to_string(config_path)
            .map_err(|e| ExecutorError::Config(format!("Failed to read languages.json: {}", e)))?;
        Self::from_json(&content)
    }

    /// Like [`load`](Self::load), but a missing file means built-in defaults
    pub fn load_or_builtin(config_path: &Path) -> Result<Self, ExecutorError> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            tracing::info!(
                path = %config_path.display(),
                "No language config file, using built-in defaults"
            );
            Ok(Self::builtin())
        }
    }

    pub fn from_json(content: &str) -> Result<Self, ExecutorError> {
        let languages_json: LanguagesJson = serde_json::from_str(content)
            .map_err(|e| ExecutorError::Config(format!("Failed to parse languages.json: {}", e)))?;

        let mut manager = Self::builtin();
        for lang in languages_json.languages {
            if lang.cpu_limit <= 0.0 || lang.memory_limit_mb == 0 {
                return Err(ExecutorError::Config(format!(
                    "Resource limits for {} must be positive",
                    lang.name
                )));
            }
            manager.configs.insert(lang.name, lang);
        }
        Ok(manager)
    }

    pub fn get(&self, language: Language) -> &LanguageConfig {
        // populated for every variant by construction
        &self.configs[&language]
    }

    pub fn list_languages(&self) -> Vec<Language> {
        let mut langs: Vec<Language> = self.configs.keys().copied().collect();
        langs.sort_by_key(|l| l.id());
        langs
    }
}
