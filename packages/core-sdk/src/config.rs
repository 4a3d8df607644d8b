use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::db::DEFAULT_DB_FILE;
use crate::prompt::{DATASET_PLACEHOLDER, DEFAULT_SYSTEM_PROMPT, SCHEMA_PLACEHOLDER};

pub const DEFAULT_ADDR: &str = "127.0.0.1:5173";
pub const DEFAULT_UI_DIR: &str = "web";

/**
 * \brief Process-level settings for `serve` and the CLI.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /** \brief Listen address, e.g. `127.0.0.1:5173` */
    pub addr: String,
    /** \brief Optional chart system-prompt template file */
    pub prompt_file: Option<PathBuf>,
    /** \brief Static UI root served for non-API paths */
    pub ui_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            prompt_file: None,
            ui_dir: PathBuf::from(DEFAULT_UI_DIR),
            db_path: PathBuf::from(DEFAULT_DB_FILE),
        }
    }
}

impl ServerSettings {
    /**
     * \brief Reads `CHARTPILOT_ADDR`, `CHARTPILOT_PROMPT_FILE`, `CHARTPILOT_UI_DIR`, `CHARTPILOT_DB`.
     */
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            addr: get("CHARTPILOT_ADDR").unwrap_or(defaults.addr),
            prompt_file: get("CHARTPILOT_PROMPT_FILE").map(PathBuf::from),
            ui_dir: get("CHARTPILOT_UI_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.ui_dir),
            db_path: get("CHARTPILOT_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        }
    }

    pub fn load_prompt_template(&self) -> Result<String> {
        load_prompt_template(self.prompt_file.as_deref())
    }
}

/**
 * \brief Reads a template file, or returns the built-in template when `path` is `None`.
 */
pub fn load_prompt_template(path: Option<&Path>) -> Result<String> {
    let Some(path) = path else {
        return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
    };
    let template = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt template {}", path.display()))?;
    for placeholder in [SCHEMA_PLACEHOLDER, DATASET_PLACEHOLDER] {
        if !template.contains(placeholder) {
            warn!(
                "prompt template {} has no {} placeholder; chart requests will be rejected",
                path.display(),
                placeholder
            );
        }
    }
    info!("loaded prompt template from {}", path.display());
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_unset() {
        let s = ServerSettings::from_lookup(|_| None);
        assert_eq!(s, ServerSettings::default());
        assert_eq!(s.addr, DEFAULT_ADDR);
    }

    #[test]
    fn test_lookup_overrides_and_blank_values() {
        let env: HashMap<&str, &str> = [
            ("CHARTPILOT_ADDR", "0.0.0.0:8080"),
            ("CHARTPILOT_PROMPT_FILE", "prompts/chart.txt"),
            ("CHARTPILOT_UI_DIR", "   "),
            ("CHARTPILOT_DB", "/tmp/cp.db"),
        ]
        .into_iter()
        .collect();
        let s = ServerSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.addr, "0.0.0.0:8080");
        assert_eq!(s.prompt_file, Some(PathBuf::from("prompts/chart.txt")));
        assert_eq!(s.ui_dir, PathBuf::from(DEFAULT_UI_DIR));
        assert_eq!(s.db_path, PathBuf::from("/tmp/cp.db"));
    }

    #[test]
    fn test_load_prompt_template() {
        assert_eq!(load_prompt_template(None).expect("default"), DEFAULT_SYSTEM_PROMPT);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "S {{SCHEMA}} D {{DATASET}}").expect("write");
        assert_eq!(
            load_prompt_template(Some(&path)).expect("file"),
            "S {{SCHEMA}} D {{DATASET}}"
        );

        let missing = dir.path().join("nope.txt");
        let err = load_prompt_template(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("failed to read prompt template"));
    }
}
