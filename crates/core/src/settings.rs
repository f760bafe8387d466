use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigPatch;

/// Demo-shell settings persisted next to the binary as `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub task: String,
    /// Lua decision script; the simulated model is used when unset.
    pub script: Option<PathBuf>,
    pub watch_interval_ms: u64,
    pub change_threshold: u64,
    /// Seconds between planned actions (jittered).
    pub action_pause: f64,
    pub screenshot_dir: PathBuf,
    pub engine: ConfigPatch,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            task: String::new(),
            script: None,
            watch_interval_ms: 1000,
            change_threshold: 1000,
            action_pause: 0.5,
            screenshot_dir: PathBuf::from("screenshots"),
            engine: ConfigPatch::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(&dir.path().join("nope.json")), Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut s = Settings::default();
        s.task = "open browser and go to github".into();
        s.engine.temperature = Some(0.2);
        s.save(&path);
        assert_eq!(Settings::load(&path), s);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"change_threshold": 5}"#).unwrap();
        let s = Settings::load(&path);
        assert_eq!(s.change_threshold, 5);
        assert_eq!(s.watch_interval_ms, 1000);
    }
}
