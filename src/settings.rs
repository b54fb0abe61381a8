use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HaulbookError, Result};
use crate::models::Role;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: String,
    pub user_id: String,
    pub role: String,
    pub ocr_provider: String,
    pub tesseract_path: String,
    pub ocr_max_attempts: u32,
    pub ocr_base_delay_ms: u64,
    pub presign_expiry_secs: u64,
    pub signing_secret: String,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user_id: String::new(),
            role: Role::Driver.as_str().to_string(),
            ocr_provider: "sample".to_string(),
            tesseract_path: "tesseract".to_string(),
            ocr_max_attempts: 3,
            ocr_base_delay_ms: 1000,
            presign_expiry_secs: 3600,
            signing_secret: String::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.ocr_max_attempts,
            Duration::from_millis(self.ocr_base_delay_ms),
        )
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.presign_expiry_secs)
    }

    pub fn default_role(&self) -> Result<Role> {
        self.role.parse()
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(crate::db::DB_FILE)
    }

    pub fn objects_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("objects")
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("haulbook")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("haulbook")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| HaulbookError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(s.user_id.is_empty());
        assert_eq!(s.ocr_provider, "sample");
        assert_eq!(s.presign_expiry_secs, 3600);
        assert_eq!(s.default_role().unwrap(), Role::Driver);
        assert!(s.data_dir.ends_with("haulbook"));
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/fleet", "user_id": "dispatch", "role": "manager"}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.user_id, "dispatch");
        assert_eq!(s.default_role().unwrap(), Role::Manager);
        assert_eq!(s.ocr_max_attempts, 3);
        assert_eq!(s.log_level, "info");
        assert_eq!(s.db_path(), PathBuf::from("/tmp/fleet/haulbook.db"));
    }

    #[test]
    fn test_retry_policy_from_settings() {
        let s = Settings {
            ocr_max_attempts: 5,
            ocr_base_delay_ms: 250,
            ..Settings::default()
        };
        let policy = s.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_after(2), Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_role_is_an_error() {
        let s = Settings {
            role: "dispatcher".to_string(),
            ..Settings::default()
        };
        assert!(matches!(s.default_role(), Err(HaulbookError::Settings(_))));
    }

    #[test]
    fn test_roundtrip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            signing_secret: "abc123".to_string(),
            ..Settings::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();
        let loaded: Settings =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.signing_secret, "abc123");
    }
}
