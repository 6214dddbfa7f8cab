use crate::models::types::GlobalConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ConfigManager {
    pub global: GlobalConfig,
    config_path: String,
}

impl ConfigManager {
    pub fn new(config_path: &str) -> Result<Self, ConfigError> {
        let mut manager = Self {
            global: GlobalConfig::default(),
            config_path: config_path.to_string(),
        };

        manager.load_config()?;
        Ok(manager)
    }

    pub fn load_config(&mut self) -> Result<(), ConfigError> {
        if Path::new(&self.config_path).exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let config_data: ConfigData = serde_json::from_str(&content)?;
            self.global = config_data.global.unwrap_or_default();
        } else {
            log::info!("[Core.config] 找不到 {}，已建立預設設定", self.config_path);
            self.save_config()?;
        }

        Ok(())
    }

    pub fn save_config(&self) -> Result<(), ConfigError> {
        let config_data = ConfigData {
            global: Some(self.global.clone()),
        };

        let content = serde_json::to_string_pretty(&config_data)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }

    pub fn is_owner(&self, aid: i64) -> bool {
        self.global.owner == Some(aid)
    }

    pub fn is_admin(&self, aid: i64) -> bool {
        self.global.is_admin(aid)
    }

    pub fn bind_owner(&mut self, aid: i64) -> Result<(), ConfigError> {
        self.global.owner = Some(aid);
        self.save_config()
    }

    pub fn add_admin(&mut self, aid: i64) -> Result<bool, ConfigError> {
        if self.global.admins.contains(&aid) {
            return Ok(false);
        }

        self.global.admins.push(aid);
        self.save_config()?;
        Ok(true)
    }

    pub fn remove_admin(&mut self, aid: i64) -> Result<bool, ConfigError> {
        let original_len = self.global.admins.len();
        self.global.admins.retain(|&id| id != aid);

        if self.global.admins.len() == original_len {
            return Ok(false);
        }

        self.save_config()?;
        Ok(true)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigData {
    global: Option<GlobalConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        let path = std::env::temp_dir().join(format!("abot-{}-{}.json", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_config_manager_creation() {
        let path = temp_path("create");
        let config = ConfigManager::new(&path).expect("Failed to create ConfigManager in test");
        assert!(Path::new(&path).exists());
        assert_eq!(config.global.reset_hour, 4);
        assert!(config.global.owner.is_none());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_admin_list_persists() {
        let path = temp_path("admins");
        let mut config = ConfigManager::new(&path).unwrap();
        config.bind_owner(1).unwrap();
        assert!(config.add_admin(5).unwrap());
        assert!(!config.add_admin(5).unwrap());

        let reloaded = ConfigManager::new(&path).unwrap();
        assert!(reloaded.is_owner(1));
        assert!(reloaded.is_admin(5));
        assert!(reloaded.is_admin(1));

        let mut config = reloaded;
        assert!(config.remove_admin(5).unwrap());
        assert!(!config.remove_admin(5).unwrap());
        let _ = fs::remove_file(&path);
    }
}
