//! Chargement de la configuration.
//!
//! La configuration est cherchée dans l'ordre : fichier passé en ligne de
//! commande, variable d'environnement `PLEXIBLE_CONFIG`, `.plexible.yml`
//! dans le répertoire courant, puis dans le répertoire personnel. À défaut,
//! la configuration par défaut intégrée au binaire est utilisée.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use plxproto::DeviceInfo;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

// Configuration par défaut intégrée.
const DEFAULT_CONFIG: &str = include_str!("plexible.yaml");

const ENV_CONFIG_FILE: &str = "PLEXIBLE_CONFIG";
const CONFIG_FILE_NAME: &str = ".plexible.yml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub id: String,
    pub name: String,
    pub product: String,
    pub version: String,
}

impl Config {
    /// Charge la configuration depuis le premier emplacement disponible.
    ///
    /// # Errors
    ///
    /// Un fichier explicitement demandé mais illisible est une erreur ; un
    /// fichier des emplacements implicites absent est simplement ignoré.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let text = match Self::locate(explicit)? {
            Some((path, text)) => {
                info!(config_file = %path.display(), "Loaded configuration");
                text
            }
            None => {
                info!("Using default embedded config");
                DEFAULT_CONFIG.to_string()
            }
        };

        let mut config: Config =
            serde_yaml::from_str(&text).context("invalid configuration file")?;

        if config.device.id.is_empty() {
            config.device.id = Uuid::new_v4().to_string();
            info!(id = %config.device.id, "Generated a device identifier");
        }
        if config.device.name.is_empty() {
            config.device.name = "plexible".to_string();
        }
        if config.device.product.is_empty() {
            config.device.product = "Plexible".to_string();
        }
        if config.device.version.is_empty() {
            config.device.version = env!("CARGO_PKG_VERSION").to_string();
        }

        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Result<Option<(PathBuf, String)>> {
        if let Some(path) = explicit {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read config file {}", path.display()))?;
            return Ok(Some((path.to_path_buf(), text)));
        }

        let mut candidates = Vec::new();
        if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
            candidates.push(PathBuf::from(env_path));
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(CONFIG_FILE_NAME));
        }

        for path in candidates {
            if let Ok(text) = fs::read_to_string(&path) {
                return Ok(Some((path, text)));
            }
        }
        Ok(None)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(
            &self.device.id,
            &self.device.name,
            &self.device.product,
            &self.device.version,
        )
    }
}
