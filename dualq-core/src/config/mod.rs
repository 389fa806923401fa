use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::queue::{DropTailQueue, DropTailQueueConfig, DualQConfig, DualQueue, QueueDisc};
use crate::sender::SenderConfig;
use crate::telemetry::TelemetrySink;
use crate::utils::replace_env_var_in_string;

/// Prefix of the environment variables overriding file settings,
/// e.g. `DUALQ_AQM__TARGET=20ms`.
pub const ENV_PREFIX: &str = "DUALQ_";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "queue")]
pub enum QueueDiscConfig {
    DropTail(DropTailQueueConfig),
    DualPi2(DualQConfig),
}

impl Default for QueueDiscConfig {
    fn default() -> Self {
        QueueDiscConfig::DualPi2(DualQConfig::default())
    }
}

impl QueueDiscConfig {
    pub fn build<P, T>(self, telemetry: T) -> Result<QueueDisc<P, T>>
    where
        P: Packet,
        T: TelemetrySink,
    {
        Ok(match self {
            QueueDiscConfig::DropTail(config) => {
                QueueDisc::DropTail(DropTailQueue::with_telemetry(config, telemetry)?)
            }
            QueueDiscConfig::DualPi2(config) => {
                QueueDisc::DualPi2(DualQueue::with_telemetry(config, telemetry)?)
            }
        })
    }
}

/// Loads a TOML or JSON file, chosen by extension, with `DUALQ_` environment
/// variables layered on top. `${VAR}` in the path is expanded first.
pub fn load_config<C: DeserializeOwned>(path: &str) -> Result<C> {
    let expanded = replace_env_var_in_string(path);
    let file_path = Path::new(expanded.as_ref());
    let figment = match file_path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Figment::new().merge(Json::file(file_path)),
        Some("toml") => Figment::new().merge(Toml::file(file_path)),
        _ => {
            warn!("Unsupported config file {}", file_path.display());
            return Err(Error::config(format!(
                "unsupported config file {}, expect .toml or .json",
                file_path.display()
            )));
        }
    };
    if !file_path.exists() {
        return Err(Error::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("config file {} not found", file_path.display()),
        )));
    }
    debug!("Load config from {}", file_path.display());
    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| Error::config(e.to_string()))
}

impl DualQConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let config: Self = load_config(path)?;
        config.validate()?;
        Ok(config)
    }
}

impl SenderConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let config: Self = load_config(path)?;
        config.validate()?;
        Ok(config)
    }
}

impl QueueDiscConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        load_config(path)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
