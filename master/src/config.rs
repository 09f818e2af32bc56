use std::{env, path::PathBuf};

use anyhow::{Context, Result};
use committer::CommitterConfig;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_STATE_DIR: &str = "/data/master";

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind: String,
    /// Directorio del journal de jobs (sobrevive a reinicios del master)
    pub state_dir: PathBuf,
    /// Configuración de commit de este intento del master
    pub committer: CommitterConfig,
}

impl MasterConfig {
    pub fn from_env() -> Result<Self> {
        let committer = CommitterConfig::from_env().context("configuración del committer")?;

        Ok(Self {
            bind: env::var("MASTER_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            state_dir: env::var("MASTER_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_DIR)),
            committer,
        })
    }
}
