use serde::{Deserialize, Serialize};

use crate::error::CommitError;

pub const APP_ATTEMPT_ENV: &str = "APP_ATTEMPT_ID";
pub const MARK_SUCCESS_ENV: &str = "COMMITTER_MARK_SUCCESS";
pub const ALGORITHM_VERSION_ENV: &str = "COMMITTER_ALGORITHM_VERSION";

/// Estrategia de commit. Sólo existe la v1: las tareas commitean dentro
/// del staging del intento de job y el job promueve todo al final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmVersion {
    V1,
}

impl AlgorithmVersion {
    pub fn from_number(n: u32) -> Result<Self, CommitError> {
        match n {
            1 => Ok(AlgorithmVersion::V1),
            other => Err(CommitError::Config(format!(
                "{}={} no soportado (sólo 1)",
                ALGORITHM_VERSION_ENV, other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitterConfig {
    /// Número de intento del coordinador de job (1..N).
    pub app_attempt: u32,
    /// Escribir `_SUCCESS` al commitear el job.
    pub mark_success: bool,
    pub algorithm: AlgorithmVersion,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            app_attempt: 1,
            mark_success: true,
            algorithm: AlgorithmVersion::V1,
        }
    }
}

impl CommitterConfig {
    /// Lee la configuración de las variables de entorno.
    /// Un valor presente pero inválido es un error, no se usa el default.
    pub fn from_env() -> Result<Self, CommitError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CommitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = CommitterConfig::default();

        if let Some(raw) = lookup(APP_ATTEMPT_ENV) {
            let attempt = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| CommitError::Config(format!("{}='{}' no es un entero", APP_ATTEMPT_ENV, raw)))?;
            if attempt == 0 {
                return Err(CommitError::Config(format!("{} empieza en 1", APP_ATTEMPT_ENV)));
            }
            cfg.app_attempt = attempt;
        }

        if let Some(raw) = lookup(MARK_SUCCESS_ENV) {
            cfg.mark_success = parse_bool(&raw).ok_or_else(|| {
                CommitError::Config(format!("{}='{}' no es booleano", MARK_SUCCESS_ENV, raw))
            })?;
        }

        if let Some(raw) = lookup(ALGORITHM_VERSION_ENV) {
            let n = raw.trim().parse::<u32>().map_err(|_| {
                CommitError::Config(format!("{}='{}' no es un entero", ALGORITHM_VERSION_ENV, raw))
            })?;
            cfg.algorithm = AlgorithmVersion::from_number(n)?;
        }

        Ok(cfg)
    }

    pub fn with_app_attempt(mut self, app_attempt: u32) -> Self {
        self.app_attempt = app_attempt;
        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn sin_variables_usa_defaults() {
        let cfg = CommitterConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, CommitterConfig::default());
    }

    #[test]
    fn lee_attempt_marker_y_version() {
        let cfg = CommitterConfig::from_lookup(lookup(&[
            (APP_ATTEMPT_ENV, "3"),
            (MARK_SUCCESS_ENV, "false"),
            (ALGORITHM_VERSION_ENV, "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.app_attempt, 3);
        assert!(!cfg.mark_success);
        assert_eq!(cfg.algorithm, AlgorithmVersion::V1);
    }

    #[test]
    fn valores_invalidos_son_error() {
        assert!(CommitterConfig::from_lookup(lookup(&[(APP_ATTEMPT_ENV, "dos")])).is_err());
        assert!(CommitterConfig::from_lookup(lookup(&[(APP_ATTEMPT_ENV, "0")])).is_err());
        assert!(CommitterConfig::from_lookup(lookup(&[(MARK_SUCCESS_ENV, "quizas")])).is_err());
        assert!(CommitterConfig::from_lookup(lookup(&[(ALGORITHM_VERSION_ENV, "2")])).is_err());
    }
}
