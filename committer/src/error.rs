use std::{io, path::PathBuf};

use thiserror::Error;

use crate::committer::JobPhase;

/// Errores tipados de la capa de almacenamiento.
///
/// `NotFound` y `AlreadyExists` son benignos en los reintentos de
/// commit/recover; `Io` siempre se propaga al llamador.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("la ruta no existe: {}", .0.display())]
    NotFound(PathBuf),

    #[error("la ruta ya existe: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("fallo de E/S en {op} sobre {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        FsError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, FsError::AlreadyExists(_))
    }
}

/// Errores del protocolo de commit.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("transición inválida: {op} no se permite desde {from:?}")]
    InvalidTransition { op: &'static str, from: JobPhase },

    #[error("configuración inválida: {0}")]
    Config(String),

    #[error("identificador inválido: {0}")]
    InvalidId(String),
}

pub type CommitResult<T> = Result<T, CommitError>;
