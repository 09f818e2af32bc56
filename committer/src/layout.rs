//! Esquema de rutas del área de staging.
//!
//! ```text
//! O/_temporary/<a>/_temporary/_<attempt>/...   directorio de trabajo del intento
//! O/_temporary/<a>/<task>/...                  salida commiteada de la tarea
//! O/<final>  +  O/_SUCCESS                     salida final del job
//! ```
//!
//! Todo es función pura de sus entradas, así un coordinador que reinicia
//! recalcula exactamente las mismas rutas.

use std::path::{Path, PathBuf};

use crate::ids::{TaskAttemptId, TaskId};

pub const TEMP_DIR_NAME: &str = "_temporary";
pub const SUCCEEDED_FILE_NAME: &str = "_SUCCESS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    output_root: PathBuf,
}

impl StagingLayout {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// `O/_temporary`: raíz de todos los intentos de job.
    pub fn pending_root(&self) -> PathBuf {
        self.output_root.join(TEMP_DIR_NAME)
    }

    /// `O/_temporary/<a>`
    pub fn job_attempt_path(&self, app_attempt: u32) -> PathBuf {
        self.pending_root().join(app_attempt.to_string())
    }

    /// `O/_temporary/<a>/_temporary`
    pub fn job_attempt_work_root(&self, app_attempt: u32) -> PathBuf {
        self.job_attempt_path(app_attempt).join(TEMP_DIR_NAME)
    }

    /// `O/_temporary/<a>/_temporary/_<attempt>`
    pub fn task_attempt_path(&self, app_attempt: u32, attempt: &TaskAttemptId) -> PathBuf {
        self.job_attempt_work_root(app_attempt)
            .join(format!("_{}", attempt))
    }

    /// `O/_temporary/<a>/<task>`
    pub fn committed_task_path(&self, app_attempt: u32, task: &TaskId) -> PathBuf {
        self.job_attempt_path(app_attempt).join(task_output_name(task))
    }

    pub fn success_marker_path(&self) -> PathBuf {
        self.output_root.join(SUCCEEDED_FILE_NAME)
    }
}

/// Nombre de la salida commiteada: todos los intentos de una tarea
/// resuelven al mismo nombre.
pub fn task_output_name(task: &TaskId) -> String {
    task.to_string()
}
