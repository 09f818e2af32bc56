use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::JobId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,

    /// Patrón de archivos de entrada, ej: "/data/input/*.txt".
    /// Se crea una tarea map por archivo.
    pub input_glob: String,

    /// Raíz de salida final del job, ej: "/data/output/wc".
    pub output_dir: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Accepted,
    Running,
    Committing,
    Succeeded,
    Failed,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Killed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,

    pub input_glob: String,
    pub output_dir: String,

    /// Intento del master con el que corre (o corrió) el job
    pub app_attempt: u32,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    /// Tareas tomadas de un intento anterior del master, sin re-ejecutar
    pub recovered_tasks: u32,
    pub failed_tasks: u32,
    pub retries: u32,

    /// Último error de commit/abort, para diagnóstico
    pub last_error: Option<String>,
}
