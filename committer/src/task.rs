use serde::{Deserialize, Serialize};

use crate::config::CommitterConfig;
use crate::ids::TaskAttemptId;
use crate::worker::WorkerId;

/// Intento de tarea tal como lo recibe un worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub attempt_id: TaskAttemptId,

    /// Ruta del archivo de entrada (dentro del contenedor)
    pub input_path: String,
    /// Raíz de salida del job; el worker escribe en su directorio de
    /// trabajo debajo de `<output_root>/_temporary/...`
    pub output_root: String,

    /// Configuración de commit del intento de job actual
    pub committer: CommitterConfig,
}

/// El worker pide permiso para commitear su intento.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCommitRequest {
    pub worker_id: WorkerId,
    pub attempt_id: TaskAttemptId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCommitResponse {
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteRequest {
    pub attempt_id: TaskAttemptId,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleteResponse {
    pub ok: bool,
}
