// master/src/state.rs

use committer::{
    FileSystem, JobId, JobInfo, OutputCommitter, Task, TaskAttemptId, TaskId, WorkerId,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        atomic::AtomicU32,
        Arc, Mutex,
    },
    time::SystemTime,
};

use crate::config::MasterConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MasterConfig>,
    pub fs: Arc<dyn FileSystem>,
    /// Identificador de este master para los job ids nuevos
    pub tracker: String,
    pub next_job: Arc<AtomicU32>,

    pub jobs: Arc<Mutex<HashMap<JobId, JobEntry>>>,
    pub workers: Arc<Mutex<HashMap<WorkerId, WorkerMeta>>>,
    // tareas pendientes de asignar
    pub tasks_queue: Arc<Mutex<VecDeque<Task>>>,
    // intentos ya asignados pero no completados
    pub in_flight: Arc<Mutex<HashMap<TaskAttemptId, InFlight>>>,
    // qué intento tiene permiso de commitear cada tarea
    pub commit_leases: Arc<Mutex<HashMap<TaskId, TaskAttemptId>>>,
    // serializa foto + escritura del journal
    pub journal_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: MasterConfig, fs: Arc<dyn FileSystem>) -> Self {
        let tracker = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        Self {
            config: Arc::new(config),
            fs,
            tracker,
            next_job: Arc::new(AtomicU32::new(1)),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Mutex::new(HashMap::new())),
            tasks_queue: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            commit_leases: Arc::new(Mutex::new(HashMap::new())),
            journal_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Clone)]
pub struct JobEntry {
    pub info: JobInfo,
    pub committer: Arc<dyn OutputCommitter>,
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    /// Hay un commit_job corriendo en un hilo de bloqueo
    pub commit_in_progress: bool,
    pub commit_failures: u32,
}

impl JobEntry {
    pub fn all_tasks_done(&self) -> bool {
        self.tasks.values().all(|t| t.done)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub input_path: String,
    /// Último intento lanzado para la tarea
    pub latest_attempt: TaskAttemptId,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub hostname: String,
    pub last_heartbeat: SystemTime,
    pub dead: bool,
    pub max_concurrency: u32,

    // Métricas
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_task_time_ms: u64,

    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct InFlight {
    pub task: Task,
    pub worker_id: WorkerId,
    pub started_at: SystemTime,
}
