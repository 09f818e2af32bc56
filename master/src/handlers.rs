use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use committer::{
    committer_for, layout::SUCCEEDED_FILE_NAME, FileSystem, FsError, layout::TEMP_DIR_NAME, JobId, JobInfo,
    JobRequest, JobResults, JobStatus, Task, TaskAssignmentRequest, TaskAssignmentResponse,
    TaskCommitRequest, TaskCommitResponse, TaskCompleteRequest, TaskCompleteResponse, TaskType,
    TerminalState, WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId, WorkerMetrics,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
use glob::glob;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::jobs;
use crate::state::{AppState, InFlight, JobEntry, TaskRecord, WorkerMeta};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/results", get(get_job_results))
        .route("/api/v1/jobs/:id/kill", post(kill_job))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/tasks/next", post(assign_task))
        .route("/api/v1/tasks/commit", post(request_commit))
        .route("/api/v1/tasks/complete", post(complete_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

fn parse_job_id(id: &str) -> Result<JobId, StatusCode> {
    id.parse::<JobId>().map_err(|_| StatusCode::BAD_REQUEST)
}

// Crea un job nuevo: setup del staging y una tarea map por archivo de entrada
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobInfo>, StatusCode> {
    let number = state.next_job.fetch_add(1, Ordering::SeqCst);
    let job_id = JobId::new(state.tracker.clone(), number).map_err(|e| {
        warn!("no se pudo generar job id: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if has_committed_output(state.fs.as_ref(), std::path::Path::new(&req.output_dir)) {
        warn!("{} ya tiene una salida commiteada", req.output_dir);
        return Err(StatusCode::CONFLICT);
    }

    let mut inputs: Vec<String> = Vec::new();
    let entries = glob(&req.input_glob).map_err(|e| {
        warn!("patrón input_glob inválido '{}': {}", req.input_glob, e);
        StatusCode::BAD_REQUEST
    })?;
    for entry in entries.flatten() {
        if entry.is_file() {
            inputs.push(entry.to_string_lossy().to_string());
        }
    }
    inputs.sort();

    let committer = committer_for(
        state.fs.clone(),
        &req.output_dir,
        state.config.committer.clone(),
    );
    let setup_committer = committer.clone();
    if let Err(e) = jobs::run_blocking(move || setup_committer.setup_job()).await {
        warn!("setup del job {} falló: {}", job_id, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let mut tasks: BTreeMap<_, TaskRecord> = BTreeMap::new();
    let mut queue_items: Vec<Task> = Vec::new();
    for (i, input_path) in inputs.into_iter().enumerate() {
        let task_id = job_id.task(TaskType::Map, i as u32);
        let attempt_id = task_id.attempt(0);
        queue_items.push(Task {
            attempt_id: attempt_id.clone(),
            input_path: input_path.clone(),
            output_root: req.output_dir.clone(),
            committer: state.config.committer.clone(),
        });
        tasks.insert(
            task_id.clone(),
            TaskRecord {
                task_id,
                input_path,
                latest_attempt: attempt_id,
                done: false,
            },
        );
    }

    let job_info = JobInfo {
        id: job_id.clone(),
        name: req.name,
        status: JobStatus::Accepted,
        input_glob: req.input_glob,
        output_dir: req.output_dir,
        app_attempt: state.config.committer.app_attempt,

        submitted_at: Utc::now(),
        started_at: None,
        finished_at: None,
        total_tasks: tasks.len() as u32,
        completed_tasks: 0,
        recovered_tasks: 0,
        failed_tasks: 0,
        retries: 0,
        last_error: None,
    };

    info!(
        "job {} creado con {} tareas (salida {})",
        job_id, job_info.total_tasks, job_info.output_dir
    );

    {
        let mut jobs = state.jobs.lock().unwrap();
        jobs.insert(
            job_id.clone(),
            JobEntry {
                info: job_info.clone(),
                committer,
                tasks,
                commit_in_progress: false,
                commit_failures: 0,
            },
        );
    }
    jobs::persist(&state, &job_id);

    if queue_items.is_empty() {
        // sin entradas: se commitea igual para dejar el marcador
        jobs::finish_job_if_done(&state, &job_id).await;
    } else {
        let mut queue = state.tasks_queue.lock().unwrap();
        queue.extend(queue_items);
    }

    let jobs = state.jobs.lock().unwrap();
    let info = jobs.get(&job_id).map(|e| e.info.clone()).unwrap_or(job_info);
    Ok(Json(info))
}

// Devuelve info básica de un job
async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, StatusCode> {
    let job_id = parse_job_id(&id)?;
    let jobs = state.jobs.lock().unwrap();

    if let Some(entry) = jobs.get(&job_id) {
        Ok(Json(entry.info.clone()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Lista archivos de salida de un job (sin el staging)
async fn get_job_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResults>, StatusCode> {
    let job_id = parse_job_id(&id)?;
    let job = {
        let jobs = state.jobs.lock().unwrap();
        match jobs.get(&job_id) {
            Some(entry) => entry.info.clone(),
            None => return Err(StatusCode::NOT_FOUND),
        }
    };

    let (files, complete) =
        list_output_files(state.fs.as_ref(), std::path::Path::new(&job.output_dir))
            .map_err(|e| {
                warn!("no se pudo listar la salida de {}: {}", job.id, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

    Ok(Json(JobResults {
        job_id: job.id,
        output_dir: job.output_dir,
        files,
        complete,
    }))
}

/// `true` si `output_dir` ya tiene el marcador de job commiteado.
pub fn has_committed_output(fs: &dyn FileSystem, output_dir: &std::path::Path) -> bool {
    fs.exists(&output_dir.join(SUCCEEDED_FILE_NAME))
}

/// Archivos de salida visibles (sin staging ni marcador) y si el job está
/// completo. Un directorio inexistente es una salida vacía.
pub fn list_output_files(
    fs: &dyn FileSystem,
    output_dir: &std::path::Path,
) -> Result<(Vec<String>, bool), FsError> {
    let children = match fs.list_children(output_dir) {
        Ok(c) => c,
        Err(FsError::NotFound(_)) => return Ok((Vec::new(), false)),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    let mut complete = false;
    for child in children {
        let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == TEMP_DIR_NAME {
            continue;
        }
        if name == SUCCEEDED_FILE_NAME {
            complete = true;
            continue;
        }
        if !fs.is_dir(&child) {
            files.push(name.to_string());
        }
    }
    files.sort();
    Ok((files, complete))
}

// Cancela un job: abort con estado KILLED
async fn kill_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, StatusCode> {
    let job_id = parse_job_id(&id)?;
    {
        let jobs = state.jobs.lock().unwrap();
        match jobs.get(&job_id) {
            None => return Err(StatusCode::NOT_FOUND),
            Some(entry) if entry.info.status.is_terminal() || entry.commit_in_progress => {
                return Err(StatusCode::CONFLICT)
            }
            Some(_) => {}
        }
    }

    info!("kill del job {}", job_id);
    if !jobs::fail_job(&state, &job_id, TerminalState::Killed).await {
        return Err(StatusCode::CONFLICT);
    }

    let jobs = state.jobs.lock().unwrap();
    jobs.get(&job_id)
        .map(|e| Json(e.info.clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

// Registra un worker nuevo
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Json<WorkerRegisterResponse> {
    let worker_id = uuid::Uuid::new_v4().to_string();

    {
        let mut workers = state.workers.lock().unwrap();
        workers.insert(
            worker_id.clone(),
            WorkerMeta {
                hostname: req.hostname,
                last_heartbeat: SystemTime::now(),
                dead: false,
                max_concurrency: req.max_concurrency,

                tasks_started: 0,
                tasks_succeeded: 0,
                tasks_failed: 0,
                total_task_time_ms: 0,

                last_cpu_percent: None,
                last_mem_bytes: None,
            },
        );
    }

    info!(
        "worker registrado: {} (max_concurrency={})",
        worker_id, req.max_concurrency
    );
    Json(WorkerRegisterResponse { worker_id })
}

// Heartbeat de worker
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>, StatusCode> {
    let mut workers = state.workers.lock().unwrap();
    if let Some(meta) = workers.get_mut(&req.worker_id) {
        if meta.dead {
            // ya se re-encolaron sus tareas; que se vuelva a registrar
            return Err(StatusCode::GONE);
        }
        meta.last_heartbeat = SystemTime::now();
        meta.last_cpu_percent = Some(req.cpu_percent);
        meta.last_mem_bytes = Some(req.mem_bytes);
        Ok(Json(WorkerHeartbeatResponse { ok: true }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Asigna el siguiente intento en cola (si hay)
async fn assign_task(
    State(state): State<AppState>,
    Json(req): Json<TaskAssignmentRequest>,
) -> Json<TaskAssignmentResponse> {
    // 1) Cuántas tareas tiene ya este worker en vuelo
    let active_for_worker: usize = {
        let in_flight = state.in_flight.lock().unwrap();
        in_flight
            .values()
            .filter(|entry| entry.worker_id == req.worker_id)
            .count()
    };

    // 2) Capacidad máxima de este worker
    let max_for_worker: Option<u32> = {
        let workers = state.workers.lock().unwrap();
        workers
            .get(&req.worker_id)
            .filter(|m| !m.dead)
            .map(|m| m.max_concurrency)
    };

    let Some(max_for_worker) = max_for_worker else {
        warn!("worker desconocido o muerto {} pidió tarea", req.worker_id);
        return Json(TaskAssignmentResponse { task: None });
    };

    if active_for_worker as u32 >= max_for_worker {
        info!(
            "worker {} pidió tarea pero ya tiene {}/{} en vuelo",
            req.worker_id, active_for_worker, max_for_worker
        );
        return Json(TaskAssignmentResponse { task: None });
    }

    // 3) Sacar el siguiente intento de la cola global
    let task_opt = {
        let mut queue = state.tasks_queue.lock().unwrap();
        queue.pop_front()
    };

    if let Some(ref t) = task_opt {
        info!(
            "asignando {} (input={}) al worker {} ({}/{} en vuelo -> +1)",
            t.attempt_id, t.input_path, req.worker_id, active_for_worker, max_for_worker,
        );

        // 4) Registrar el intento en in_flight con timestamp de inicio
        {
            let mut in_flight = state.in_flight.lock().unwrap();
            in_flight.insert(
                t.attempt_id.clone(),
                InFlight {
                    task: t.clone(),
                    worker_id: req.worker_id.clone(),
                    started_at: SystemTime::now(),
                },
            );
        }

        // 5) Marcar el job como Running la primera vez
        {
            let mut jobs = state.jobs.lock().unwrap();
            if let Some(entry) = jobs.get_mut(t.attempt_id.job_id()) {
                if matches!(entry.info.status, JobStatus::Accepted) {
                    entry.info.status = JobStatus::Running;
                    if entry.info.started_at.is_none() {
                        entry.info.started_at = Some(Utc::now());
                    }
                }
            }
        }

        // 6) Métricas del worker
        {
            let mut workers = state.workers.lock().unwrap();
            if let Some(meta) = workers.get_mut(&req.worker_id) {
                meta.tasks_started += 1;
            }
        }
    }

    Json(TaskAssignmentResponse { task: task_opt })
}

/// Decide si el intento puede commitear. Es el único punto que garantiza
/// que una tarea tenga un solo committer.
pub fn grant_commit(state: &AppState, req: &TaskCommitRequest) -> bool {
    let attempt = &req.attempt_id;

    let running_here = {
        let in_flight = state.in_flight.lock().unwrap();
        in_flight
            .get(attempt)
            .map(|f| f.worker_id == req.worker_id)
            .unwrap_or(false)
    };
    if !running_here {
        return false;
    }

    let job_open = {
        let jobs = state.jobs.lock().unwrap();
        jobs.get(attempt.job_id())
            .map(|e| {
                !e.info.status.is_terminal()
                    && e.tasks
                        .get(attempt.task_id())
                        .map(|r| !r.done)
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    };
    if !job_open {
        return false;
    }

    let mut leases = state.commit_leases.lock().unwrap();
    match leases.get(attempt.task_id()) {
        Some(holder) => holder == attempt,
        None => {
            leases.insert(attempt.task_id().clone(), attempt.clone());
            true
        }
    }
}

// Lease de commit para un intento
async fn request_commit(
    State(state): State<AppState>,
    Json(req): Json<TaskCommitRequest>,
) -> Json<TaskCommitResponse> {
    let granted = grant_commit(&state, &req);
    if granted {
        info!("lease de commit para {} (worker {})", req.attempt_id, req.worker_id);
    } else {
        warn!("commit denegado para {} (worker {})", req.attempt_id, req.worker_id);
    }
    Json(TaskCommitResponse { granted })
}

// Worker reporta que terminó un intento
async fn complete_task(
    State(state): State<AppState>,
    Json(req): Json<TaskCompleteRequest>,
) -> Result<Json<TaskCompleteResponse>, StatusCode> {
    let maybe_inflight: Option<InFlight> = {
        let mut in_flight = state.in_flight.lock().unwrap();
        in_flight.remove(&req.attempt_id)
    };

    let Some(inflight) = maybe_inflight else {
        return Err(StatusCode::NOT_FOUND);
    };

    // ---- Métricas de worker: duración del intento ----
    let duration_ms: u64 = inflight
        .started_at
        .elapsed()
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    {
        let mut workers = state.workers.lock().unwrap();
        if let Some(meta) = workers.get_mut(&inflight.worker_id) {
            meta.total_task_time_ms += duration_ms;
            if req.success {
                meta.tasks_succeeded += 1;
            } else {
                meta.tasks_failed += 1;
            }
        }
    }

    if req.success {
        info!("{} completado en {} ms", req.attempt_id, duration_ms);
        jobs::task_succeeded(&state, &req.attempt_id).await;
    } else {
        let reason = req.error.unwrap_or_else(|| "fallo sin detalle".to_string());
        warn!("{} falló: {}", req.attempt_id, reason);
        jobs::task_failed(&state, inflight.task, &reason).await;
    }

    Ok(Json(TaskCompleteResponse { ok: true }))
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerMetrics>> {
    let now = SystemTime::now();

    // Contar tareas activas por worker (desde in_flight)
    let mut active_by_worker: HashMap<WorkerId, u32> = HashMap::new();
    {
        let in_flight = state.in_flight.lock().unwrap();
        for inf in in_flight.values() {
            *active_by_worker.entry(inf.worker_id.clone()).or_insert(0) += 1;
        }
    }

    let workers = state.workers.lock().unwrap();
    let mut out = Vec::new();

    for (wid, meta) in workers.iter() {
        let age_secs = now
            .duration_since(meta.last_heartbeat)
            .unwrap_or_default()
            .as_secs();

        let active = active_by_worker.get(wid).copied().unwrap_or(0);

        let avg_ms = if meta.tasks_succeeded > 0 {
            Some(meta.total_task_time_ms as f64 / meta.tasks_succeeded as f64)
        } else {
            None
        };

        out.push(WorkerMetrics {
            worker_id: wid.clone(),
            hostname: meta.hostname.clone(),
            dead: meta.dead,
            max_concurrency: meta.max_concurrency,
            last_heartbeat_secs_ago: age_secs,
            active_tasks: active,
            tasks_started: meta.tasks_started,
            tasks_succeeded: meta.tasks_succeeded,
            tasks_failed: meta.tasks_failed,
            avg_task_ms: avg_ms,
            cpu_percent: meta.last_cpu_percent,
            mem_bytes: meta.last_mem_bytes,
        });
    }

    Json(out)
}
