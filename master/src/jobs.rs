//! Ciclo de vida de jobs e intentos del lado del master.
//!
//! Las operaciones del committer tocan el sistema de archivos, así que
//! corren en `spawn_blocking` y nunca con un lock tomado.

use chrono::Utc;
use committer::{
    CommitResult, JobId, JobStatus, OutputCommitter, Task, TaskAttemptId, TerminalState,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::journal::{self, JobSnapshot};
use crate::state::AppState;
use crate::{MAX_COMMIT_JOB_RETRIES, MAX_TASK_ATTEMPTS};

pub async fn run_blocking<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> CommitResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("panic o join error: {:?}", e)),
    }
}

/// Guarda la foto del job en el journal. Un fallo sólo se loguea.
///
/// La foto se toma con el lock del journal tomado, así la última escritura
/// siempre lleva el estado más nuevo.
pub fn persist(state: &AppState, job_id: &JobId) {
    let _journal = state.journal_lock.lock().unwrap();
    let snapshot = {
        let jobs = state.jobs.lock().unwrap();
        match jobs.get(job_id) {
            Some(entry) => JobSnapshot::of(entry),
            None => return,
        }
    };
    if let Err(e) = journal::save(&state.config.state_dir, &snapshot) {
        warn!("no se pudo guardar el journal del job {}: {:?}", job_id, e);
    }
}

pub fn committer_of(state: &AppState, job_id: &JobId) -> Option<Arc<dyn OutputCommitter>> {
    let jobs = state.jobs.lock().unwrap();
    jobs.get(job_id).map(|e| e.committer.clone())
}

fn release_lease(state: &AppState, attempt: &TaskAttemptId) {
    let mut leases = state.commit_leases.lock().unwrap();
    if leases.get(attempt.task_id()) == Some(attempt) {
        leases.remove(attempt.task_id());
    }
}

/// El intento terminó bien: la tarea queda completa y, si era la última,
/// se commitea el job.
pub async fn task_succeeded(state: &AppState, attempt: &TaskAttemptId) {
    let job_id = attempt.job_id().clone();
    release_lease(state, attempt);

    {
        let mut jobs = state.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        if entry.info.status.is_terminal() {
            return;
        }
        if let Some(record) = entry.tasks.get_mut(attempt.task_id()) {
            if !record.done {
                record.done = true;
                entry.info.completed_tasks += 1;
            }
        }
    }

    persist(state, &job_id);
    finish_job_if_done(state, &job_id).await;
}

/// El intento falló (o su worker murió): se aborta su trabajo y se
/// re-encola un intento nuevo, salvo que se hayan agotado los intentos.
pub async fn task_failed(state: &AppState, task: Task, reason: &str) {
    let attempt = task.attempt_id.clone();
    let job_id = attempt.job_id().clone();
    release_lease(state, &attempt);

    if let Some(committer) = committer_of(state, &job_id) {
        let a = attempt.clone();
        if let Err(e) = run_blocking(move || committer.abort_task(&a)).await {
            warn!("abort de {} falló, queda su directorio: {}", attempt, e);
            let mut jobs = state.jobs.lock().unwrap();
            if let Some(entry) = jobs.get_mut(&job_id) {
                entry.info.last_error = Some(e);
            }
        }
    }

    // otro intento de la misma tarea ya tiene el lease: éste sobra
    let rival_committing = {
        let leases = state.commit_leases.lock().unwrap();
        leases.contains_key(attempt.task_id())
    };

    let mut requeue: Option<Task> = None;
    let mut exhausted = false;
    {
        let mut jobs = state.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        if entry.info.status.is_terminal() {
            return;
        }
        let Some(record) = entry.tasks.get_mut(attempt.task_id()) else {
            return;
        };
        if record.done || rival_committing || record.latest_attempt != attempt {
            info!("intento {} descartado ({})", attempt, reason);
            return;
        }

        if attempt.attempt() + 1 < MAX_TASK_ATTEMPTS {
            let next = attempt.next();
            record.latest_attempt = next.clone();
            entry.info.retries += 1;
            info!(
                "reencolando tarea {} como {} ({})",
                attempt.task_id(),
                next,
                reason
            );
            requeue = Some(Task {
                attempt_id: next,
                ..task
            });
        } else {
            warn!(
                "tarea {} superó el máximo de intentos ({}), job {} FAILED: {}",
                attempt.task_id(),
                MAX_TASK_ATTEMPTS,
                job_id,
                reason
            );
            entry.info.failed_tasks += 1;
            exhausted = true;
        }
    }

    if let Some(t) = requeue {
        state.tasks_queue.lock().unwrap().push_back(t);
        persist(state, &job_id);
    }
    if exhausted {
        fail_job(state, &job_id, TerminalState::Failed).await;
    }
}

/// Si todas las tareas están commiteadas, promueve la salida del job.
/// Un commit fallido deja el job en COMMITTING para reintentarlo.
pub async fn finish_job_if_done(state: &AppState, job_id: &JobId) {
    let committer = {
        let mut jobs = state.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        if entry.info.status.is_terminal() || entry.commit_in_progress || !entry.all_tasks_done() {
            return;
        }
        entry.commit_in_progress = true;
        entry.info.status = JobStatus::Committing;
        entry.committer.clone()
    };
    persist(state, job_id);

    info!("todas las tareas del job {} listas, commit del job", job_id);
    let result = run_blocking(move || committer.commit_job()).await;

    {
        let mut jobs = state.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(job_id) else {
            return;
        };
        entry.commit_in_progress = false;
        if entry.info.status.is_terminal() {
            warn!(
                "job {} terminó ({:?}) durante su commit, se conserva ese estado",
                job_id, entry.info.status
            );
            return;
        }
        match result {
            Ok(()) => {
                info!("job {} SUCCEEDED", job_id);
                entry.info.status = JobStatus::Succeeded;
                entry.info.finished_at = Some(Utc::now());
                entry.info.last_error = None;
            }
            Err(e) => {
                entry.commit_failures += 1;
                warn!(
                    "commit del job {} falló ({}/{}): {}",
                    job_id, entry.commit_failures, MAX_COMMIT_JOB_RETRIES, e
                );
                entry.info.last_error = Some(e);
                if entry.commit_failures >= MAX_COMMIT_JOB_RETRIES {
                    // se deja el staging intacto para diagnóstico
                    entry.info.status = JobStatus::Failed;
                    entry.info.finished_at = Some(Utc::now());
                }
            }
        }
    }
    persist(state, job_id);
}

/// Termina el job con `terminal` y borra todo su staging.
///
/// No hace nada (y devuelve `false`) si el job ya terminó o tiene un
/// commit_job en curso: commit y abort del mismo job nunca corren juntos.
pub async fn fail_job(state: &AppState, job_id: &JobId, terminal: TerminalState) -> bool {
    let committer = {
        let mut jobs = state.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        if entry.info.status.is_terminal() || entry.commit_in_progress {
            info!(
                "job {} ya terminado o commiteando, no se aborta ({:?})",
                job_id, terminal
            );
            return false;
        }
        entry.info.status = match terminal {
            TerminalState::Failed => JobStatus::Failed,
            TerminalState::Killed => JobStatus::Killed,
        };
        entry.info.finished_at = Some(Utc::now());
        entry.committer.clone()
    };

    state
        .tasks_queue
        .lock()
        .unwrap()
        .retain(|t| t.attempt_id.job_id() != job_id);
    state
        .commit_leases
        .lock()
        .unwrap()
        .retain(|task_id, _| task_id.job_id() != job_id);

    if let Err(e) = run_blocking(move || committer.abort_job(terminal)).await {
        warn!("abort del job {} falló, staging intacto: {}", job_id, e);
        let mut jobs = state.jobs.lock().unwrap();
        if let Some(entry) = jobs.get_mut(job_id) {
            entry.info.last_error = Some(e);
        }
    }

    persist(state, job_id);
    true
}
