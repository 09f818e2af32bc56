//! Reanudación de jobs al reiniciar el master.
//!
//! Cada job no terminado del journal se retoma con el intento de job
//! actual: se prepara su staging, se recupera la salida que el intento
//! anterior ya había commiteado y sólo se re-encolan las tareas que faltan.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use committer::{committer_for, JobId, JobStatus, RecoveryCoordinator, Task, TaskAttemptId};
use tracing::{info, warn};

use crate::jobs;
use crate::journal::JobSnapshot;
use crate::state::{AppState, JobEntry, TaskRecord};

/// Carga las fotos en el estado y devuelve los jobs retomados.
///
/// Cada job pendiente tiene que retomarse con exactamente el intento
/// siguiente al suyo: reusar el número pisaría su staging, y saltear uno
/// dejaría fuera de la recuperación las tareas ya commiteadas.
pub fn restore_jobs(state: &AppState, snapshots: Vec<JobSnapshot>) -> Result<Vec<JobId>> {
    let app_attempt = state.config.committer.app_attempt;

    for snap in &snapshots {
        if !snap.info.status.is_terminal() && snap.info.app_attempt + 1 != app_attempt {
            bail!(
                "el job {} corrió con el intento {}; APP_ATTEMPT_ID={} debe ser {}",
                snap.info.id,
                snap.info.app_attempt,
                app_attempt,
                snap.info.app_attempt + 1
            );
        }
    }

    let mut resumed = Vec::new();
    for snap in snapshots {
        bump_job_counter(state, &snap.info.id);
        let job_id = snap.info.id.clone();
        if snap.info.status.is_terminal() {
            insert_finished(state, snap);
        } else {
            resume(state, snap);
            resumed.push(job_id.clone());
        }
        jobs::persist(state, &job_id);
    }

    Ok(resumed)
}

fn bump_job_counter(state: &AppState, job_id: &JobId) {
    if job_id.tracker() == state.tracker {
        state
            .next_job
            .fetch_max(job_id.number() + 1, std::sync::atomic::Ordering::SeqCst);
    }
}

// Jobs terminados: sólo para consultas de estado
fn insert_finished(state: &AppState, snap: JobSnapshot) {
    let committer = committer_for(
        state.fs.clone(),
        &snap.info.output_dir,
        state.config.committer.clone(),
    );
    let tasks = snap
        .tasks
        .into_iter()
        .map(|t| (t.task_id.clone(), t))
        .collect();
    state.jobs.lock().unwrap().insert(
        snap.info.id.clone(),
        JobEntry {
            info: snap.info,
            committer,
            tasks,
            commit_in_progress: false,
            commit_failures: 0,
        },
    );
}

fn resume(state: &AppState, snap: JobSnapshot) {
    let JobSnapshot { mut info, tasks } = snap;
    let job_id = info.id.clone();
    let was_committing = matches!(info.status, JobStatus::Committing);
    let committer = committer_for(
        state.fs.clone(),
        &info.output_dir,
        state.config.committer.clone(),
    );

    info!(
        "retomando job {} (intento {} -> {})",
        job_id, info.app_attempt, state.config.committer.app_attempt
    );
    info.app_attempt = state.config.committer.app_attempt;
    info.last_error = None;

    let attempts: Vec<TaskAttemptId> = tasks.iter().map(|t| t.latest_attempt.clone()).collect();
    let outcome = committer
        .setup_job()
        .and_then(|_| RecoveryCoordinator::new(committer.as_ref()).recover(&attempts));

    let mut records: BTreeMap<_, TaskRecord> = BTreeMap::new();
    let mut queue_items = Vec::new();

    match outcome {
        Ok(report) => {
            for mut record in tasks {
                let recovered = report.recovered.contains(&record.task_id);
                // un commit de job a medias ya movió esa salida a O
                let promoted = was_committing && record.done;
                if recovered || promoted {
                    record.done = true;
                } else {
                    record.done = false;
                    record.latest_attempt = record.task_id.attempt(0);
                    queue_items.push(Task {
                        attempt_id: record.latest_attempt.clone(),
                        input_path: record.input_path.clone(),
                        output_root: info.output_dir.clone(),
                        committer: state.config.committer.clone(),
                    });
                }
                records.insert(record.task_id.clone(), record);
            }
            info.recovered_tasks = report.recovered.len() as u32;
            info.completed_tasks = records.values().filter(|r| r.done).count() as u32;
            info.status = if queue_items.is_empty() {
                JobStatus::Committing
            } else {
                JobStatus::Accepted
            };
        }
        Err(e) => {
            // el staging queda como está para inspección
            warn!("no se pudo recuperar el job {}: {}", job_id, e);
            info.status = JobStatus::Failed;
            info.finished_at = Some(chrono::Utc::now());
            info.last_error = Some(e.to_string());
            records = tasks.into_iter().map(|t| (t.task_id.clone(), t)).collect();
        }
    }

    state.jobs.lock().unwrap().insert(
        job_id,
        JobEntry {
            info,
            committer,
            tasks: records,
            commit_in_progress: false,
            commit_failures: 0,
        },
    );
    state.tasks_queue.lock().unwrap().extend(queue_items);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterConfig;
    use chrono::Utc;
    use committer::{
        CommitterConfig, FileSystem, FsError, JobInfo, LocalFileSystem, OutputCommitter,
        TaskType, TextOutputWriter,
    };
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("master_restore_tests").join(sub);
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).unwrap();
        base
    }

    fn state(base: &Path, app_attempt: u32) -> AppState {
        let config = MasterConfig {
            bind: "127.0.0.1:0".to_string(),
            state_dir: base.join("state"),
            committer: CommitterConfig::default().with_app_attempt(app_attempt),
        };
        AppState::new(config, Arc::new(LocalFileSystem::new()))
    }

    fn snapshot(out: &Path, status: JobStatus, app_attempt: u32) -> JobSnapshot {
        let id = JobId::new("20240101000000", 7).unwrap();
        let tasks = (0..2)
            .map(|i| {
                let task_id = id.task(TaskType::Map, i);
                TaskRecord {
                    latest_attempt: task_id.attempt(0),
                    task_id,
                    input_path: format!("/in/{}.txt", i),
                    done: i == 0,
                }
            })
            .collect();
        JobSnapshot {
            info: JobInfo {
                id,
                name: "wc".to_string(),
                status,
                input_glob: "/in/*".to_string(),
                output_dir: out.to_string_lossy().to_string(),
                app_attempt,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
                total_tasks: 2,
                completed_tasks: 1,
                recovered_tasks: 0,
                failed_tasks: 0,
                retries: 0,
                last_error: None,
            },
            tasks,
        }
    }

    // Deja la tarea 0 commiteada en el staging del intento 1
    fn commit_first_task(out: &Path, snap: &JobSnapshot) {
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let committer = committer_for(fs.clone(), out, CommitterConfig::default());
        committer.setup_job().unwrap();
        let attempt = &snap.tasks[0].latest_attempt;
        committer.setup_task(attempt).unwrap();
        let mut w = TextOutputWriter::new(fs, &committer.work_path(attempt), attempt.task_id());
        w.write(Some("hola"), Some("1")).unwrap();
        w.close().unwrap();
        committer.commit_task(attempt).unwrap();
    }

    #[test]
    fn retoma_job_y_solo_reencola_lo_pendiente() {
        let base = temp_dir("resume");
        let out = base.join("out");
        let snap = snapshot(&out, JobStatus::Running, 1);
        commit_first_task(&out, &snap);

        let state = state(&base, 2);
        let resumed = restore_jobs(&state, vec![snap.clone()]).unwrap();
        assert_eq!(resumed, vec![snap.info.id.clone()]);

        let jobs = state.jobs.lock().unwrap();
        let entry = &jobs[&snap.info.id];
        assert_eq!(entry.info.app_attempt, 2);
        assert_eq!(entry.info.recovered_tasks, 1);
        assert_eq!(entry.info.completed_tasks, 1);
        assert_eq!(entry.info.status, JobStatus::Accepted);

        let queue = state.tasks_queue.lock().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].attempt_id.task_id(), &snap.tasks[1].task_id);

        let migrated = out
            .join("_temporary")
            .join("2")
            .join(snap.tasks[0].task_id.to_string());
        assert!(migrated.join("part-m-00000").exists());
    }

    #[test]
    fn rechaza_intento_no_mayor_al_del_journal() {
        let base = temp_dir("same_attempt");
        let out = base.join("out");
        let state = state(&base, 1);

        let err = restore_jobs(&state, vec![snapshot(&out, JobStatus::Running, 1)]);
        assert!(err.is_err());
        assert!(state.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn rechaza_saltear_intentos() {
        let base = temp_dir("skipped_attempt");
        let out = base.join("out");
        let state = state(&base, 3);

        let err = restore_jobs(&state, vec![snapshot(&out, JobStatus::Running, 1)]);
        assert!(err.is_err());
        assert!(state.jobs.lock().unwrap().is_empty());
        assert!(state.tasks_queue.lock().unwrap().is_empty());
    }

    /// Sólo falla el rename; el resto va al disco local.
    struct RenameFailsFs;

    impl FileSystem for RenameFailsFs {
        fn rename(&self, src: &Path, _dst: &Path) -> Result<(), FsError> {
            Err(FsError::io(
                "rename",
                src,
                std::io::Error::new(std::io::ErrorKind::Other, "rename roto"),
            ))
        }

        fn delete(&self, path: &Path, recursive: bool) -> Result<bool, FsError> {
            LocalFileSystem.delete(path, recursive)
        }

        fn mkdirs(&self, path: &Path) -> Result<(), FsError> {
            LocalFileSystem.mkdirs(path)
        }

        fn exists(&self, path: &Path) -> bool {
            LocalFileSystem.exists(path)
        }

        fn is_dir(&self, path: &Path) -> bool {
            LocalFileSystem.is_dir(path)
        }

        fn list_children(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
            LocalFileSystem.list_children(path)
        }

        fn create(&self, path: &Path) -> Result<Box<dyn Write + Send>, FsError> {
            LocalFileSystem.create(path)
        }
    }

    #[test]
    fn fallo_de_recuperacion_marca_el_job_failed_y_conserva_el_staging() {
        let base = temp_dir("recovery_fails");
        let out = base.join("out");
        let snap = snapshot(&out, JobStatus::Running, 1);
        commit_first_task(&out, &snap);

        let config = MasterConfig {
            bind: "127.0.0.1:0".to_string(),
            state_dir: base.join("state"),
            committer: CommitterConfig::default().with_app_attempt(2),
        };
        let state = AppState::new(config, Arc::new(RenameFailsFs));

        let resumed = restore_jobs(&state, vec![snap.clone()]).unwrap();
        assert_eq!(resumed, vec![snap.info.id.clone()]);

        let jobs = state.jobs.lock().unwrap();
        let entry = &jobs[&snap.info.id];
        assert_eq!(entry.info.status, JobStatus::Failed);
        assert!(entry.info.last_error.as_deref().unwrap_or("").contains("rename roto"));
        assert!(state.tasks_queue.lock().unwrap().is_empty());

        let previous = out
            .join("_temporary")
            .join("1")
            .join(snap.tasks[0].task_id.to_string());
        assert!(previous.join("part-m-00000").exists());
    }

    #[test]
    fn jobs_terminados_se_cargan_sin_reencolar() {
        let base = temp_dir("terminal");
        let out = base.join("out");
        let state = state(&base, 1);

        let resumed = restore_jobs(&state, vec![snapshot(&out, JobStatus::Succeeded, 1)]).unwrap();
        assert!(resumed.is_empty());
        assert_eq!(state.jobs.lock().unwrap().len(), 1);
        assert!(state.tasks_queue.lock().unwrap().is_empty());
        assert!(!out.join("_temporary").exists());
    }
}
