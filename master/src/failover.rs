use std::collections::HashSet;
use std::time::{Duration, SystemTime};

use committer::{JobId, JobStatus, WorkerId};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::jobs;
use crate::state::{AppState, InFlight};
use crate::{FAILOVER_SWEEP_INTERVAL_SECS, WORKER_HEARTBEAT_TIMEOUT_SECS};

/// Loop principal de tolerancia a fallos:
/// - detecta workers muertos (sin heartbeat)
/// - libera sus leases y re-encola sus intentos
/// - reintenta commits de job que quedaron a medias
pub async fn run_failover_loop(state: AppState) {
    loop {
        sleep(Duration::from_secs(FAILOVER_SWEEP_INTERVAL_SECS)).await;
        sweep_once(&state).await;
    }
}

/// Una pasada de chequeo:
/// 1. marca workers muertos
/// 2. saca de in_flight los intentos de esos workers
/// 3. los trata como intentos fallidos (abort + nuevo intento)
/// 4. reintenta commit_job de jobs en COMMITTING
pub async fn sweep_once(state: &AppState) {
    let now = SystemTime::now();

    // 1) Detectar qué workers están muertos
    let mut newly_dead: HashSet<WorkerId> = HashSet::new();
    {
        let mut workers = state.workers.lock().unwrap();
        for (worker_id, meta) in workers.iter_mut() {
            if meta.dead {
                continue;
            }
            // last_heartbeat en el futuro se ignora
            let Ok(elapsed) = now.duration_since(meta.last_heartbeat) else {
                continue;
            };
            if elapsed > Duration::from_secs(WORKER_HEARTBEAT_TIMEOUT_SECS) {
                meta.dead = true;
                newly_dead.insert(worker_id.clone());
                warn!(
                    "marcando worker {} como DEAD (sin heartbeat hace {:?})",
                    worker_id, elapsed
                );
            }
        }
    }

    // 2) Sacar de in_flight los intentos de esos workers
    let orphaned: Vec<InFlight> = if newly_dead.is_empty() {
        Vec::new()
    } else {
        let mut in_flight = state.in_flight.lock().unwrap();
        let ids: Vec<_> = in_flight
            .iter()
            .filter(|(_, f)| newly_dead.contains(&f.worker_id))
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter().filter_map(|id| in_flight.remove(id)).collect()
    };

    // 3) Cada intento huérfano cuenta como fallido
    for inflight in orphaned {
        info!(
            "intento {} perdido por caída del worker {}",
            inflight.task.attempt_id, inflight.worker_id
        );
        let reason = format!("worker {} sin heartbeat", inflight.worker_id);
        jobs::task_failed(state, inflight.task, &reason).await;
    }

    // 4) Commits de job pendientes de reintento
    let stuck: Vec<JobId> = {
        let jobs = state.jobs.lock().unwrap();
        jobs.iter()
            .filter(|(_, e)| {
                matches!(e.info.status, JobStatus::Committing) && !e.commit_in_progress
            })
            .map(|(id, _)| id.clone())
            .collect()
    };
    for job_id in stuck {
        info!("reintentando commit del job {}", job_id);
        jobs::finish_job_if_done(state, &job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MasterConfig;
    use crate::state::{JobEntry, TaskRecord, WorkerMeta};
    use chrono::Utc;
    use committer::{
        committer_for, CommitterConfig, FileSystem, JobInfo, LocalFileSystem, Task, TaskType,
    };
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("master_failover_tests").join(sub);
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(&base).unwrap();
        base
    }

    fn state_with_job(base: &PathBuf) -> (AppState, Task) {
        let config = MasterConfig {
            bind: "127.0.0.1:0".to_string(),
            state_dir: base.join("state"),
            committer: CommitterConfig::default(),
        };
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
        let state = AppState::new(config, fs.clone());

        let out = base.join("out");
        let committer = committer_for(fs, &out, CommitterConfig::default());
        committer.setup_job().unwrap();

        let job_id = JobId::new("20240101000000", 1).unwrap();
        let task_id = job_id.task(TaskType::Map, 0);
        let attempt = task_id.attempt(0);
        let task = Task {
            attempt_id: attempt.clone(),
            input_path: "/nada".to_string(),
            output_root: out.to_string_lossy().to_string(),
            committer: CommitterConfig::default(),
        };

        let mut tasks = BTreeMap::new();
        tasks.insert(
            task_id.clone(),
            TaskRecord {
                task_id: task_id.clone(),
                input_path: task.input_path.clone(),
                latest_attempt: attempt,
                done: false,
            },
        );
        let info = JobInfo {
            id: job_id.clone(),
            name: "wc".to_string(),
            status: JobStatus::Running,
            input_glob: "/nada/*".to_string(),
            output_dir: task.output_root.clone(),
            app_attempt: 1,
            submitted_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: None,
            total_tasks: 1,
            completed_tasks: 0,
            recovered_tasks: 0,
            failed_tasks: 0,
            retries: 0,
            last_error: None,
        };
        state.jobs.lock().unwrap().insert(
            job_id,
            JobEntry {
                info,
                committer,
                tasks,
                commit_in_progress: false,
                commit_failures: 0,
            },
        );
        (state, task)
    }

    fn worker(last_heartbeat: SystemTime) -> WorkerMeta {
        WorkerMeta {
            hostname: "h".to_string(),
            last_heartbeat,
            dead: false,
            max_concurrency: 1,
            tasks_started: 1,
            tasks_succeeded: 0,
            tasks_failed: 0,
            total_task_time_ms: 0,
            last_cpu_percent: None,
            last_mem_bytes: None,
        }
    }

    #[tokio::test]
    async fn worker_muerto_libera_lease_y_reencola_siguiente_intento() {
        let base = temp_dir("dead_worker");
        let (state, task) = state_with_job(&base);

        let old = SystemTime::now() - Duration::from_secs(WORKER_HEARTBEAT_TIMEOUT_SECS + 5);
        state.workers.lock().unwrap().insert("w1".to_string(), worker(old));
        state.in_flight.lock().unwrap().insert(
            task.attempt_id.clone(),
            InFlight {
                task: task.clone(),
                worker_id: "w1".to_string(),
                started_at: SystemTime::now(),
            },
        );
        state
            .commit_leases
            .lock()
            .unwrap()
            .insert(task.attempt_id.task_id().clone(), task.attempt_id.clone());

        sweep_once(&state).await;

        assert!(state.workers.lock().unwrap()["w1"].dead);
        assert!(state.in_flight.lock().unwrap().is_empty());
        assert!(state.commit_leases.lock().unwrap().is_empty());

        let queue = state.tasks_queue.lock().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].attempt_id.attempt(), 1);
        assert_eq!(queue[0].attempt_id.task_id(), task.attempt_id.task_id());
    }

    #[tokio::test]
    async fn worker_vivo_no_se_toca() {
        let base = temp_dir("alive_worker");
        let (state, task) = state_with_job(&base);

        state
            .workers
            .lock()
            .unwrap()
            .insert("w1".to_string(), worker(SystemTime::now()));
        state.in_flight.lock().unwrap().insert(
            task.attempt_id.clone(),
            InFlight {
                task,
                worker_id: "w1".to_string(),
                started_at: SystemTime::now(),
            },
        );

        sweep_once(&state).await;

        assert!(!state.workers.lock().unwrap()["w1"].dead);
        assert_eq!(state.in_flight.lock().unwrap().len(), 1);
        assert!(state.tasks_queue.lock().unwrap().is_empty());
    }
}
