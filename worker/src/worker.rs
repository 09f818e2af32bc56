use anyhow::{bail, Result};
use committer::{
    committer_for, FileSystem, LocalFileSystem, OutputCommitter, Task, TaskAssignmentRequest,
    TaskAssignmentResponse, TaskCommitRequest, TaskCommitResponse, TaskCompleteRequest,
    WorkerHeartbeatRequest, WorkerId, WorkerRegisterRequest, WorkerRegisterResponse,
};
use reqwest::{Client, StatusCode};
use std::{
    env,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::wordcount;

const DEFAULT_WORKER_CONCURRENCY: u32 = 2;

/// Ventana de commit: sólo se commitea si el último heartbeat aceptado es
/// más reciente que esto. Debe ser menor que el timeout con el que el
/// master declara muerto a un worker (20s), así un worker aislado deja de
/// commitear antes de que su intento se re-asigne.
pub const COMMIT_WINDOW: Duration = Duration::from_secs(10);

/// `true` si un heartbeat aceptado en `last_ok` todavía habilita a commitear.
pub fn within_commit_window(last_ok: Instant, now: Instant) -> bool {
    now.saturating_duration_since(last_ok) < COMMIT_WINDOW
}

/// Loop principal del worker.
/// - Se registra en el master.
/// - Hace heartbeats periódicos (y se re-registra si el master lo olvidó).
/// - Pide intentos mientras tenga "slots" libres.
/// - Ejecuta cada intento en paralelo (hasta WORKER_CONCURRENCY).
pub async fn run() -> Result<()> {
    let base_url =
        env::var("MASTER_BASE_URL").unwrap_or_else(|_| "http://master:8080".to_string());
    let client = Client::new();
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let max_concurrency: u32 = env::var("WORKER_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_WORKER_CONCURRENCY);

    let mut worker_id = register(&client, &base_url, &hostname, max_concurrency).await?;
    info!(
        "worker {} registrado con concurrency={} contra {}",
        worker_id, max_concurrency, base_url
    );

    let sem = Arc::new(Semaphore::new(max_concurrency as usize));

    // instante del último heartbeat aceptado por el master
    let last_heartbeat_ok = Arc::new(Mutex::new(Instant::now()));

    // System para leer CPU y memoria
    let mut sys = System::new_all();

    loop {
        // --------- Heartbeat al master con CPU/MEM ---------
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_info().cpu_usage();
        // used_memory devuelve KB -> lo pasamos a bytes
        let mem_bytes = sys.used_memory() * 1024;

        let hb_url = format!("{}/api/v1/workers/heartbeat", base_url);
        let hb = client
            .post(&hb_url)
            .json(&WorkerHeartbeatRequest {
                worker_id: worker_id.clone(),
                cpu_percent,
                mem_bytes,
            })
            .send()
            .await;

        match hb {
            Ok(resp) if matches!(resp.status(), StatusCode::GONE | StatusCode::NOT_FOUND) => {
                warn!(
                    "el master no reconoce al worker {} ({}), re-registrando",
                    worker_id,
                    resp.status()
                );
                match register(&client, &base_url, &hostname, max_concurrency).await {
                    Ok(id) => {
                        info!("worker re-registrado como {}", id);
                        worker_id = id;
                        *last_heartbeat_ok.lock().unwrap() = Instant::now();
                    }
                    Err(e) => warn!("re-registro falló: {:?}", e),
                }
            }
            Ok(resp) if resp.status().is_success() => {
                *last_heartbeat_ok.lock().unwrap() = Instant::now();
            }
            Ok(resp) => warn!("heartbeat rechazado ({})", resp.status()),
            Err(e) => warn!("heartbeat falló: {:?}", e),
        }

        // --------- Control de concurrencia local ---------
        let permit = match sem.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                // No hay capacidad para nuevos intentos; esperamos un poco
                sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        // Pedimos intento al master
        let assign_url = format!("{}/api/v1/tasks/next", base_url);
        let assignment: Option<TaskAssignmentResponse> = match client
            .post(&assign_url)
            .json(&TaskAssignmentRequest {
                worker_id: worker_id.clone(),
            })
            .send()
            .await
        {
            Ok(res) => res.json().await.ok(),
            Err(e) => {
                warn!("no se pudo pedir tarea: {:?}", e);
                None
            }
        };

        if let Some(task) = assignment.and_then(|a| a.task) {
            info!(
                "tengo intento {} (input={} output={})",
                task.attempt_id, task.input_path, task.output_root
            );

            let client_cloned = client.clone();
            let base_url_cloned = base_url.clone();
            let worker_id_cloned = worker_id.clone();
            let fs_cloned = fs.clone();
            let heartbeat_cloned = last_heartbeat_ok.clone();

            tokio::spawn(async move {
                let outcome = execute_attempt(
                    &client_cloned,
                    &base_url_cloned,
                    &worker_id_cloned,
                    fs_cloned,
                    heartbeat_cloned,
                    task.clone(),
                )
                .await;

                let (success, error) = match outcome {
                    Ok(()) => {
                        info!("terminé {} correctamente", task.attempt_id);
                        (true, None)
                    }
                    Err(e) => {
                        warn!("intento {} falló: {:#}", task.attempt_id, e);
                        (false, Some(format!("{:#}", e)))
                    }
                };

                // Reportar al master que terminamos
                let complete_url = format!("{}/api/v1/tasks/complete", base_url_cloned);
                if let Err(e) = client_cloned
                    .post(&complete_url)
                    .json(&TaskCompleteRequest {
                        attempt_id: task.attempt_id.clone(),
                        success,
                        error,
                    })
                    .send()
                    .await
                {
                    warn!("no se pudo reportar {}: {:?}", task.attempt_id, e);
                }

                // Liberar el "slot" de concurrencia al terminar
                drop(permit);
            });
        } else {
            // No hay tarea: devolvemos el permiso y dormimos
            drop(permit);
            info!("worker {} pidió tarea pero no hay", worker_id);
            sleep(Duration::from_secs(2)).await;
        }
    }
}

async fn register(
    client: &Client,
    base_url: &str,
    hostname: &str,
    max_concurrency: u32,
) -> Result<WorkerId> {
    let register_url = format!("{}/api/v1/workers/register", base_url);
    let res = client
        .post(&register_url)
        .json(&WorkerRegisterRequest {
            hostname: hostname.to_string(),
            max_concurrency,
        })
        .send()
        .await?
        .error_for_status()?;
    let WorkerRegisterResponse { worker_id } = res.json().await?;
    Ok(worker_id)
}

/// Corre el intento completo: map, lease de commit y commit_task.
/// Cualquier fallo deja el directorio de trabajo abortado.
async fn execute_attempt(
    client: &Client,
    base_url: &str,
    worker_id: &str,
    fs: Arc<dyn FileSystem>,
    last_heartbeat_ok: Arc<Mutex<Instant>>,
    task: Task,
) -> Result<()> {
    let committer = committer_for(fs.clone(), &task.output_root, task.committer.clone());

    // 1) Map en un hilo de bloqueo
    let map_committer = committer.clone();
    let map_task = task.clone();
    let mapped = tokio::task::spawn_blocking(move || {
        wordcount::run_map_attempt(fs, map_committer.as_ref(), &map_task)
    })
    .await;

    let needs_commit = match mapped {
        Ok(Ok(needs)) => needs,
        Ok(Err(e)) => {
            abort(committer, &task).await;
            return Err(e);
        }
        Err(e) => {
            abort(committer, &task).await;
            bail!("panic o join error: {:?}", e);
        }
    };

    if !needs_commit {
        info!("{} no produjo salida, nada que commitear", task.attempt_id);
        return Ok(());
    }

    // 2) Pedir el lease de commit
    let commit_url = format!("{}/api/v1/tasks/commit", base_url);
    let granted = match client
        .post(&commit_url)
        .json(&TaskCommitRequest {
            worker_id: worker_id.to_string(),
            attempt_id: task.attempt_id.clone(),
        })
        .send()
        .await
    {
        Ok(resp) => resp
            .json::<TaskCommitResponse>()
            .await
            .map(|r| r.granted)
            .unwrap_or(false),
        Err(e) => {
            warn!("no se pudo pedir lease para {}: {:?}", task.attempt_id, e);
            false
        }
    };

    if !granted {
        abort(committer, &task).await;
        bail!("commit denegado para {}", task.attempt_id);
    }

    // sin heartbeat reciente el master puede habernos dado por muertos y
    // re-asignado la tarea
    let last_ok = *last_heartbeat_ok.lock().unwrap();
    if !within_commit_window(last_ok, Instant::now()) {
        abort(committer, &task).await;
        bail!(
            "{} fuera de la ventana de commit (último heartbeat hace {:?})",
            task.attempt_id,
            last_ok.elapsed()
        );
    }

    // 3) commit_task
    let commit_committer = committer.clone();
    let attempt = task.attempt_id.clone();
    let committed =
        tokio::task::spawn_blocking(move || commit_committer.commit_task(&attempt)).await;

    match committed {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            abort(committer, &task).await;
            Err(e.into())
        }
        Err(e) => {
            abort(committer, &task).await;
            bail!("panic o join error en commit: {:?}", e);
        }
    }
}

async fn abort(committer: Arc<dyn OutputCommitter>, task: &Task) {
    let attempt = task.attempt_id.clone();
    let res = tokio::task::spawn_blocking(move || committer.abort_task(&attempt)).await;
    match res {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("abort de {} falló: {}", task.attempt_id, e),
        Err(e) => warn!("panic o join error abortando {}: {:?}", task.attempt_id, e),
    }
}
