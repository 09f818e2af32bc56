//! Journal de jobs en disco: una foto JSON por job en
//! `<state_dir>/jobs/<job_id>.json`, escrita con write + rename.
//! Es lo que permite a un master reiniciado saber qué jobs retomar.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use committer::{JobId, JobInfo};
use glob::glob;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::{JobEntry, TaskRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub info: JobInfo,
    pub tasks: Vec<TaskRecord>,
}

impl JobSnapshot {
    pub fn of(entry: &JobEntry) -> Self {
        Self {
            info: entry.info.clone(),
            tasks: entry.tasks.values().cloned().collect(),
        }
    }
}

fn jobs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("jobs")
}

fn job_file(state_dir: &Path, job_id: &JobId) -> PathBuf {
    jobs_dir(state_dir).join(format!("{}.json", job_id))
}

pub fn save(state_dir: &Path, snapshot: &JobSnapshot) -> Result<()> {
    let dir = jobs_dir(state_dir);
    fs::create_dir_all(&dir)
        .with_context(|| format!("no se pudo crear {}", dir.display()))?;

    let final_path = job_file(state_dir, &snapshot.info.id);
    // nombre único por escritura: dos saves del mismo job no comparten tmp
    let tmp_path = dir.join(format!(
        "{}.{}.json.tmp",
        snapshot.info.id,
        uuid::Uuid::new_v4()
    ));

    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let mut f = fs::File::create(&tmp_path)
        .with_context(|| format!("no se pudo crear {}", tmp_path.display()))?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    drop(f);

    fs::rename(&tmp_path, &final_path)
        .with_context(|| format!("no se pudo renombrar {}", tmp_path.display()))?;
    Ok(())
}

/// Carga todas las fotos. Un archivo corrupto se ignora con un warning.
pub fn load_all(state_dir: &Path) -> Result<Vec<JobSnapshot>> {
    let pattern = jobs_dir(state_dir).join("*.json");
    let pattern = pattern.to_string_lossy().to_string();

    let mut out = Vec::new();
    for entry in glob(&pattern).context("patrón del journal inválido")? {
        let path = match entry {
            Ok(p) => p,
            Err(e) => {
                warn!("no se pudo leer entrada del journal: {:?}", e);
                continue;
            }
        };

        let raw = fs::read(&path).with_context(|| format!("leyendo {}", path.display()))?;
        match serde_json::from_slice::<JobSnapshot>(&raw) {
            Ok(snap) => out.push(snap),
            Err(e) => warn!("journal corrupto en {}: {}", path.display(), e),
        }
    }

    out.sort_by(|a, b| a.info.id.cmp(&b.info.id));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use committer::{JobStatus, TaskType};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = std::env::temp_dir().join("master_journal_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn snapshot(number: u32) -> JobSnapshot {
        let id = JobId::new("20240101000000", number).unwrap();
        let task_id = id.task(TaskType::Map, 0);
        JobSnapshot {
            info: JobInfo {
                id,
                name: "wc".to_string(),
                status: JobStatus::Running,
                input_glob: "/data/input/*".to_string(),
                output_dir: "/data/output/wc".to_string(),
                app_attempt: 1,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
                total_tasks: 1,
                completed_tasks: 0,
                recovered_tasks: 0,
                failed_tasks: 0,
                retries: 0,
                last_error: None,
            },
            tasks: vec![TaskRecord {
                latest_attempt: task_id.attempt(0),
                task_id,
                input_path: "/data/input/a.txt".to_string(),
                done: false,
            }],
        }
    }

    #[test]
    fn save_y_load_all_devuelven_las_fotos() {
        let dir = temp_dir("roundtrip");
        save(&dir, &snapshot(2)).unwrap();
        save(&dir, &snapshot(1)).unwrap();

        // sobreescribir la misma foto no duplica
        let mut s = snapshot(1);
        s.info.status = JobStatus::Succeeded;
        save(&dir, &s).unwrap();

        let all = load_all(&dir).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].info.id.number(), 1);
        assert_eq!(all[0].info.status, JobStatus::Succeeded);
        assert_eq!(all[1].tasks[0].latest_attempt.attempt(), 0);
        let leftovers = fs::read_dir(dir.join("jobs"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn load_all_ignora_archivos_corruptos_y_dir_inexistente() {
        let dir = temp_dir("corrupt");
        assert!(load_all(&dir).unwrap().is_empty());

        save(&dir, &snapshot(1)).unwrap();
        fs::write(dir.join("jobs").join("roto.json"), b"{no es json").unwrap();

        let all = load_all(&dir).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn saves_concurrentes_del_mismo_job_no_fallan() {
        let dir = temp_dir("concurrent");
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let dir = dir.clone();
                std::thread::spawn(move || {
                    (0..200)
                        .filter(|_| save(&dir, &snapshot(1)).is_err())
                        .count()
                })
            })
            .collect();

        let failed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(failed, 0);
        assert_eq!(load_all(&dir).unwrap().len(), 1);
    }
}
