//! Protocolo de commit de salida (tarea y job).
//!
//! Ciclo de vida de un intento de job:
//!
//! ```text
//! CREATED -> SETUP -> COMMITTING -> COMMITTED
//!                  \-> ABORTING  -> ABORTED
//! ```
//!
//! `COMMITTING` y `ABORTING` se pueden reintentar tras un fallo; desde
//! `COMMITTED`/`ABORTED` no hay más transiciones.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::{AlgorithmVersion, CommitterConfig},
    error::{CommitError, CommitResult, FsError},
    fs::FileSystem,
    ids::TaskAttemptId,
    layout::{StagingLayout, TEMP_DIR_NAME},
    tree,
};

/// Estado terminal con el que se aborta un job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Failed,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Created,
    Setup,
    Committing,
    Committed,
    Aborting,
    Aborted(TerminalState),
}

/// Contrato que el scheduler ve del protocolo de commit.
///
/// Precondición: para cada tarea, el scheduler garantiza que **un solo**
/// intento llama a `commit_task` (lease de commit del lado del scheduler).
/// El almacenamiento no ofrece compare-and-swap, así que el protocolo no
/// puede detectar dos commits concurrentes de la misma tarea.
pub trait OutputCommitter: Send + Sync {
    fn app_attempt(&self) -> u32;

    fn phase(&self) -> JobPhase;

    /// Directorio privado donde el intento escribe su salida.
    fn work_path(&self, attempt: &TaskAttemptId) -> PathBuf;

    fn setup_job(&self) -> CommitResult<()>;

    fn setup_task(&self, attempt: &TaskAttemptId) -> CommitResult<()>;

    fn needs_task_commit(&self, attempt: &TaskAttemptId) -> CommitResult<bool>;

    fn commit_task(&self, attempt: &TaskAttemptId) -> CommitResult<()>;

    fn abort_task(&self, attempt: &TaskAttemptId) -> CommitResult<()>;

    /// Migra la salida commiteada de la tarea desde el intento de job
    /// `new_app_attempt - 1`. Devuelve `false` si no había nada que
    /// recuperar (la tarea hay que re-ejecutarla).
    fn recover_task(&self, attempt: &TaskAttemptId, new_app_attempt: u32) -> CommitResult<bool>;

    fn commit_job(&self) -> CommitResult<()>;

    fn abort_job(&self, state: TerminalState) -> CommitResult<()>;

    /// `true` si existe el staging del intento de job `app_attempt`.
    fn has_job_attempt(&self, app_attempt: u32) -> bool;

    fn is_commit_job_repeatable(&self) -> bool {
        true
    }

    fn is_recovery_supported(&self) -> bool {
        true
    }
}

/// Construye el committer que corresponde a la versión configurada.
pub fn committer_for(
    fs: Arc<dyn FileSystem>,
    output_root: impl Into<PathBuf>,
    config: CommitterConfig,
) -> Arc<dyn OutputCommitter> {
    match config.algorithm {
        AlgorithmVersion::V1 => Arc::new(FileOutputCommitter::new(fs, output_root, config)),
    }
}

/// Committer v1 sobre un sistema de archivos con rename atómico.
pub struct FileOutputCommitter {
    fs: Arc<dyn FileSystem>,
    layout: StagingLayout,
    config: CommitterConfig,
    phase: Mutex<JobPhase>,
}

impl FileOutputCommitter {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        output_root: impl Into<PathBuf>,
        config: CommitterConfig,
    ) -> Self {
        Self {
            fs,
            layout: StagingLayout::new(output_root),
            config,
            phase: Mutex::new(JobPhase::Created),
        }
    }

    pub fn layout(&self) -> &StagingLayout {
        &self.layout
    }

    pub fn output_root(&self) -> &Path {
        self.layout.output_root()
    }

    pub fn filesystem(&self) -> Arc<dyn FileSystem> {
        self.fs.clone()
    }

    fn current_phase(&self) -> JobPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, next: JobPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Valida la transición `op` y pasa a `next`.
    fn begin(&self, op: &'static str, next: JobPhase) -> CommitResult<()> {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        let allowed = match (op, *phase) {
            ("setup_job", JobPhase::Created | JobPhase::Setup) => true,
            ("commit_job", JobPhase::Setup | JobPhase::Committing) => true,
            (
                "abort_job",
                JobPhase::Created | JobPhase::Setup | JobPhase::Committing | JobPhase::Aborting,
            ) => true,
            _ => false,
        };
        if !allowed {
            return Err(CommitError::InvalidTransition { op, from: *phase });
        }
        *phase = next;
        Ok(())
    }

    /// Promueve cada salida commiteada de `job_path` a la raíz de salida.
    fn promote_committed_tasks(&self, job_path: &Path) -> CommitResult<usize> {
        let fs = self.fs.as_ref();
        let out = self.layout.output_root();
        let mut renames = 0;

        for entry in fs.list_children(job_path)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            if name == TEMP_DIR_NAME {
                continue;
            }

            if !fs.is_dir(&entry) {
                renames += tree::merge_into(fs, &entry, &out.join(name))?;
                continue;
            }

            for child in fs.list_children(&entry)? {
                let Some(child_name) = child.file_name() else {
                    continue;
                };
                renames += tree::merge_into(fs, &child, &out.join(child_name))?;
            }
            fs.delete(&entry, false)?;
            debug!("salida de {} promovida", name.to_string_lossy());
        }

        Ok(renames)
    }

    fn write_success_marker(&self) -> CommitResult<()> {
        let marker = self.layout.success_marker_path();
        let mut w = self.fs.create(&marker)?;
        w.flush().map_err(|e| FsError::io("create", &marker, e))?;
        Ok(())
    }
}

impl OutputCommitter for FileOutputCommitter {
    fn app_attempt(&self) -> u32 {
        self.config.app_attempt
    }

    fn phase(&self) -> JobPhase {
        self.current_phase()
    }

    fn work_path(&self, attempt: &TaskAttemptId) -> PathBuf {
        self.layout.task_attempt_path(self.config.app_attempt, attempt)
    }

    fn setup_job(&self) -> CommitResult<()> {
        self.begin("setup_job", JobPhase::Setup)?;
        let work_root = self.layout.job_attempt_work_root(self.config.app_attempt);
        if let Err(e) = self.fs.mkdirs(&work_root) {
            self.set_phase(JobPhase::Created);
            return Err(e.into());
        }
        info!(
            "setup del job en {} (intento {})",
            self.layout.output_root().display(),
            self.config.app_attempt
        );
        Ok(())
    }

    fn setup_task(&self, attempt: &TaskAttemptId) -> CommitResult<()> {
        // el directorio de trabajo se crea en la primera escritura
        debug!(
            "setup de {} (trabajo en {})",
            attempt,
            self.work_path(attempt).display()
        );
        Ok(())
    }

    fn needs_task_commit(&self, attempt: &TaskAttemptId) -> CommitResult<bool> {
        Ok(tree::has_children(self.fs.as_ref(), &self.work_path(attempt))?)
    }

    fn commit_task(&self, attempt: &TaskAttemptId) -> CommitResult<()> {
        let work = self.work_path(attempt);
        if !self.fs.exists(&work) {
            warn!("{} no tiene salida que commitear en {}", attempt, work.display());
            return Ok(());
        }

        let committed = self
            .layout
            .committed_task_path(self.config.app_attempt, attempt.task_id());
        // lo que dejó otro intento de la misma tarea no sobrevive
        if self.fs.delete(&committed, true)? {
            info!("{} descarta salida previa en {}", attempt, committed.display());
        }
        self.fs
            .mkdirs(&self.layout.job_attempt_path(self.config.app_attempt))?;
        self.fs.rename(&work, &committed)?;

        info!("tarea {} commiteada en {}", attempt, committed.display());
        Ok(())
    }

    fn abort_task(&self, attempt: &TaskAttemptId) -> CommitResult<()> {
        let work = self.work_path(attempt);
        match self.fs.delete(&work, true) {
            Ok(existed) => {
                info!("tarea {} abortada (había salida: {})", attempt, existed);
                Ok(())
            }
            Err(e) => {
                warn!("no se pudo borrar {}: {}", work.display(), e);
                Err(e.into())
            }
        }
    }

    fn recover_task(&self, attempt: &TaskAttemptId, new_app_attempt: u32) -> CommitResult<bool> {
        if new_app_attempt <= 1 {
            debug!("intento de job {} no tiene anterior, nada que recuperar", new_app_attempt);
            return Ok(false);
        }

        let task = attempt.task_id();
        let previous = self.layout.committed_task_path(new_app_attempt - 1, task);
        let current = self.layout.committed_task_path(new_app_attempt, task);

        if !self.fs.exists(&previous) {
            info!(
                "{} no tiene salida commiteada en el intento {}",
                task,
                new_app_attempt - 1
            );
            return Ok(false);
        }

        self.fs.mkdirs(&self.layout.job_attempt_path(new_app_attempt))?;
        tree::merge_into(self.fs.as_ref(), &previous, &current)?;

        info!(
            "{} recuperada: {} -> {}",
            task,
            previous.display(),
            current.display()
        );
        Ok(true)
    }

    fn commit_job(&self) -> CommitResult<()> {
        self.begin("commit_job", JobPhase::Committing)?;

        let job_path = self.layout.job_attempt_path(self.config.app_attempt);
        if self.fs.exists(&job_path) {
            let renames = self.promote_committed_tasks(&job_path)?;
            info!(
                "{} entradas promovidas a {}",
                renames,
                self.layout.output_root().display()
            );
        } else {
            warn!("{} no existe, no hay salida que promover", job_path.display());
        }

        if self.config.mark_success {
            self.write_success_marker()?;
        }

        self.fs.delete(&self.layout.pending_root(), true)?;
        self.set_phase(JobPhase::Committed);
        info!("job commiteado en {}", self.layout.output_root().display());
        Ok(())
    }

    fn abort_job(&self, state: TerminalState) -> CommitResult<()> {
        self.begin("abort_job", JobPhase::Aborting)?;

        let pending = self.layout.pending_root();
        if let Err(e) = self.fs.delete(&pending, true) {
            warn!(
                "abort ({:?}) falló, se deja {} para diagnóstico: {}",
                state,
                pending.display(),
                e
            );
            return Err(e.into());
        }

        self.set_phase(JobPhase::Aborted(state));
        info!("job abortado ({:?}), {} borrado", state, pending.display());
        Ok(())
    }

    fn has_job_attempt(&self, app_attempt: u32) -> bool {
        self.fs.exists(&self.layout.job_attempt_path(app_attempt))
    }
}
