//! Recuperación al arrancar un nuevo intento de job.
//!
//! Antes de re-planificar tareas, se migra al staging del intento actual la
//! salida que el intento anterior ya había commiteado. Las tareas migradas
//! no se vuelven a ejecutar.

use tracing::{info, warn};

use crate::{
    committer::OutputCommitter,
    error::CommitResult,
    ids::{TaskAttemptId, TaskId},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tareas cuya salida ya está en el staging del intento actual.
    pub recovered: Vec<TaskId>,
    /// Tareas que hay que planificar desde cero.
    pub pending: Vec<TaskId>,
}

pub struct RecoveryCoordinator<'a> {
    committer: &'a dyn OutputCommitter,
}

impl<'a> RecoveryCoordinator<'a> {
    pub fn new(committer: &'a dyn OutputCommitter) -> Self {
        Self { committer }
    }

    /// Recupera cada tarea a partir de su último intento conocido.
    ///
    /// El primer fallo corta la recuperación y se propaga: el intento de
    /// job no puede arrancar sin saber qué tareas están completas.
    pub fn recover(&self, attempts: &[TaskAttemptId]) -> CommitResult<RecoveryReport> {
        let app_attempt = self.committer.app_attempt();
        let mut report = RecoveryReport::default();

        let has_previous = app_attempt > 1
            && self.committer.is_recovery_supported()
            && self.committer.has_job_attempt(app_attempt - 1);

        if !has_previous {
            info!(
                "intento de job {}: sin staging previo, {} tareas desde cero",
                app_attempt,
                attempts.len()
            );
            report.pending = attempts.iter().map(|a| a.task_id().clone()).collect();
            return Ok(report);
        }

        for attempt in attempts {
            match self.committer.recover_task(attempt, app_attempt) {
                Ok(true) => report.recovered.push(attempt.task_id().clone()),
                Ok(false) => report.pending.push(attempt.task_id().clone()),
                Err(e) => {
                    warn!("falló la recuperación de {}: {}", attempt, e);
                    return Err(e);
                }
            }
        }

        info!(
            "intento de job {}: {} tareas recuperadas, {} pendientes",
            app_attempt,
            report.recovered.len(),
            report.pending.len()
        );
        Ok(report)
    }
}
