//! Identificadores de job, tarea e intento.
//!
//! Formato en texto (igual que en disco y en la API HTTP):
//!
//! ```text
//! job_<tracker>_<nnnn>
//! task_<tracker>_<nnnn>_<m|r>_<nnnnnn>
//! attempt_<tracker>_<nnnn>_<m|r>_<nnnnnn>_<n>
//! ```

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::CommitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Map,
    Reduce,
}

impl TaskType {
    pub fn code(self) -> char {
        match self {
            TaskType::Map => 'm',
            TaskType::Reduce => 'r',
        }
    }

    fn from_code(s: &str) -> Option<Self> {
        match s {
            "m" => Some(TaskType::Map),
            "r" => Some(TaskType::Reduce),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId {
    tracker: String,
    number: u32,
}

impl JobId {
    /// `tracker` no puede estar vacío ni contener `_`.
    pub fn new(tracker: impl Into<String>, number: u32) -> Result<Self, CommitError> {
        let tracker = tracker.into();
        if tracker.is_empty() || tracker.contains('_') {
            return Err(CommitError::InvalidId(format!(
                "tracker '{}' no válido para un job id",
                tracker
            )));
        }
        Ok(Self { tracker, number })
    }

    pub fn tracker(&self) -> &str {
        &self.tracker
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn task(&self, task_type: TaskType, number: u32) -> TaskId {
        TaskId {
            job: self.clone(),
            task_type,
            number,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{}_{:04}", self.tracker, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId {
    job: JobId,
    task_type: TaskType,
    number: u32,
}

impl TaskId {
    pub fn job_id(&self) -> &JobId {
        &self.job
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn attempt(&self, attempt: u32) -> TaskAttemptId {
        TaskAttemptId {
            task: self.clone(),
            attempt,
        }
    }

    /// Nombre del archivo de salida de la tarea, ej: `part-m-00000`.
    pub fn part_file_name(&self) -> String {
        format!("part-{}-{:05}", self.task_type.code(), self.number)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task_{}_{:04}_{}_{:06}",
            self.job.tracker,
            self.job.number,
            self.task_type.code(),
            self.number
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskAttemptId {
    task: TaskId,
    attempt: u32,
}

impl TaskAttemptId {
    /// Tarea a la que pertenece el intento (sin el sufijo de intento).
    pub fn task_id(&self) -> &TaskId {
        &self.task
    }

    pub fn job_id(&self) -> &JobId {
        &self.task.job
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn next(&self) -> TaskAttemptId {
        self.task.attempt(self.attempt + 1)
    }
}

impl fmt::Display for TaskAttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task = self.task.to_string();
        // "task_..." -> "attempt_..."
        write!(f, "attempt{}_{}", &task["task".len()..], self.attempt)
    }
}

/* ---------- parsing ---------- */

fn invalid(kind: &str, s: &str) -> CommitError {
    CommitError::InvalidId(format!("'{}' no es un {} válido", s, kind))
}

fn parse_num(part: &str, kind: &str, s: &str) -> Result<u32, CommitError> {
    part.parse::<u32>().map_err(|_| invalid(kind, s))
}

/// Separa `<prefix>_a_b_c...` y verifica prefijo y cantidad de partes.
fn split_parts<'a>(s: &'a str, prefix: &str, n: usize, kind: &str) -> Result<Vec<&'a str>, CommitError> {
    let parts: Vec<&str> = s.split('_').collect();
    if parts.len() != n || parts[0] != prefix {
        return Err(invalid(kind, s));
    }
    Ok(parts)
}

fn task_from_parts(parts: &[&str], kind: &str, s: &str) -> Result<TaskId, CommitError> {
    let job = JobId::new(parts[1], parse_num(parts[2], kind, s)?)?;
    let task_type = TaskType::from_code(parts[3]).ok_or_else(|| invalid(kind, s))?;
    Ok(TaskId {
        job,
        task_type,
        number: parse_num(parts[4], kind, s)?,
    })
}

impl FromStr for JobId {
    type Err = CommitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_parts(s, "job", 3, "job id")?;
        JobId::new(parts[1], parse_num(parts[2], "job id", s)?)
    }
}

impl FromStr for TaskId {
    type Err = CommitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_parts(s, "task", 5, "task id")?;
        task_from_parts(&parts, "task id", s)
    }
}

impl FromStr for TaskAttemptId {
    type Err = CommitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = split_parts(s, "attempt", 6, "attempt id")?;
        let task = task_from_parts(&parts, "attempt id", s)?;
        Ok(TaskAttemptId {
            task,
            attempt: parse_num(parts[5], "attempt id", s)?,
        })
    }
}

macro_rules! string_conversions {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = CommitError;

                fn try_from(s: String) -> Result<Self, Self::Error> {
                    s.parse()
                }
            }

            impl From<$ty> for String {
                fn from(id: $ty) -> String {
                    id.to_string()
                }
            }
        )*
    };
}

string_conversions!(JobId, TaskId, TaskAttemptId);

#[cfg(test)]
mod tests {
    use super::*;

    const ATTEMPT: &str = "attempt_200707121733_0001_m_000000_0";

    #[test]
    fn attempt_id_se_parsea_y_se_formatea_igual() {
        let id: TaskAttemptId = ATTEMPT.parse().unwrap();
        assert_eq!(id.to_string(), ATTEMPT);
        assert_eq!(id.attempt(), 0);
        assert_eq!(id.job_id().to_string(), "job_200707121733_0001");
        assert_eq!(id.task_id().task_type(), TaskType::Map);
    }

    #[test]
    fn task_id_quita_el_sufijo_de_intento() {
        let a0: TaskAttemptId = ATTEMPT.parse().unwrap();
        let a1 = a0.next();
        assert_eq!(a1.to_string(), "attempt_200707121733_0001_m_000000_1");
        assert_eq!(a0.task_id(), a1.task_id());
        assert_eq!(a0.task_id().to_string(), "task_200707121733_0001_m_000000");
    }

    #[test]
    fn part_file_name_usa_tipo_y_numero() {
        let job = JobId::new("200707121733", 1).unwrap();
        assert_eq!(job.task(TaskType::Map, 0).part_file_name(), "part-m-00000");
        assert_eq!(job.task(TaskType::Reduce, 12).part_file_name(), "part-r-00012");
    }

    #[test]
    fn ids_invalidos_se_rechazan() {
        assert!("attempt_x_1_m_0".parse::<TaskAttemptId>().is_err());
        assert!("task_x_1_z_0".parse::<TaskId>().is_err());
        assert!("job_x_abc".parse::<JobId>().is_err());
        assert!(JobId::new("a_b", 1).is_err());
        assert!(JobId::new("", 1).is_err());
    }

    #[test]
    fn serde_usa_la_forma_en_texto() {
        let id: TaskAttemptId = ATTEMPT.parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", ATTEMPT));
        let back: TaskAttemptId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<TaskAttemptId>("\"nope\"").is_err());
    }
}
