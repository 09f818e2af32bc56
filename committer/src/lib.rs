pub mod committer;
pub mod config;
pub mod error;
pub mod fs;
pub mod ids;
pub mod job;
pub mod layout;
pub mod output;
pub mod recovery;
pub mod results;
pub mod task;
pub mod tree;
pub mod worker;

pub use committer::{committer_for, FileOutputCommitter, JobPhase, OutputCommitter, TerminalState};
pub use config::{AlgorithmVersion, CommitterConfig};
pub use error::{CommitError, CommitResult, FsError};
pub use fs::{FileSystem, LocalFileSystem};
pub use ids::{JobId, TaskAttemptId, TaskId, TaskType};
pub use job::{JobInfo, JobRequest, JobStatus};
pub use layout::StagingLayout;
pub use output::TextOutputWriter;
pub use recovery::{RecoveryCoordinator, RecoveryReport};
pub use results::JobResults;
pub use task::{Task, TaskCommitRequest, TaskCommitResponse, TaskCompleteRequest, TaskCompleteResponse};
pub use worker::{
    TaskAssignmentRequest, TaskAssignmentResponse, WorkerHeartbeatRequest,
    WorkerHeartbeatResponse, WorkerId, WorkerMetrics, WorkerRegisterRequest,
    WorkerRegisterResponse,
};
