// Tasks module - task records, the shared registry, the worker pool and
// the retention sweeper

pub mod model;
pub mod registry;
pub mod sweeper;
pub mod worker;

pub use model::{Task, TaskEvent, TaskStatus, TaskView};
pub use registry::{InMemoryTaskRegistry, TaskRegistry};
pub use sweeper::{RetentionSweeper, SweepReport};
pub use worker::{DownloadManager, SubmitRequest, WorkerConfig};
