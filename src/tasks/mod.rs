//! # Task model: identity, status, progress, children, and the task core.

pub mod children;
pub mod id;
pub mod progress;
pub mod spec;
pub mod status;
pub mod task;
pub mod task_fn;

pub use children::{Children, ForeignTask};
pub use id::{TaskId, TaskInfo};
pub use progress::Progress;
pub use spec::TaskSpec;
pub use status::{Status, TaskEssentials, TaskState};
pub use task::Task;
pub use task_fn::{TaskFn, TaskImpl};
