//! Task domain — model, enums, and the per-group code allocator.

pub mod codes;
pub mod model;

pub use codes::{CODE_ALLOC_ATTEMPTS, allocate_task, derived_code, random_code};
pub use model::{NewTask, Task, TaskFilter, TaskPatch, TaskPriority, TaskStatus, TagsInput};
