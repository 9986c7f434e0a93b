//! Domain model (ids, task record, status, kinds, outcomes).

pub mod decision;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;
pub mod task_type;

pub use decision::Decision;
pub use ids::TaskId;
pub use outcome::{Outcome, OutcomeKind};
pub use state::TaskStatus;
pub use task::{DEFAULT_MAX_RETRIES, Task};
pub use task_type::TaskKind;
