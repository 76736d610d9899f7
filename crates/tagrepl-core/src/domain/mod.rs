//! Domain model (task, identity, state, errors).

pub mod errors;
pub mod state;
pub mod task;

pub use self::errors::{SourceError, StoreError, ValidatorError};
pub use self::state::{TaskState, UnknownTaskState};
pub use self::task::{Task, TaskKey};
