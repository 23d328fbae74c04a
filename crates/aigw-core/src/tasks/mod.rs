//! Generic background task engine.
//!
//! A [`Task`] tracks progress counters for one fire-and-forget job and fans
//! its events out to any number of listeners. Listeners that attach late
//! rebuild state from [`Task::snapshot`] and [`Task::final_event`]; there is
//! no replay log.

mod event;
mod registry;

pub use event::{TaskEvent, TaskSnapshot, TaskStatus};
pub use registry::{Subscription, Task, TaskRegistry};
