//! Domain types for taskpilot
//!
//! Plans and tasks drive the execution loop; sessions record document
//! authoring conversations.

mod id;
mod plan;
mod session;

pub use id::{PLAN_ID_LEN, generate_plan_id, is_valid_plan_id, parse_task_seq, slugify, task_id};
pub use plan::{Plan, PlanDefinition, PlanStatus, Task, TaskDefinition, TaskStatus};
pub use session::{Phase, Session, SessionStatus, is_valid_session_name, session_file_name};
