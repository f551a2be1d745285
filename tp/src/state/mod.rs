//! On-disk state: plan lock, plan documents and conversation sessions
//!
//! Everything here is plain files. Writers replace files atomically so
//! concurrent readers never observe a partial document.

mod atomic;
mod lock;
mod plan_store;
mod session_store;

pub use lock::{LOCK_FILE, LockError, LockStatus, PlanLock, force_clear, lock_path, lock_status};
pub use plan_store::{PLAN_FILE, PlanStore, load_plan, read_definition, save_plan};
pub use session_store::{SessionError, SessionStore};
