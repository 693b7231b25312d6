/// Data models for Taskpad
///
/// # Models
///
/// - `task`: To-do items and their create/patch payloads
/// - `user`: Provider-issued identities and bearer sessions
/// - `session`: Session snapshot, status machine and listener events

pub mod session;
pub mod task;
pub mod user;

pub use session::{Session, SessionEvent, SessionEventKind, SessionStatus};
pub use task::{NewTask, Task, TaskInsert, TaskPatch};
pub use user::{AuthSession, User};
