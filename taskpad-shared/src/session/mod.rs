/// Authentication session tracking
///
/// [`SessionManager`] holds the single source of truth for "who is signed
/// in" and notifies [`Subscription`] holders after every transition.

pub mod manager;
pub mod subscription;

pub use manager::SessionManager;
pub use subscription::{Listener, Subscription};
