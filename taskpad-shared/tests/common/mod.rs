#![allow(dead_code)]

/// Common test utilities for integration tests
///
/// Every context runs against a fresh [`InMemoryBackend`]. A second client
/// for the same backend (another user on another device) can be created
/// with [`TestContext::other_client`].

use std::sync::{Arc, Mutex};

use taskpad_shared::backend::InMemoryBackend;
use taskpad_shared::models::{SessionEvent, SessionEventKind};
use taskpad_shared::repository::TaskRepository;
use taskpad_shared::session::{SessionManager, Subscription};

pub const PASSWORD: &str = "correct-horse";

/// Test context containing one client wired to a shared backend
pub struct TestContext {
    pub backend: Arc<InMemoryBackend>,
    pub session: Arc<SessionManager>,
    pub tasks: TaskRepository,
}

impl TestContext {
    /// Creates a context on a backend that signs users in at registration
    pub async fn new() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new())).await
    }

    /// Creates a context on a backend that requires email verification
    pub async fn with_email_confirmation() -> Self {
        Self::with_backend(Arc::new(InMemoryBackend::new().with_email_confirmation())).await
    }

    pub async fn with_backend(backend: Arc<InMemoryBackend>) -> Self {
        let session = SessionManager::start(backend.clone()).await;
        let tasks = TaskRepository::new(backend.clone(), session.clone());

        TestContext {
            backend,
            session,
            tasks,
        }
    }

    /// Creates a context already signed in as `email`
    pub async fn signed_in(email: &str) -> anyhow::Result<Self> {
        let ctx = Self::new().await;
        ctx.session.sign_up(email, PASSWORD).await?;
        Ok(ctx)
    }

    /// Another client on the same backend, starting signed out
    pub async fn other_client(&self) -> Self {
        self.backend.forget_session();
        Self::with_backend(self.backend.clone()).await
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

/// Records every session event delivered to a listener
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
    _subscription: Subscription,
}

impl EventLog {
    pub fn attach(session: &SessionManager) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = session.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        EventLog {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<SessionEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

/// Helper to wait for condition with timeout
pub async fn wait_for<F>(condition: F, timeout_ms: u64) -> anyhow::Result<()>
where
    F: Fn() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);

    loop {
        if condition() {
            return Ok(());
        }

        if start.elapsed() > timeout {
            anyhow::bail!("Condition not met within {} ms", timeout_ms);
        }

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
