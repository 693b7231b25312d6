/// Task repository
///
/// CRUD over the signed-in user's tasks. Every call is exactly one round
/// trip to the task store; nothing is cached. Input is validated locally
/// before any request is made, and the owner of a new task is always taken
/// from the active session, never from the caller.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use taskpad_shared::backend::InMemoryBackend;
/// use taskpad_shared::models::NewTask;
/// use taskpad_shared::repository::TaskRepository;
/// use taskpad_shared::session::SessionManager;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = Arc::new(InMemoryBackend::new());
/// let session = SessionManager::start(backend.clone()).await;
/// session.sign_up("ada@example.com", "hunter22").await?;
///
/// let tasks = TaskRepository::new(backend, session);
/// let task = tasks.create(NewTask::new("Buy milk")).await?;
/// tasks.set_complete(task.id, true).await?;
/// # Ok(())
/// # }
/// ```

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::TaskStore;
use crate::error::{AuthError, RepoError, RepoResult};
use crate::models::{NewTask, Task, TaskInsert, TaskPatch};
use crate::session::SessionManager;

/// Task operations scoped to the current session
#[derive(Clone)]
pub struct TaskRepository {
    store: Arc<dyn TaskStore>,
    session: Arc<SessionManager>,
}

impl TaskRepository {
    pub fn new(store: Arc<dyn TaskStore>, session: Arc<SessionManager>) -> Self {
        TaskRepository { store, session }
    }

    /// Bearer credential and owner ID of the signed-in user
    ///
    /// A credential close to expiry is refreshed first.
    async fn credentials(&self) -> RepoResult<(String, Uuid)> {
        let token = self.session.valid_access_token().await?;
        let owner_id = self
            .session
            .current_user()
            .map(|u| u.id)
            .ok_or(AuthError::NoActiveSession)?;
        Ok((token, owner_id))
    }

    /// Lists the current user's tasks, newest first
    pub async fn list(&self) -> RepoResult<Vec<Task>> {
        let (token, owner_id) = self.credentials().await?;

        let mut tasks = self.store.select_tasks(&token).await.map_err(|e| {
            warn!(error = %e, "Failed to list tasks");
            RepoError::from(e)
        })?;

        // Stable sort keeps the store's order for equal timestamps
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        debug!(user_id = %owner_id, count = tasks.len(), "Listed tasks");
        Ok(tasks)
    }

    /// Creates a task owned by the current user
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty or over-long title or description (no
    ///   request is made)
    /// - `Auth` when nobody is signed in or the session expired
    pub async fn create(&self, task: NewTask) -> RepoResult<Task> {
        let task = task.normalized().map_err(RepoError::Validation)?;
        let (token, owner_id) = self.credentials().await?;

        let insert = TaskInsert::new(owner_id, task);
        let created = self.store.insert_task(&token, &insert).await.map_err(|e| {
            warn!(error = %e, "Failed to create task");
            RepoError::from(e)
        })?;

        info!(task_id = %created.id, user_id = %owner_id, "Task created");
        Ok(created)
    }

    /// Applies a partial update to an owned task
    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> RepoResult<Task> {
        let patch = patch.normalized().map_err(RepoError::Validation)?;
        let (token, _) = self.credentials().await?;

        let updated = self
            .store
            .update_task(&token, id, &patch)
            .await
            .map_err(|e| {
                warn!(task_id = %id, error = %e, "Failed to update task");
                with_task_id(RepoError::from(e), id)
            })?
            .ok_or(RepoError::NotFound(Some(id)))?;

        info!(task_id = %id, "Task updated");
        Ok(updated)
    }

    /// Marks an owned task complete or incomplete
    pub async fn set_complete(&self, id: Uuid, is_complete: bool) -> RepoResult<Task> {
        self.update(id, TaskPatch::default().complete(is_complete)).await
    }

    /// Deletes an owned task
    pub async fn delete(&self, id: Uuid) -> RepoResult<()> {
        let (token, _) = self.credentials().await?;

        let deleted = self.store.delete_task(&token, id).await.map_err(|e| {
            warn!(task_id = %id, error = %e, "Failed to delete task");
            with_task_id(RepoError::from(e), id)
        })?;

        if !deleted {
            return Err(RepoError::NotFound(Some(id)));
        }

        info!(task_id = %id, "Task deleted");
        Ok(())
    }
}

fn with_task_id(err: RepoError, id: Uuid) -> RepoError {
    match err {
        RepoError::NotFound(None) => RepoError::NotFound(Some(id)),
        other => other,
    }
}
