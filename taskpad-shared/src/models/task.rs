/// Task model and its write payloads
///
/// A task is a single to-do item owned by exactly one user. Rows live in the
/// hosted `tasks` collection; row-level security on the backend restricts
/// every read and write to the owner.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES auth.users(id) ON DELETE CASCADE,
///     title VARCHAR(100) NOT NULL,
///     description VARCHAR(500),
///     is_complete BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```
/// use taskpad_shared::models::task::{NewTask, TaskPatch};
///
/// let new_task = NewTask::new("Buy milk").with_description("2 litres");
/// assert!(new_task.normalized().is_ok());
///
/// let patch = TaskPatch::default().complete(true);
/// assert!(!patch.is_empty());
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::ValidationErrorDetail;

/// Maximum title length, in characters
pub const MAX_TITLE_LEN: usize = 100;

/// Maximum description length, in characters
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Task record as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID, assigned by the backend
    pub id: Uuid,

    /// User who created the task
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,

    /// Short title (1-100 characters)
    pub title: String,

    /// Optional longer description (up to 500 characters)
    pub description: Option<String>,

    /// Whether the task has been completed
    #[serde(default)]
    pub is_complete: bool,

    /// When the task was inserted
    pub created_at: DateTime<Utc>,
}

/// Input for creating a task
///
/// Carries no owner field. The repository stamps the owner from the
/// active session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NewTask {
    /// Task title
    #[validate(custom(function = "validate_title"))]
    pub title: String,

    /// Optional description
    #[validate(custom(function = "validate_description"))]
    pub description: Option<String>,

    /// Initial completion flag
    #[serde(default)]
    pub is_complete: bool,
}

impl NewTask {
    /// Creates an incomplete task input with the given title
    pub fn new(title: impl Into<String>) -> Self {
        NewTask {
            title: title.into(),
            description: None,
            is_complete: false,
        }
    }

    /// Sets the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Trims text fields and validates the result
    ///
    /// A description that is blank after trimming becomes `None`.
    pub fn normalized(&self) -> Result<NewTask, Vec<ValidationErrorDetail>> {
        let normalized = NewTask {
            title: self.title.trim().to_string(),
            description: normalize_description(self.description.as_deref()),
            is_complete: self.is_complete,
        };

        normalized.validate().map_err(|e| field_errors(&e))?;
        Ok(normalized)
    }
}

/// Insert payload sent to the task store
///
/// Only the repository builds this, after resolving the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInsert {
    /// Owner stamped from the active session
    #[serde(rename = "user_id")]
    pub owner_id: Uuid,

    pub title: String,

    pub description: Option<String>,

    pub is_complete: bool,
}

impl TaskInsert {
    /// Binds a validated input to its owner
    pub fn new(owner_id: Uuid, task: NewTask) -> Self {
        TaskInsert {
            owner_id,
            title: task.title,
            description: task.description,
            is_complete: task.is_complete,
        }
    }
}

/// Partial update for a task
///
/// All fields are optional. Only `Some` fields are sent to the backend.
/// Present fields are checked with the same rules as [`NewTask`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TaskPatch {
    /// New title
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_title"))]
    pub title: Option<String>,

    /// New description (use Some(None) to clear)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    #[validate(custom(function = "validate_description"))]
    pub description: Option<Option<String>>,

    /// New completion flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
}

impl TaskPatch {
    /// Sets the title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets or clears the description
    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    /// Sets the completion flag
    pub fn complete(mut self, is_complete: bool) -> Self {
        self.is_complete = Some(is_complete);
        self
    }

    /// Returns true if no field is present
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.is_complete.is_none()
    }

    /// Trims present text fields and validates them
    pub fn normalized(&self) -> Result<TaskPatch, Vec<ValidationErrorDetail>> {
        if self.is_empty() {
            return Err(vec![ValidationErrorDetail::new(
                "patch",
                "Nothing to update",
            )]);
        }

        let normalized = TaskPatch {
            title: self.title.as_deref().map(|t| t.trim().to_string()),
            description: self
                .description
                .as_ref()
                .map(|d| normalize_description(d.as_deref())),
            is_complete: self.is_complete,
        };

        normalized.validate().map_err(|e| field_errors(&e))?;
        Ok(normalized)
    }

    /// Applies the patch to an existing record
    ///
    /// Used by stores that hold rows locally; `id`, `owner_id` and
    /// `created_at` are never touched.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(is_complete) = self.is_complete {
            task.is_complete = is_complete;
        }
    }
}

fn check_title(title: &str) -> Result<(), ValidationErrorDetail> {
    if title.is_empty() {
        return Err(ValidationErrorDetail::new("title", "Task title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationErrorDetail::new(
            "title",
            format!("Task title must be at most {} characters", MAX_TITLE_LEN),
        ));
    }
    Ok(())
}

fn check_description(description: &str) -> Result<(), ValidationErrorDetail> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationErrorDetail::new(
            "description",
            format!("Description must be at most {} characters", MAX_DESCRIPTION_LEN),
        ));
    }
    Ok(())
}

fn to_validation_error(detail: ValidationErrorDetail) -> ValidationError {
    let mut error = ValidationError::new("invalid");
    error.message = Some(Cow::Owned(detail.message));
    error
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    check_title(title).map_err(to_validation_error)
}

fn validate_description(description: &str) -> Result<(), ValidationError> {
    check_description(description).map_err(to_validation_error)
}

fn normalize_description(description: Option<&str>) -> Option<String> {
    description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
}

/// Flattens validator errors into field/message pairs, sorted by field
fn field_errors(errors: &ValidationErrors) -> Vec<ValidationErrorDetail> {
    let mut details: Vec<ValidationErrorDetail> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| {
                ValidationErrorDetail::new(
                    field.to_string(),
                    error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                )
            })
        })
        .collect();
    details.sort_by(|a, b| a.field.cmp(&b.field));
    details
}

// A present JSON `null` must become Some(None), not None.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}
