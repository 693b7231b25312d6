//! Shell commands and their execution
//!
//! Each input line is split into words with shell quoting rules and parsed
//! with clap, so every command gets `--help` and argument errors for free.
//! Quote a value to keep its spacing (`signin a@b.c "pass phrase"`);
//! unquoted multi-word titles and descriptions are joined with single
//! spaces.
//!
//! Tasks are referenced either by their position in the last `list` output
//! (1-based) or by full ID.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use colored::Colorize;
use taskpad_shared::backend::{AuthBackend, InMemoryBackend, RestBackend, TaskStore};
use taskpad_shared::models::{NewTask, Session, SessionStatus, Task, TaskPatch};
use taskpad_shared::repository::TaskRepository;
use taskpad_shared::session::SessionManager;
use uuid::Uuid;

/// One line of shell input
#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

/// Shell commands
#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum ShellCommand {
    /// Register a new account
    Signup { email: String, password: String },

    /// Sign in with email and password
    Signin { email: String, password: String },

    /// Sign out
    Signout,

    /// Show the signed-in user
    Whoami,

    /// Complete email verification
    ///
    /// Online: paste the redirect URL from the verification email.
    /// Offline: pass the email address to mark as verified.
    Verify { link: String },

    /// Exchange the refresh token for a new session
    Refresh,

    /// List your tasks, newest first
    #[command(alias = "ls")]
    List,

    /// Add a task
    Add {
        /// Task title
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,

        /// Optional description
        #[arg(short, long, num_args = 1..)]
        description: Option<Vec<String>>,
    },

    /// Change a task's title or description
    Edit {
        /// List position or task ID
        task: String,

        /// New title
        #[arg(short, long, num_args = 1..)]
        title: Option<Vec<String>>,

        /// New description
        #[arg(short, long, num_args = 1.., conflicts_with = "clear_description")]
        description: Option<Vec<String>>,

        /// Remove the description
        #[arg(long)]
        clear_description: bool,
    },

    /// Mark a task complete
    Done { task: String },

    /// Mark a task incomplete
    Undo { task: String },

    /// Delete a task
    #[command(alias = "delete")]
    Rm { task: String },

    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

impl ShellCommand {
    /// Parses one input line
    ///
    /// On failure the error carries clap's rendered message (usage or help
    /// text).
    pub fn parse_line(line: &str) -> Result<ShellCommand, clap::Error> {
        let words = shell_words::split(line).map_err(|e| {
            clap::Error::raw(ErrorKind::InvalidValue, format!("Cannot parse input: {}\n", e))
        })?;
        ShellLine::try_parse_from(words).map(|parsed| parsed.command)
    }
}

/// What the shell should do after a command
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Print the text and keep going
    Text(String),

    /// Leave the shell
    Quit,
}

/// Backend the shell is connected to
#[derive(Clone)]
pub enum Connection {
    /// Hosted service
    Online(Arc<RestBackend>),

    /// In-process backend, nothing leaves the machine
    Offline(Arc<InMemoryBackend>),
}

impl Connection {
    pub fn auth(&self) -> Arc<dyn AuthBackend> {
        match self {
            Connection::Online(backend) => backend.clone(),
            Connection::Offline(backend) => backend.clone(),
        }
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        match self {
            Connection::Online(backend) => backend.clone(),
            Connection::Offline(backend) => backend.clone(),
        }
    }

    /// Completes email verification
    ///
    /// The resulting sign-in reaches the session manager through the
    /// backend's push channel.
    async fn verify(&self, link: &str) -> anyhow::Result<()> {
        match self {
            Connection::Online(backend) => {
                backend.accept_redirect(link).await?;
            }
            Connection::Offline(backend) => {
                backend.confirm_email(link)?;
            }
        }
        Ok(())
    }
}

/// Command executor holding the session and the last task listing
pub struct Executor {
    connection: Connection,
    session: Arc<SessionManager>,
    tasks: TaskRepository,
    listing: Vec<Uuid>,
}

impl Executor {
    pub fn new(connection: Connection, session: Arc<SessionManager>) -> Self {
        let tasks = TaskRepository::new(connection.store(), session.clone());
        Executor {
            connection,
            session,
            tasks,
            listing: Vec::new(),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Runs one command
    ///
    /// Session and repository failures are returned as errors whose
    /// `Display` is the user-facing message.
    pub async fn execute(&mut self, command: ShellCommand) -> anyhow::Result<Reply> {
        let text = match command {
            ShellCommand::Signup { email, password } => {
                let session = self.session.sign_up(&email, &password).await?;
                if session.is_authenticated() {
                    format!("Welcome, {}!", email)
                } else {
                    format!(
                        "Check {} for a verification link, then run `verify`.",
                        email
                    )
                }
            }
            ShellCommand::Signin { email, password } => {
                let session = self.session.sign_in(&email, &password).await?;
                format!("Signed in as {}", display_user(&session))
            }
            ShellCommand::Signout => {
                self.session.sign_out().await?;
                self.listing.clear();
                "Signed out".to_string()
            }
            ShellCommand::Whoami => describe_session(&self.session.current_session()),
            ShellCommand::Verify { link } => {
                self.connection.verify(&link).await?;
                "Verification accepted".to_string()
            }
            ShellCommand::Refresh => {
                self.session.refresh().await?;
                "Session refreshed".to_string()
            }
            ShellCommand::List => {
                let tasks = self.tasks.list().await?;
                self.listing = tasks.iter().map(|t| t.id).collect();
                render_tasks(&tasks)
            }
            ShellCommand::Add { title, description } => {
                let mut new_task = NewTask::new(title.join(" "));
                if let Some(description) = description {
                    new_task = new_task.with_description(description.join(" "));
                }
                let task = self.tasks.create(new_task).await?;
                format!("Added \"{}\"", task.title)
            }
            ShellCommand::Edit {
                task,
                title,
                description,
                clear_description,
            } => {
                let id = self.resolve(&task)?;
                let mut patch = TaskPatch::default();
                if let Some(title) = title {
                    patch = patch.title(title.join(" "));
                }
                if let Some(description) = description {
                    patch = patch.description(Some(description.join(" ")));
                } else if clear_description {
                    patch = patch.description(None);
                }
                let task = self.tasks.update(id, patch).await?;
                format!("Updated \"{}\"", task.title)
            }
            ShellCommand::Done { task } => {
                let id = self.resolve(&task)?;
                let task = self.tasks.set_complete(id, true).await?;
                format!("Completed \"{}\"", task.title)
            }
            ShellCommand::Undo { task } => {
                let id = self.resolve(&task)?;
                let task = self.tasks.set_complete(id, false).await?;
                format!("Reopened \"{}\"", task.title)
            }
            ShellCommand::Rm { task } => {
                let id = self.resolve(&task)?;
                self.tasks.delete(id).await?;
                self.listing.retain(|listed| *listed != id);
                "Task deleted".to_string()
            }
            ShellCommand::Quit => return Ok(Reply::Quit),
        };

        Ok(Reply::Text(text))
    }

    /// Resolves a list position or task ID
    fn resolve(&self, reference: &str) -> anyhow::Result<Uuid> {
        if let Ok(position) = reference.parse::<usize>() {
            if position == 0 || position > self.listing.len() {
                bail!("No task #{} in the last listing; run `list` first", position);
            }
            return Ok(self.listing[position - 1]);
        }

        Uuid::parse_str(reference)
            .with_context(|| format!("Not a task number or ID: {}", reference))
    }
}

fn display_user(session: &Session) -> String {
    session
        .user
        .as_ref()
        .map(|u| u.email.clone())
        .unwrap_or_else(|| "unknown user".to_string())
}

/// One-line summary of the session state
pub fn describe_session(session: &Session) -> String {
    match session.status {
        SessionStatus::Authenticated => format!("Signed in as {}", display_user(session)),
        SessionStatus::Loading => "Checking session...".to_string(),
        SessionStatus::Unauthenticated => "Not signed in".to_string(),
    }
}

/// Renders a task listing, numbered from 1
pub fn render_tasks(tasks: &[Task]) -> String {
    if tasks.is_empty() {
        return "No tasks yet. Add one with `add <title>`.".dimmed().to_string();
    }

    tasks
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let mark = if task.is_complete { "[x]".green() } else { "[ ]".normal() };
            let title = if task.is_complete {
                task.title.strikethrough().dimmed()
            } else {
                task.title.normal()
            };
            let created = task.created_at.format("%Y-%m-%d %H:%M");

            let mut line = format!("{:>3}. {} {}  {}", i + 1, mark, title, created.to_string().dimmed());
            if let Some(description) = &task.description {
                line.push_str(&format!("\n       {}", description.dimmed()));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
