//! Interactive shell
//!
//! Reads one command per line, runs it through the [`Executor`] and prints
//! the reply or the error's message. Session transitions that happen while
//! no command is running are announced, e.g. an email verified in a browser
//! or a session revoked elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use taskpad_shared::models::{SessionEvent, SessionEventKind};
use taskpad_shared::session::Subscription;

use crate::commands::{describe_session, Executor, Reply, ShellCommand};

pub struct Shell {
    executor: Executor,
}

impl Shell {
    pub fn new(executor: Executor) -> Self {
        Shell { executor }
    }

    /// Run the shell main loop
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let announcer = Announcer::default();
        let printer = announcer.clone();
        let _announcements: Subscription = self.executor.session().subscribe(move |event| {
            if let Some(message) = printer.message(event) {
                println!("{}", message.dimmed());
            }
        });
        self.print_welcome();

        let mut rl = DefaultEditor::new()
            .map_err(|e| anyhow::anyhow!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", "taskpad>".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }

                    // Passwords stay out of history
                    if !input.starts_with("signin") && !input.starts_with("signup") {
                        let _ = rl.add_history_entry(input);
                    }

                    let command = match ShellCommand::parse_line(input) {
                        Ok(command) => command,
                        Err(err) => {
                            // Help output and usage errors are rendered by clap
                            let _ = err.print();
                            continue;
                        }
                    };

                    announcer.set_busy(true);
                    let result = self.executor.execute(command).await;
                    announcer.set_busy(false);

                    match result {
                        Ok(Reply::Text(text)) => println!("{}", text),
                        Ok(Reply::Quit) => break,
                        Err(err) => println!("{} {}", "error:".red().bold(), err),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(anyhow::anyhow!("Readline error: {}", err));
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "Taskpad".bright_cyan().bold());
        println!("{}", describe_session(&self.executor.session().current_session()));
        println!("Type {} for commands, {} to leave", "help".yellow(), "quit".yellow());
        println!();
    }
}

/// Announces session changes the user did not just type a command for
///
/// The command's own reply already reports its outcome, so events are
/// muted while a command runs.
#[derive(Clone, Default)]
struct Announcer {
    busy: Arc<AtomicBool>,
}

impl Announcer {
    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn message(&self, event: &SessionEvent) -> Option<String> {
        if self.busy.load(Ordering::SeqCst) {
            return None;
        }

        match event.kind {
            SessionEventKind::SignedIn | SessionEventKind::SignedOut => {
                Some(format!("[{}]", describe_session(&event.session)))
            }
            SessionEventKind::TokenRefreshed => {
                tracing::debug!("Access token refreshed");
                None
            }
            SessionEventKind::Loading
            | SessionEventKind::InitialSession
            | SessionEventKind::UserUpdated => None,
        }
    }
}
