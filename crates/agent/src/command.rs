//! Command executor and its undo history.
//!
//! The executor runs [`Command`]s, contains their failures and panics, and
//! pushes every successful one onto a size-bounded [`CommandHistory`]. The
//! bound follows `commands.max_history` and is re-read on
//! `UI_EVENT.SETTINGS_CHANGED`.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::FutureExt;
use tracing::{debug, error, info, warn};
use traymind_config::ConfigStore;
use traymind_core::command::Command;
use traymind_core::error::CommandError;
use traymind_core::event::{EventDispatcher, Listener, topics};

/// Executed commands, oldest first.
pub struct CommandHistory {
    entries: VecDeque<Box<dyn Command>>,
    max_size: usize,
}

impl CommandHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Record a command, dropping the oldest once the bound is exceeded.
    pub fn push(&mut self, command: Box<dyn Command>) {
        self.entries.push_back(command);
        self.trim();
        debug!(size = self.entries.len(), "Command pushed to history");
    }

    pub fn pop(&mut self) -> Option<Box<dyn Command>> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size.max(1);
        self.trim();
    }

    /// Command names, oldest first.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.name().to_string()).collect()
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
    }
}

pub struct CommandExecutor {
    history: Mutex<CommandHistory>,
    config: Arc<ConfigStore>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CommandExecutor {
    /// Build the executor and subscribe it to settings changes.
    pub fn new(events: &EventDispatcher, config: Arc<ConfigStore>) -> Arc<Self> {
        let max_history = config.get().commands.max_history;
        let executor = Arc::new(Self {
            history: Mutex::new(CommandHistory::new(max_history)),
            config,
        });
        info!(max_history, "Command executor initialized");

        let weak: Weak<Self> = Arc::downgrade(&executor);
        events.subscribe(
            topics::SETTINGS_CHANGED,
            Listener::sync(move |_| {
                if let Some(executor) = weak.upgrade() {
                    executor.reload_settings();
                }
                Ok(())
            }),
        );
        executor
    }

    pub fn reload_settings(&self) {
        let max_history = self.config.get().commands.max_history;
        lock(&self.history).set_max_size(max_history);
        debug!(max_history, "Command history bound reloaded");
    }

    /// Run `command`. Only successful commands enter the history.
    pub async fn execute(&self, mut command: Box<dyn Command>) -> Result<String, CommandError> {
        let name = command.name().to_string();
        info!(command = %name, "Executing command");

        let outcome = AssertUnwindSafe(command.execute()).catch_unwind().await;
        match outcome {
            Ok(Ok(output)) => {
                info!(command = %name, "Command succeeded");
                lock(&self.history).push(command);
                Ok(output)
            }
            Ok(Err(e)) => {
                error!(command = %name, error = %e, "Command failed");
                Err(e)
            }
            Err(_) => {
                error!(command = %name, "Command panicked");
                Err(CommandError::Panicked(name))
            }
        }
    }

    /// Undo the most recent command.
    ///
    /// Returns `Ok(false)` when there is nothing to undo. A command whose
    /// undo fails is not put back.
    pub async fn undo(&self) -> Result<bool, CommandError> {
        let Some(mut command) = lock(&self.history).pop() else {
            info!("No commands in history to undo");
            return Ok(false);
        };
        let name = command.name().to_string();

        match AssertUnwindSafe(command.undo()).catch_unwind().await {
            Ok(Ok(())) => {
                info!(command = %name, "Command undone");
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!(command = %name, error = %e, "Failed to undo command");
                Err(e)
            }
            Err(_) => {
                warn!(command = %name, "Command panicked during undo");
                Err(CommandError::Panicked(name))
            }
        }
    }

    pub fn history_len(&self) -> usize {
        lock(&self.history).len()
    }

    pub fn history_names(&self) -> Vec<String> {
        lock(&self.history).names()
    }
}
