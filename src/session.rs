//! State that lives for one interactive session.

use crate::command::ExitCode;
use nix::unistd::Pid;
use std::sync::{Arc, Mutex, MutexGuard};

/// Process ids of the external programs started by the line being executed.
///
/// Shared between the interpreter, which adds a pid whenever it spawns a
/// program and clears the set after every line, and the signal relay, which
/// drains it when an interrupt arrives.
#[derive(Debug, Clone, Default)]
pub struct ActiveProcesses(Arc<Mutex<Vec<Pid>>>);

impl ActiveProcesses {
    pub fn register(&self, pid: u32) {
        // Pids always fit in pid_t.
        self.lock().push(Pid::from_raw(pid as i32));
    }

    /// Forgets a pid once its process has been reaped.
    pub fn unregister(&self, pid: u32) {
        let pid = Pid::from_raw(pid as i32);
        self.lock().retain(|&p| p != pid);
    }

    /// Removes and returns every registered pid.
    pub fn drain(&self) -> Vec<Pid> {
        std::mem::take(&mut *self.lock())
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Pid>> {
        // The set holds plain pids, so a poisoned lock still guards valid data.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Prompt text shared with the signal relay so it can redraw the prompt.
#[derive(Debug, Clone, Default)]
pub struct Prompt(Arc<Mutex<String>>);

impl Prompt {
    pub fn set(&self, text: String) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = text;
    }

    pub fn get(&self) -> String {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Interpreter state for one session.
#[derive(Debug)]
pub struct Session {
    /// Cleared by `exit`; end of input also ends the session.
    pub running: bool,
    pub active: ActiveProcesses,
    pub last_exit_code: ExitCode,
    pub prompt: Prompt,
}

impl Session {
    pub fn new() -> Self {
        Self {
            running: true,
            active: ActiveProcesses::default(),
            last_exit_code: 0,
            prompt: Prompt::default(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
