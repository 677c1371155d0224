//! Relaying of interactive interrupts to running programs.
//!
//! External programs run in their own process groups, so Ctrl-C at the
//! terminal only reaches the shell. The relay turns that into a SIGINT for
//! every process group the current line started, and the shell keeps going.

use crate::session::{ActiveProcesses, Prompt};
use anyhow::{Context, Result};
use log::{debug, warn};
use nix::sys::signal::{self, SigSet, Signal};
use nix::unistd::{self, Pid};
use std::io::{IsTerminal, Write};
use std::thread::{self, JoinHandle};

/// Handle to the background thread forwarding SIGINT.
#[derive(Debug)]
pub struct SignalRelay {
    _thread: JoinHandle<()>,
}

impl SignalRelay {
    /// Blocks SIGINT for the calling thread and starts the relay thread.
    ///
    /// Must be called from the main thread before any other thread is started:
    /// threads inherit the blocked mask, which leaves the relay as the only
    /// receiver. Spawned programs get SIGINT unblocked again before exec.
    pub fn spawn(active: ActiveProcesses, prompt: Prompt) -> Result<Self> {
        let mut interrupts = SigSet::empty();
        interrupts.add(Signal::SIGINT);
        interrupts
            .thread_block()
            .context("can't block SIGINT")?;

        let thread = thread::Builder::new()
            .name("signal-relay".to_string())
            .spawn(move || {
                loop {
                    match interrupts.wait() {
                        Ok(_) => on_interrupt(&active, &prompt),
                        Err(e) => {
                            warn!("signal relay stopped: {e}");
                            return;
                        }
                    }
                }
            })
            .context("can't start signal relay")?;
        Ok(Self { _thread: thread })
    }
}

fn on_interrupt(active: &ActiveProcesses, prompt: &Prompt) {
    let pids = active.drain();
    debug!("interrupt received, forwarding to {} process(es)", pids.len());
    forward_interrupt(&pids);

    let mut stdout = std::io::stdout();
    if stdout.is_terminal() {
        // With programs still unwinding, the main loop prompts once they exit.
        let _ = if pids.is_empty() {
            write!(stdout, "\n{}", prompt.get())
        } else {
            writeln!(stdout)
        };
        let _ = stdout.flush();
    }
}

/// Sends SIGINT to the process group of every pid, or to the pid alone when
/// its group can't be resolved.
pub fn forward_interrupt(pids: &[Pid]) {
    for &pid in pids {
        let result = match unistd::getpgid(Some(pid)) {
            Ok(group) => signal::killpg(group, Signal::SIGINT),
            Err(_) => signal::kill(pid, Signal::SIGINT),
        };
        if let Err(e) = result {
            debug!("can't interrupt {pid}: {e}");
        }
    }
}
