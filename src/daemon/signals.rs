//! Signal handling and the shutdown state machine
//!
//! # States
//! ```text
//! Running(Supervisor) ──termination signal──▶ ShuttingDown
//!        │   ▲
//!  worker exit reaped
//!        ▼   │
//! Running(Supervisor)
//!
//! Running(Worker) ──shutdown broadcast──▶ ShuttingDown
//! ```
//!
//! OS signals never mutate daemon state directly. They wake the supervisor's
//! event loop, which then runs the transition on its own task.
//!
//! SIGILL, SIGFPE and SIGSEGV cannot be caught by a tokio signal stream; they
//! keep their default disposition and terminate the process (with a core
//! dump where enabled). The lock they leave behind is recovered as stale.

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::common::{Error, Result};

/// Which unwind path a process or task takes on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// Owner of the listener, the lock and the worker count
    Supervisor,
    /// Handler of exactly one accepted connection
    Worker,
}

/// Termination-class signals routed to the shutdown machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Quit,
    Terminate,
    IllegalInstruction,
    ArithmeticFault,
}

impl ShutdownSignal {
    /// Map a raw signal number onto a shutdown signal
    ///
    /// Anything outside the termination class is a programming error.
    pub fn from_raw(signum: i32) -> Result<Self> {
        match signum {
            libc::SIGINT => Ok(Self::Interrupt),
            libc::SIGQUIT => Ok(Self::Quit),
            libc::SIGTERM => Ok(Self::Terminate),
            libc::SIGILL => Ok(Self::IllegalInstruction),
            libc::SIGFPE => Ok(Self::ArithmeticFault),
            _ => Err(Error::invariant(format!(
                "invalid signum {} passed to shutdown",
                signum
            ))),
        }
    }

    /// The raw signal number
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Terminate => libc::SIGTERM,
            Self::IllegalInstruction => libc::SIGILL,
            Self::ArithmeticFault => libc::SIGFPE,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Terminate => "SIGTERM",
            Self::IllegalInstruction => "SIGILL",
            Self::ArithmeticFault => "SIGFPE",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a supervisor or worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running(ProcessRole),
    ShuttingDown,
}

/// Shutdown state machine for one role
///
/// `ShuttingDown` is terminal.
#[derive(Debug)]
pub struct ShutdownMachine {
    role: ProcessRole,
    state: LifecycleState,
}

impl ShutdownMachine {
    pub fn new(role: ProcessRole) -> Self {
        Self {
            role,
            state: LifecycleState::Running(role),
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, LifecycleState::Running(_))
    }

    /// Check that a worker exit notification may be handled now
    ///
    /// Only a running supervisor reaps workers; the state is unchanged.
    pub fn on_worker_exit(&self) -> Result<()> {
        match self.state {
            LifecycleState::Running(ProcessRole::Supervisor) => Ok(()),
            LifecycleState::Running(ProcessRole::Worker) => Err(Error::invariant(
                "worker exit notification delivered to a worker",
            )),
            // Reaping continues while draining workers during shutdown
            LifecycleState::ShuttingDown => Ok(()),
        }
    }

    /// Enter `ShuttingDown` in response to a termination signal
    ///
    /// Returns the unwind path to take, or `None` when shutdown is already
    /// under way and the signal is masked.
    pub fn begin_shutdown(&mut self, signal: ShutdownSignal) -> Option<ProcessRole> {
        match self.state {
            LifecycleState::Running(role) => {
                self.state = LifecycleState::ShuttingDown;
                match role {
                    ProcessRole::Supervisor => {
                        tracing::info!(%signal, "Supervisor received shutdown signal")
                    }
                    ProcessRole::Worker => {
                        tracing::info!(%signal, "Worker received shutdown signal")
                    }
                }
                Some(role)
            }
            LifecycleState::ShuttingDown => {
                tracing::debug!(%signal, "Already shutting down, signal ignored");
                None
            }
        }
    }

    /// Exit status of an orderly unwind of this role
    ///
    /// A worker stopped from outside did not finish its conversation, so it
    /// reports failure even though its own shutdown succeeded.
    pub fn exit_code(&self) -> i32 {
        match self.role {
            ProcessRole::Supervisor => 0,
            ProcessRole::Worker => 1,
        }
    }
}

/// Async receiver for the termination signals that can be caught
pub struct SignalListener {
    interrupt: Signal,
    quit: Signal,
    terminate: Signal,
}

impl SignalListener {
    /// Register handlers for SIGINT, SIGQUIT and SIGTERM
    pub fn new() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next termination signal
    pub async fn recv(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownSignal::Interrupt,
            _ = self.quit.recv() => ShutdownSignal::Quit,
            _ = self.terminate.recv() => ShutdownSignal::Terminate,
        }
    }
}

/// Send `signal` to process `pid`
pub fn send_signal(pid: i32, signal: ShutdownSignal) -> Result<()> {
    if unsafe { libc::kill(pid, signal.as_raw()) } < 0 {
        return Err(Error::Signal {
            pid,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}
