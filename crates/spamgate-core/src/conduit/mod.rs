//! Bidirectional pipe to the classifier subprocess.
//!
//! One conduit owns one child process and both of its pipes for the
//! lifetime of one message:
//!
//! ```text
//! Unconnected ─ connect() ─→ Running ─ half_close() ─→ OutputHalfClosed
//!                                                          │
//!                   Terminated ←─ finish() ←─ Drained ←─ drain()
//!
//! any I/O failure ─→ Failed (child killed and reaped)
//! ```
//!
//! Writing never blocks on a full pipe while the classifier is itself
//! blocked writing to us: every write waits for readiness on both pipes and
//! drains whatever output is available before pushing more input.
//!
//! Dropping the conduit closes any open descriptor and kills and reaps a
//! child that is still running, whatever state it was left in.

mod argv;
pub mod readiness;

pub use argv::classifier_argv;

use std::io::{self, PipeReader, Read, Write};
use std::os::fd::{AsFd, AsRawFd, IntoRawFd, OwnedFd};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::PollTimeout;

use crate::error::{Error, Result};

/// Size of one read from the classifier.
const READ_CHUNK: usize = 8192;

/// Lifecycle state of a [`ClassifierConduit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConduitState {
    /// No process yet.
    #[default]
    Unconnected,
    /// Process running, both pipes open.
    Running,
    /// Input closed; the classifier has seen end-of-input.
    OutputHalfClosed,
    /// All classifier output collected.
    Drained,
    /// Process reaped or forcibly torn down.
    Terminated,
    /// An I/O fault killed the process.
    Failed,
}

/// Owner of one classifier process and its two pipes.
#[derive(Debug)]
pub struct ClassifierConduit {
    state: ConduitState,
    child: Option<Child>,
    to_child: Option<ChildStdin>,
    from_child: Option<PipeReader>,
    output: Vec<u8>,
    slice_ms: u16,
}

impl Default for ClassifierConduit {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassifierConduit {
    /// Creates an unconnected conduit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConduitState::Unconnected,
            child: None,
            to_child: None,
            from_child: None,
            output: Vec::new(),
            slice_ms: readiness::WAIT_SLICE_MS,
        }
    }

    /// Overrides the readiness wait slice.
    #[must_use]
    pub const fn with_wait_slice(mut self, millis: u16) -> Self {
        self.slice_ms = millis;
        self
    }

    /// Spawns the classifier.
    ///
    /// The child's stdin is the gateway→child pipe; its stdout and stderr
    /// both feed the child→gateway pipe. Every other descriptor is
    /// close-on-exec, so the child inherits nothing else.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IpcSetup`] if the pipe or the process cannot be
    /// created; the conduit then stays unconnected.
    pub fn connect(&mut self, argv: &[String]) -> Result<()> {
        self.ensure_state(ConduitState::Unconnected, "connect")?;

        let (program, args) = argv.split_first().ok_or_else(|| {
            Error::ipc_setup(
                "argv",
                io::Error::new(io::ErrorKind::InvalidInput, "empty classifier command"),
            )
        })?;

        let (from_child, child_out) = io::pipe().map_err(|e| Error::ipc_setup("pipe", e))?;
        let child_err = child_out
            .try_clone()
            .map_err(|e| Error::ipc_setup("pipe", e))?;

        // The Command (and with it our copies of the write ends) is dropped
        // at the end of this statement.
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(child_out)
            .stderr(child_err)
            .spawn()
            .map_err(|e| Error::ipc_setup("spawn", e))?;

        let pid = child.id();
        let to_child = child.stdin.take();
        self.child = Some(child);
        self.from_child = Some(from_child);
        self.to_child = to_child;

        let nonblocking = match &self.to_child {
            Some(pipe) => set_nonblocking(pipe),
            None => Err(io::Error::other("child stdin was not captured")),
        };
        if let Err(e) = nonblocking {
            self.cleanup();
            self.state = ConduitState::Unconnected;
            return Err(Error::ipc_setup("fcntl", e));
        }

        self.state = ConduitState::Running;
        tracing::debug!(pid, program = %program, args = args.len(), "classifier started");
        Ok(())
    }

    /// Streams `bytes` to the classifier, draining its output as it goes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a wait, read or write fails; the child has
    /// been killed and reaped by the time the error is returned.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_state(ConduitState::Running, "write")?;
        tracing::trace!(len = bytes.len(), "output to classifier");

        let mut written = 0;
        while written < bytes.len() {
            let waited = readiness::wait(
                self.to_child.as_ref().map(AsFd::as_fd),
                self.from_child.as_ref().map(AsFd::as_fd),
                PollTimeout::from(self.slice_ms),
            );
            let ready = match waited {
                Ok(ready) => ready,
                Err(e) => return Err(self.fail("poll", e)),
            };

            if ready.readable {
                self.read_available()?;
            }

            if ready.writable {
                let Some(pipe) = self.to_child.as_mut() else {
                    return Err(Error::InvalidState("input pipe already closed".into()));
                };
                match pipe.write(&bytes[written..]) {
                    Ok(n) => {
                        written += n;
                        tracing::trace!(n, "wrote bytes");
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => return Err(self.fail("write", e)),
                }
            }
        }
        Ok(())
    }

    /// Closes the gateway→child pipe, signalling end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the conduit is not running or the close fails.
    pub fn half_close(&mut self) -> Result<()> {
        self.ensure_state(ConduitState::Running, "close output")?;
        if let Some(pipe) = self.to_child.take()
            && let Err(e) = close_fd(pipe)
        {
            return Err(self.fail("close", e));
        }
        self.state = ConduitState::OutputHalfClosed;
        Ok(())
    }

    /// Reads classifier output until end-of-stream, then closes the pipe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if a read fails; the child has been killed and
    /// reaped by the time the error is returned.
    pub fn drain(&mut self) -> Result<()> {
        self.ensure_state(ConduitState::OutputHalfClosed, "drain")?;
        while self.from_child.is_some() {
            self.read_available()?;
        }
        self.state = ConduitState::Drained;
        tracing::debug!(len = self.output.len(), "classifier output drained");
        Ok(())
    }

    /// Waits for the classifier to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Wait`] if the child cannot be reaped. The conduit is
    /// torn down either way.
    pub fn finish(&mut self) -> Result<ExitStatus> {
        self.ensure_state(ConduitState::Drained, "finish")?;
        self.state = ConduitState::Terminated;
        let Some(mut child) = self.child.take() else {
            return Err(Error::InvalidState("no classifier process".into()));
        };
        let status = child.wait().map_err(Error::Wait)?;
        tracing::debug!(pid = child.id(), %status, "classifier exited");
        Ok(status)
    }

    /// Releases every resource still held. Safe to call repeatedly.
    ///
    /// Open pipes are closed; a child that has not been reaped is sent
    /// `SIGKILL` and waited for.
    pub fn cleanup(&mut self) {
        self.to_child = None;
        self.from_child = None;

        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            if let Err(e) = child.kill() {
                tracing::debug!(pid, error = %e, "kill failed");
            }
            match child.wait() {
                Ok(status) => tracing::debug!(pid, %status, "classifier reaped"),
                Err(e) => tracing::warn!(pid, error = %e, "could not reap classifier"),
            }
        }

        if !matches!(
            self.state,
            ConduitState::Unconnected | ConduitState::Failed
        ) {
            self.state = ConduitState::Terminated;
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConduitState {
        self.state
    }

    /// Returns true while a child process is owned and not yet reaped.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Returns true if an I/O fault tore the conduit down.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == ConduitState::Failed
    }

    /// Returns the classifier's process id while it is owned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Returns the number of pipe descriptors still open.
    #[must_use]
    pub fn open_descriptors(&self) -> usize {
        usize::from(self.to_child.is_some()) + usize::from(self.from_child.is_some())
    }

    /// Returns the classifier output collected so far.
    #[must_use]
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Performs one read from the classifier and appends it to the output.
    ///
    /// Returns 0 once end-of-stream has been seen and the pipe closed.
    fn read_available(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        let result = loop {
            let Some(pipe) = self.from_child.as_mut() else {
                return Ok(0);
            };
            match pipe.read(&mut chunk) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                if let Some(pipe) = self.from_child.take()
                    && let Err(e) = close_fd(pipe)
                {
                    return Err(self.fail("close", e));
                }
                tracing::trace!("classifier closed its output");
                Ok(0)
            }
            Ok(n) => {
                self.output.extend_from_slice(&chunk[..n]);
                tracing::trace!(n, "read bytes");
                Ok(n)
            }
            Err(e) => Err(self.fail("read", e)),
        }
    }

    /// Marks the conduit failed, tears it down and builds the fault.
    fn fail(&mut self, op: &'static str, source: io::Error) -> Error {
        tracing::debug!(op, error = %source, pid = ?self.pid(), "killing classifier");
        self.state = ConduitState::Failed;
        self.cleanup();
        Error::io(op, source)
    }

    fn ensure_state(&self, expected: ConduitState, op: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {op} while {:?}",
                self.state
            )))
        }
    }
}

impl Drop for ClassifierConduit {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn set_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let flags = OFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFL)?);
    fcntl(raw, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Closes a pipe end, surfacing the OS error that dropping would swallow.
fn close_fd(fd: impl Into<OwnedFd>) -> io::Result<()> {
    nix::unistd::close(fd.into().into_raw_fd()).map_err(io::Error::from)
}
