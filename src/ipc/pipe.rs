//! Framed duplex pipe between a parent and a child process.
//!
//! Each side runs a dedicated thread with a small `poll(2)` loop over the
//! socket and a wake socket. Received bytes are reassembled into frames and
//! handed to `on_message` on that thread; outgoing frames are queued under a
//! private mutex from any thread and written by the loop.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::frame::{encode_frame, FrameDecoder};
use crate::error::{Error, Result};
use crate::sync::lock;

/// Descriptor slot the child inherits its end of the pipe on
pub const CHILD_PIPE_FD: RawFd = 3;

const READ_CHUNK: usize = 64 * 1024;

/// How often the parent side checks whether the child has exited
const CHILD_POLL_INTERVAL_MS: libc::c_int = 50;

/// Called on the pipe thread for every complete frame: `(type, payload)`
pub type OnMessage = Box<dyn FnMut(u32, Vec<u8>) + Send + 'static>;

/// Called once on the pipe thread when the channel dies: `(status, error)`
pub type OnClose = Box<dyn FnOnce(i32, String) + Send + 'static>;

#[derive(Default)]
struct Outgoing {
    /// Encoded frames not yet handed to the loop
    bytes: Vec<u8>,
    quit: bool,
    closed: bool,
}

/// One end of a parent/child pipe.
///
/// Dropping the channel stops and joins its thread without calling
/// `on_close`. The parent side closes its end, which the child observes as
/// end-of-file. The child side leaves the inherited descriptor open so a
/// reloaded program can attach to the same parent again.
pub struct PipeChannel {
    outgoing: Arc<Mutex<Outgoing>>,
    wake: UnixStream,
    thread: Option<JoinHandle<()>>,
    /// Child side only
    inherited: Option<UnixStream>,
    child_pid: Option<u32>,
}

impl PipeChannel {
    /// Start `exe` with `args`, handing it the other end of a new pipe on
    /// descriptor [`CHILD_PIPE_FD`].
    ///
    /// With `log` false the child's stdout and stderr are discarded.
    pub fn spawn(
        exe: &Path,
        args: &[String],
        log: bool,
        on_message: OnMessage,
        on_close: OnClose,
    ) -> Result<Self> {
        let (ours, theirs) = UnixStream::pair()?;

        let mut command = Command::new(exe);
        command.args(args).stdin(Stdio::null());
        if !log {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let inherited = theirs.as_raw_fd();
        // SAFETY: the hook only calls async-signal-safe functions.
        unsafe {
            command.pre_exec(move || inherit_fd(inherited, CHILD_PIPE_FD));
        }
        let child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", exe.display(), e)))?;
        drop(theirs);

        let pid = child.id();
        tracing::debug!(pid, exe = %exe.display(), "spawned child process");
        let mut channel = Self::start(ours, Some(child), on_message, on_close)?;
        channel.child_pid = Some(pid);
        Ok(channel)
    }

    /// Attach to the pipe inherited from the parent process
    pub fn attach_to_parent(on_message: OnMessage, on_close: OnClose) -> Result<Self> {
        // SAFETY: fcntl on a descriptor number has no memory effects.
        let flags = unsafe { libc::fcntl(CHILD_PIPE_FD, libc::F_GETFD) };
        if flags == -1 {
            return Err(Error::Ipc(format!(
                "no parent pipe on descriptor {}",
                CHILD_PIPE_FD
            )));
        }
        // Grandchildren get their own pipe, not this one.
        // SAFETY: as above.
        unsafe {
            libc::fcntl(CHILD_PIPE_FD, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }

        // SAFETY: the descriptor was handed over by the parent and is owned
        // by this process; `Drop` gives it back with `into_raw_fd` instead of
        // closing it.
        let inherited = unsafe { UnixStream::from_raw_fd(CHILD_PIPE_FD) };
        let stream = match inherited.try_clone() {
            Ok(stream) => stream,
            Err(err) => {
                let _ = inherited.into_raw_fd();
                return Err(err.into());
            }
        };
        let mut channel = match Self::start(stream, None, on_message, on_close) {
            Ok(channel) => channel,
            Err(err) => {
                let _ = inherited.into_raw_fd();
                return Err(err);
            }
        };
        channel.inherited = Some(inherited);
        tracing::debug!("attached to parent pipe");
        Ok(channel)
    }

    fn start(
        stream: UnixStream,
        child: Option<Child>,
        on_message: OnMessage,
        on_close: OnClose,
    ) -> Result<Self> {
        stream.set_nonblocking(true)?;
        let (wake, wake_rx) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;

        let outgoing = Arc::new(Mutex::new(Outgoing::default()));
        let event_loop = PipeLoop {
            stream: Some(stream),
            wake: wake_rx,
            outgoing: Arc::clone(&outgoing),
            child,
            decoder: FrameDecoder::new(),
            pending_write: Vec::new(),
            written: 0,
            on_message,
            on_close: Some(on_close),
        };
        let thread = thread::Builder::new()
            .name("framehost-pipe".to_string())
            .spawn(move || event_loop.run())?;

        Ok(Self {
            outgoing,
            wake,
            thread: Some(thread),
            inherited: None,
            child_pid: None,
        })
    }

    /// Queue one frame for sending. Safe from any thread.
    ///
    /// Does nothing once the channel has closed.
    pub fn send_message(&self, kind: u32, payload: &[u8]) {
        {
            let mut outgoing = lock(&self.outgoing);
            if outgoing.closed || outgoing.quit {
                return;
            }
            if let Err(err) = encode_frame(kind, payload, &mut outgoing.bytes) {
                tracing::warn!(%err, "dropping outgoing message");
                return;
            }
        }
        self.wake();
    }

    /// Whether `on_close` has fired
    pub fn is_closed(&self) -> bool {
        lock(&self.outgoing).closed
    }

    /// Process id of the child, on the parent side
    pub fn child_pid(&self) -> Option<u32> {
        self.child_pid
    }

    fn wake(&self) {
        // A full wake buffer already guarantees a wakeup.
        let _ = (&self.wake).write(&[1]);
    }
}

impl Drop for PipeChannel {
    fn drop(&mut self) {
        lock(&self.outgoing).quit = true;
        self.wake();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(inherited) = self.inherited.take() {
            let _ = inherited.into_raw_fd();
        }
    }
}

impl std::fmt::Debug for PipeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeChannel")
            .field("child_pid", &self.child_pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Make `from` available as `to` in a freshly forked child
fn inherit_fd(from: RawFd, to: RawFd) -> io::Result<()> {
    // SAFETY: plain descriptor syscalls.
    unsafe {
        if from == to {
            // dup2 onto itself would keep close-on-exec set.
            let flags = libc::fcntl(to, libc::F_GETFD);
            if flags == -1 || libc::fcntl(to, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
                return Err(io::Error::last_os_error());
            }
        } else if libc::dup2(from, to) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// `(status, error)` reported for a terminated child
fn describe_exit(status: ExitStatus) -> (i32, String) {
    let code = status.code().unwrap_or(0);
    let signal = status.signal().unwrap_or(0);
    if code == 0 && signal == 0 {
        (0, String::new())
    } else {
        (
            code,
            format!(
                "Child exited with non-zero status or signal. Status: {} signal: {}",
                code, signal
            ),
        )
    }
}

enum ReadOutcome {
    Open,
    Eof,
}

/// State owned by the pipe thread
struct PipeLoop {
    /// None once the peer closed its end (parent side waiting for exit)
    stream: Option<UnixStream>,
    wake: UnixStream,
    outgoing: Arc<Mutex<Outgoing>>,
    child: Option<Child>,
    decoder: FrameDecoder,
    pending_write: Vec<u8>,
    written: usize,
    on_message: OnMessage,
    on_close: Option<OnClose>,
}

impl PipeLoop {
    fn run(mut self) {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let wants_write = self.written < self.pending_write.len();
            let mut fds = [
                libc::pollfd {
                    fd: self.wake.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    fd: self.stream.as_ref().map_or(-1, |s| s.as_raw_fd()),
                    events: libc::POLLIN | if wants_write { libc::POLLOUT } else { 0 },
                    revents: 0,
                },
            ];
            let timeout = if self.child.is_some() {
                CHILD_POLL_INTERVAL_MS
            } else {
                -1
            };
            // SAFETY: `fds` is a valid array for the duration of the call.
            let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.close(-1, format!("Failed to poll pipe: {}", err));
                return;
            }

            if fds[0].revents != 0 {
                self.drain_wake();
                let (bytes, quit) = {
                    let mut outgoing = lock(&self.outgoing);
                    (std::mem::take(&mut outgoing.bytes), outgoing.quit)
                };
                if quit {
                    self.shutdown();
                    return;
                }
                if self.pending_write.is_empty() {
                    self.pending_write = bytes;
                } else {
                    self.pending_write.extend_from_slice(&bytes);
                }
            }

            if let Err(err) = self.flush() {
                self.pending_write.clear();
                self.written = 0;
                if self.child.is_none() {
                    self.close(-1, format!("Failed to write to pipe: {}", err));
                    return;
                }
                // The child is gone or going; its exit status is reported below.
                tracing::warn!(%err, "failed to write to child pipe");
            }

            if fds[1].revents != 0 {
                match self.read_available(&mut buf) {
                    Ok(ReadOutcome::Open) => {}
                    Ok(ReadOutcome::Eof) => {
                        self.stream = None;
                        if self.child.is_none() {
                            self.close(0, "Parent process closed the pipe.".to_string());
                            return;
                        }
                    }
                    Err(err) => {
                        self.close(-1, format!("Failed to read from pipe: {}", err));
                        return;
                    }
                }
            }

            if let Some(child) = self.child.as_mut() {
                match child.try_wait() {
                    Ok(None) => {}
                    Ok(Some(status)) => {
                        // Frames written just before exit are still buffered.
                        if let Err(err) = self.read_available(&mut buf) {
                            tracing::warn!(%err, "failed to drain child pipe");
                        }
                        let (code, error) = describe_exit(status);
                        self.close(code, error);
                        return;
                    }
                    Err(err) => {
                        self.close(-1, format!("Failed to wait for child: {}", err));
                        return;
                    }
                }
            }
        }
    }

    fn drain_wake(&mut self) {
        let mut sink = [0u8; 64];
        while let Ok(n) = self.wake.read(&mut sink) {
            if n == 0 {
                break;
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            self.pending_write.clear();
            self.written = 0;
            return Ok(());
        };
        while self.written < self.pending_write.len() {
            match stream.write(&self.pending_write[self.written..]) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "pipe closed")),
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if self.written == self.pending_write.len() {
            self.pending_write.clear();
            self.written = 0;
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(ReadOutcome::Eof);
        };
        loop {
            match stream.read(buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => {
                    let on_message = &mut self.on_message;
                    self.decoder
                        .push(&buf[..n], |frame| on_message(frame.kind, frame.payload));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self, status: i32, error: String) {
        {
            let mut outgoing = lock(&self.outgoing);
            outgoing.closed = true;
            outgoing.bytes.clear();
        }
        self.stream = None;
        if self.decoder.has_partial() {
            tracing::debug!("pipe closed with a partial frame");
        }
        if let Some(on_close) = self.on_close.take() {
            tracing::debug!(status, %error, "pipe closed");
            on_close(status, error);
        }
    }

    fn shutdown(&mut self) {
        self.stream = None;
        if let Some(mut child) = self.child.take() {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                // Reap in the background so the child does not linger as a zombie.
                let _ = thread::Builder::new()
                    .name("framehost-reaper".to_string())
                    .spawn(move || {
                        let _ = child.wait();
                    });
            }
        }
    }
}
