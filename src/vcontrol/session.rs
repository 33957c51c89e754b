//! Connection lifecycle and command correlation for a vcontrold session.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect ┌────────────┐ prompt ┌───────┐ get/set ┌──────┐
//! │ Disconnected │────────>│ Connecting │───────>│ Ready │<───────>│ Busy │
//! └──────────────┘         └────────────┘        └───────┘ response└──────┘
//!                                │                   │ close
//!                                │ error/greeting    ↓
//!                                │              ┌─────────┐ closed ┌────────┐
//!                                └─────────────>│ Closing │───────>│ Closed │
//!                                               └─────────┘        └────────┘
//! ```
//!
//! The session owns a single slot. While an operation is in flight the slot
//! holds it as a tagged [`PendingOperation`], which is the only consumer of
//! transport events. Each operation is resolved exactly once: resolution
//! takes the operation out of the slot, so a second resolution has nothing
//! to act on.
//!
//! The session performs no I/O. The client drives it with transport events
//! and writes whatever line an operation needs.

use std::fmt;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::vcontrol::command::{interpret_get, interpret_set};
use crate::vcontrol::error::VControlError;
use crate::vcontrol::framing::{ResponseFramer, PROMPT};

/// Sending half of an operation's completion channel.
type Reply<T> = oneshot::Sender<Result<T, VControlError>>;

/// Receiving half of an operation's completion channel.
pub type Pending<T> = oneshot::Receiver<Result<T, VControlError>>;

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, not yet connected.
    Disconnected,
    /// Transport opened, waiting for the greeting prompt.
    Connecting,
    /// Idle and accepting commands.
    Ready,
    /// A get or set command is in flight.
    Busy,
    /// `quit` sent, waiting for the transport to close.
    Closing,
    /// Terminal. A new client is needed to reconnect.
    Closed,
}

impl ConnectionState {
    /// Get a short display string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Busy => "busy",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events delivered by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A chunk of bytes, split wherever the socket happened to split it.
    Data(Bytes),
    /// The transport failed; no further events follow.
    Error(std::io::Error),
    /// The peer closed the connection; no further events follow.
    Closed,
}

/// The single in-flight exchange.
#[derive(Debug)]
enum PendingOperation {
    Connect {
        reply: Reply<()>,
    },
    Get {
        command: String,
        framer: ResponseFramer,
        reply: Reply<String>,
    },
    Set {
        command_line: String,
        framer: ResponseFramer,
        reply: Reply<String>,
    },
    Close {
        reply: Reply<()>,
    },
}

impl PendingOperation {
    fn state(&self) -> ConnectionState {
        match self {
            PendingOperation::Connect { .. } => ConnectionState::Connecting,
            PendingOperation::Get { .. } | PendingOperation::Set { .. } => ConnectionState::Busy,
            PendingOperation::Close { .. } => ConnectionState::Closing,
        }
    }

    /// Resolve with an error. A receiver that has gone away is not an error.
    fn fail(self, err: VControlError) {
        match self {
            PendingOperation::Connect { reply } | PendingOperation::Close { reply } => {
                let _ = reply.send(Err(err));
            }
            PendingOperation::Get { reply, .. } | PendingOperation::Set { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }
}

#[derive(Debug)]
enum Slot {
    Disconnected,
    Ready,
    Pending(PendingOperation),
    Closed,
}

/// What `close` has to do after the session accepted it.
#[derive(Debug)]
pub enum CloseStart {
    /// Write `quit` and wait for the transport to close.
    SendQuit(Pending<()>),
    /// Nothing to send; tear down whatever transport exists.
    Finished,
}

/// Protocol state for one connection.
#[derive(Debug)]
pub struct Session {
    slot: Slot,
}

impl Session {
    /// Create a session in `Disconnected` state.
    pub fn new() -> Self {
        Self {
            slot: Slot::Disconnected,
        }
    }

    /// Get current state.
    pub fn state(&self) -> ConnectionState {
        match &self.slot {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Ready => ConnectionState::Ready,
            Slot::Pending(op) => op.state(),
            Slot::Closed => ConnectionState::Closed,
        }
    }

    /// Start the connect handshake.
    ///
    /// # Errors
    /// Returns `AlreadyConnected` unless the session is `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<Pending<()>, VControlError> {
        if !matches!(self.slot, Slot::Disconnected) {
            return Err(VControlError::AlreadyConnected(self.state()));
        }

        let (reply, pending) = oneshot::channel();
        self.slot = Slot::Pending(PendingOperation::Connect { reply });
        Ok(pending)
    }

    /// Start a get command.
    ///
    /// # Errors
    /// Returns `InvalidState` unless the session is `Ready`.
    pub fn begin_get(&mut self, command: &str) -> Result<Pending<String>, VControlError> {
        self.require_ready("get")?;

        let (reply, pending) = oneshot::channel();
        self.slot = Slot::Pending(PendingOperation::Get {
            command: command.to_string(),
            framer: ResponseFramer::new(),
            reply,
        });
        Ok(pending)
    }

    /// Start a set command. `command_line` is the full line without newline.
    ///
    /// # Errors
    /// Returns `InvalidState` unless the session is `Ready`.
    pub fn begin_set(&mut self, command_line: &str) -> Result<Pending<String>, VControlError> {
        self.require_ready("set")?;

        let (reply, pending) = oneshot::channel();
        self.slot = Slot::Pending(PendingOperation::Set {
            command_line: command_line.to_string(),
            framer: ResponseFramer::new(),
            reply,
        });
        Ok(pending)
    }

    /// Start closing the connection.
    ///
    /// Closing is best-effort from any state except `Closing`. An in-flight
    /// command fails with `ConnectionClosed` before `quit` takes its place,
    /// and an unfinished handshake is abandoned without sending anything.
    ///
    /// # Errors
    /// Returns `InvalidState` if a close is already in progress.
    pub fn begin_close(&mut self) -> Result<CloseStart, VControlError> {
        match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Ready => {}
            Slot::Pending(PendingOperation::Close { reply }) => {
                self.slot = Slot::Pending(PendingOperation::Close { reply });
                return Err(VControlError::InvalidState {
                    operation: "close",
                    state: ConnectionState::Closing,
                });
            }
            Slot::Pending(op @ PendingOperation::Connect { .. }) => {
                op.fail(VControlError::ConnectionClosed);
                return Ok(CloseStart::Finished);
            }
            Slot::Pending(op) => {
                warn!("Closing connection with a command still pending");
                op.fail(VControlError::ConnectionClosed);
            }
            Slot::Disconnected | Slot::Closed => return Ok(CloseStart::Finished),
        }

        let (reply, pending) = oneshot::channel();
        self.slot = Slot::Pending(PendingOperation::Close { reply });
        Ok(CloseStart::SendQuit(pending))
    }

    /// Fail whatever operation is pending and mark the session `Closed`.
    ///
    /// Returns `false` if nothing was pending.
    pub fn abort(&mut self, err: VControlError) -> bool {
        match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Pending(op) => {
                op.fail(err);
                true
            }
            _ => false,
        }
    }

    /// Dispatch one transport event to the pending operation.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Data(chunk) => self.on_data(&chunk),
            TransportEvent::Error(err) => self.on_error(err),
            TransportEvent::Closed => self.on_closed(),
        }
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), VControlError> {
        match self.slot {
            Slot::Ready => Ok(()),
            _ => Err(VControlError::InvalidState {
                operation,
                state: self.state(),
            }),
        }
    }

    fn on_data(&mut self, chunk: &[u8]) {
        self.slot = match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Pending(PendingOperation::Connect { reply }) => {
                // The greeting must be the first chunk, exactly.
                if chunk == PROMPT.as_bytes() {
                    info!("Connection to vcontrold established");
                    let _ = reply.send(Ok(()));
                    Slot::Ready
                } else {
                    let greeting = String::from_utf8_lossy(chunk).into_owned();
                    warn!("Unexpected greeting from vcontrold: {:?}", greeting);
                    let _ = reply.send(Err(VControlError::UnexpectedGreeting(greeting)));
                    Slot::Closed
                }
            }
            Slot::Pending(PendingOperation::Get {
                command,
                mut framer,
                reply,
            }) => {
                let frame = framer.push(chunk);
                if frame.complete {
                    debug!("Received response for '{}': {:?}", command, frame.payload);
                    let _ = reply.send(interpret_get(&command, frame.payload));
                    Slot::Ready
                } else {
                    Slot::Pending(PendingOperation::Get {
                        command,
                        framer,
                        reply,
                    })
                }
            }
            Slot::Pending(PendingOperation::Set {
                command_line,
                mut framer,
                reply,
            }) => {
                let frame = framer.push(chunk);
                if frame.complete {
                    debug!("Received response for '{}': {:?}", command_line, frame.payload);
                    let _ = reply.send(interpret_set(&command_line, frame.payload));
                    Slot::Ready
                } else {
                    Slot::Pending(PendingOperation::Set {
                        command_line,
                        framer,
                        reply,
                    })
                }
            }
            Slot::Pending(op @ PendingOperation::Close { .. }) => {
                debug!("Ignoring {} bytes received while closing", chunk.len());
                Slot::Pending(op)
            }
            idle => {
                warn!("Discarding {} unsolicited bytes from vcontrold", chunk.len());
                idle
            }
        };
    }

    fn on_error(&mut self, err: std::io::Error) {
        match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Pending(op @ PendingOperation::Connect { .. }) => {
                warn!("Transport error while connecting: {}", err);
                op.fail(VControlError::Connection(err));
            }
            Slot::Pending(op) => {
                warn!("Transport error with an operation pending: {}", err);
                op.fail(VControlError::Transport(err));
            }
            Slot::Ready => warn!("Transport error on idle connection: {}", err),
            Slot::Disconnected | Slot::Closed => debug!("Transport error after close: {}", err),
        }
    }

    fn on_closed(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Pending(PendingOperation::Close { reply }) => {
                info!("Connection to vcontrold closed");
                let _ = reply.send(Ok(()));
            }
            Slot::Pending(op) => {
                warn!("vcontrold closed the connection with an operation pending");
                op.fail(VControlError::ConnectionClosed);
            }
            Slot::Ready => info!("vcontrold closed the idle connection"),
            Slot::Disconnected | Slot::Closed => {}
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
