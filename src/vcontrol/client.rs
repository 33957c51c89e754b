//! vcontrold client: one TCP session, one command at a time.
//!
//! This module provides `VControlClient`, an async client that connects to a
//! vcontrold daemon over TCP, waits for its prompt, and maps each get/set
//! command onto a single request/response exchange.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::vcontrol::command::{self, SetArgs, QUIT_COMMAND};
use crate::vcontrol::error::VControlError;
use crate::vcontrol::session::{CloseStart, ConnectionState, Pending, Session};
use crate::vcontrol::transport::{self, BoxedReader, BoxedWriter};

/// Lock the shared session, recovering from a poisoned mutex.
///
/// The session is never left half-updated by a panic: every transition is a
/// single assignment of the slot.
fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client for a vcontrold daemon.
///
/// All methods take `&self`, so a client can be shared between tasks (for
/// example behind an `Arc`). The protocol has no request IDs, so only one
/// operation may be in flight: a command issued while another is pending is
/// rejected with [`VControlError::InvalidState`] and the pending one is left
/// untouched.
///
/// # Connection Lifecycle
///
/// - `new()` - Create a client in `Disconnected` state
/// - `connect()` - Open the TCP connection and wait for the prompt
/// - `get_data()` / `set_data()` - Run one command and wait for its response
/// - `close()` - Send `quit` and wait for the daemon to hang up
///
/// A closed client cannot be reconnected; create a new one.
///
/// # Example
///
/// ```ignore
/// use vctrld_client::vcontrol::VControlClient;
///
/// let client = VControlClient::new();
/// client.connect("localhost", 3002).await?;
///
/// let temp = client.get_data("getTempA").await?;
/// client.set_data("setBetriebsart", "WW").await?;
///
/// client.close().await?;
/// ```
pub struct VControlClient {
    /// Protocol state, shared with the reader task.
    session: Arc<Mutex<Session>>,
    /// Write half of the transport, present while connected.
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    /// Reader task delivering transport events to the session.
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Per-operation timeout; `None` waits indefinitely.
    timeout: Option<Duration>,
}

impl VControlClient {
    /// Create a client with no operation timeout.
    pub fn new() -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new())),
            writer: tokio::sync::Mutex::new(None),
            reader_task: Mutex::new(None),
            timeout: None,
        }
    }

    /// Create a client using the timeout from `config`.
    pub fn with_config(config: &ClientConfig) -> Self {
        let mut client = Self::new();
        client.set_timeout(config.timeout());
        client
    }

    /// Set the per-operation timeout. `None` disables it.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        lock_session(&self.session).state()
    }

    /// Connect to vcontrold and wait for its prompt.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if this client has been connected before; no
    ///   transport action is taken
    /// - `Connection` if the TCP connection cannot be established
    /// - `UnexpectedGreeting` if the first data received is not the prompt
    /// - `Timeout` if no greeting arrives within the configured timeout
    ///
    /// On any error the client is left `Closed`.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), VControlError> {
        let mut op = InFlight::new(self, lock_session(&self.session).begin_connect()?);
        info!("Connecting to vcontrold at {}:{}...", host, port);

        let halves = match self.within_timeout(transport::open_tcp(host, port)).await {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                warn!("Failed to connect to vcontrold: {}", e);
                return op.settle(VControlError::Connection(e));
            }
            Err(limit) => return op.settle(VControlError::Timeout(limit)),
        };

        self.handshake(op, halves).await
    }

    /// Run the connect handshake over an already-established stream.
    ///
    /// Semantics match [`connect`](Self::connect), minus opening the socket.
    ///
    /// # Errors
    ///
    /// Same as `connect`, except that `Connection` only reports transport
    /// failures during the handshake.
    pub async fn connect_with<S>(&self, stream: S) -> Result<(), VControlError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let op = InFlight::new(self, lock_session(&self.session).begin_connect()?);
        self.handshake(op, transport::split_stream(stream)).await
    }

    /// Read data by running a get command.
    ///
    /// Returns the response payload without the trailing prompt.
    ///
    /// Dropping the returned future before it completes closes the
    /// connection, since the daemon's late answer could not be told apart
    /// from the next command's.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the client is not `Ready` (including while another
    ///   command is pending)
    /// - `CommandExecution` if the payload starts with `ERR:`
    /// - `Transport`, `ConnectionClosed` or `Timeout` if the exchange
    ///   cannot complete
    pub async fn get_data(&self, command: &str) -> Result<String, VControlError> {
        let op = InFlight::new(self, lock_session(&self.session).begin_get(command)?);
        debug!("Sending command: '{}'", command);

        self.exchange(op, &command::get_line(command)).await
    }

    /// Write data by running a set command.
    ///
    /// `args` can be a single string (sent verbatim), a list of strings or
    /// optional strings (empty and absent entries are dropped, the rest are
    /// joined with spaces), or [`SetArgs::None`].
    ///
    /// Cancellation behaves as for [`get_data`](Self::get_data).
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the client is not `Ready`
    /// - `CommandFailed` if the payload does not start with `OK`
    /// - `Transport`, `ConnectionClosed` or `Timeout` if the exchange
    ///   cannot complete
    pub async fn set_data(
        &self,
        command: &str,
        args: impl Into<SetArgs>,
    ) -> Result<String, VControlError> {
        let command_line = command::set_command_string(command, &args.into());
        let op = InFlight::new(self, lock_session(&self.session).begin_set(&command_line)?);
        debug!("Sending command: '{}'", command_line);

        self.exchange(op, &format!("{}\n", command_line)).await
    }

    /// Close the connection by sending `quit`.
    ///
    /// Resolves once the daemon has closed the connection. Closing a client
    /// that never connected, or one already closed, succeeds without sending
    /// anything. A command still pending fails with `ConnectionClosed`.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if a close is already in progress
    /// - `Transport` or `Timeout` if the daemon does not hang up cleanly
    pub async fn close(&self) -> Result<(), VControlError> {
        let start = lock_session(&self.session).begin_close()?;

        let result = match start {
            CloseStart::SendQuit(pending) => {
                info!("Closing connection to vcontrold...");
                let op = InFlight::new(self, pending);
                self.exchange(op, &format!("{}\n", QUIT_COMMAND)).await
            }
            CloseStart::Finished => Ok(()),
        };

        self.teardown().await;
        result
    }

    /// Install the transport and wait for the greeting.
    async fn handshake(
        &self,
        op: InFlight<'_, ()>,
        (reader, writer): (BoxedReader, BoxedWriter),
    ) -> Result<(), VControlError> {
        *self.writer.lock().await = Some(writer);

        let session = Arc::clone(&self.session);
        let task = transport::spawn_reader(reader, move |event| {
            lock_session(&session).handle_event(event);
        });
        *self.lock_reader_task() = Some(task);

        let result = self.await_reply(op).await;
        if result.is_err() {
            self.teardown().await;
        }
        result
    }

    /// Write the operation's line, then wait for its resolution.
    async fn exchange<T>(&self, mut op: InFlight<'_, T>, line: &str) -> Result<T, VControlError> {
        let written = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => transport::write_line(writer, line).await,
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "transport is not open",
                )),
            }
        };

        if let Err(e) = written {
            warn!("Failed to send command to vcontrold: {}", e);
            let result = op.settle(VControlError::Transport(e));
            self.teardown().await;
            return result;
        }

        self.await_reply(op).await
    }

    /// Wait for the pending operation, honouring the timeout.
    async fn await_reply<T>(&self, mut op: InFlight<'_, T>) -> Result<T, VControlError> {
        match self.within_timeout(&mut op.pending).await {
            Ok(received) => {
                op.resolved = true;
                received.unwrap_or(Err(VControlError::ConnectionClosed))
            }
            Err(limit) => {
                warn!("No response from vcontrold within {:?}", limit);
                let result = op.settle(VControlError::Timeout(limit));
                if matches!(result, Err(VControlError::Timeout(_))) {
                    self.teardown().await;
                }
                result
            }
        }
    }

    async fn within_timeout<F: Future>(&self, fut: F) -> Result<F::Output, Duration> {
        match self.timeout {
            Some(limit) => timeout(limit, fut).await.map_err(|_| limit),
            None => Ok(fut.await),
        }
    }

    /// Drop the transport. The session is not touched.
    async fn teardown(&self) {
        if let Some(task) = self.lock_reader_task().take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down transport: {}", e);
            }
        }
    }

    /// Drop the transport without waiting, for use outside async context.
    fn abort_transport(&self) {
        if let Some(task) = self.lock_reader_task().take() {
            task.abort();
        }
        // The writer lock is only held across a single write; if it is busy
        // the write half is dropped with the client instead.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
    }

    fn lock_reader_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for VControlClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for VControlClient {
    fn drop(&mut self) {
        if let Some(task) = self.lock_reader_task().take() {
            task.abort();
        }
    }
}

/// An operation the session accepted, owned by the call that started it.
///
/// If the call is dropped before the operation resolves, the operation is
/// aborted, the session goes `Closed` and the transport is dropped.
struct InFlight<'a, T> {
    client: &'a VControlClient,
    pending: Pending<T>,
    resolved: bool,
}

impl<'a, T> InFlight<'a, T> {
    fn new(client: &'a VControlClient, pending: Pending<T>) -> Self {
        Self {
            client,
            pending,
            resolved: false,
        }
    }

    /// Resolve with `err` unless the operation has already been resolved.
    ///
    /// Runs under the session lock, so the operation is either still in the
    /// slot (and is aborted) or its result is already in the channel.
    fn settle(&mut self, err: VControlError) -> Result<T, VControlError> {
        self.resolved = true;
        let client = self.client;
        let mut session = lock_session(&client.session);
        if let Ok(result) = self.pending.try_recv() {
            return result;
        }
        session.abort(err);
        self.pending
            .try_recv()
            .unwrap_or(Err(VControlError::ConnectionClosed))
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        let client = self.client;
        let cancelled = {
            let mut session = lock_session(&client.session);
            matches!(self.pending.try_recv(), Err(TryRecvError::Empty))
                && session.abort(VControlError::ConnectionClosed)
        };

        if cancelled {
            warn!("Operation cancelled before vcontrold answered; closing connection");
            client.abort_transport();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, DuplexStream};

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect a client over an in-memory pipe; returns the daemon's end.
    async fn connected_client() -> (VControlClient, DuplexStream) {
        let (client_end, mut daemon) = tokio::io::duplex(1024);
        let client = VControlClient::new();

        daemon.write_all(b"vctrld>").await.unwrap();
        timeout(TEST_TIMEOUT, client.connect_with(client_end))
            .await
            .expect("Test timed out")
            .expect("Handshake failed");

        (client, daemon)
    }

    /// Read exactly `expected.len()` bytes from the daemon end.
    async fn expect_line(daemon: &mut DuplexStream, expected: &str) {
        let mut buf = vec![0u8; expected.len()];
        timeout(TEST_TIMEOUT, daemon.read_exact(&mut buf))
            .await
            .expect("Test timed out")
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&buf), expected);
    }

    #[tokio::test]
    async fn test_get_over_pipe() {
        let (client, mut daemon) = connected_client().await;
        assert_eq!(client.state(), ConnectionState::Ready);

        let daemon_side = async {
            expect_line(&mut daemon, "getTemp\n").await;
            daemon.write_all(b"23.5vctrld>").await.unwrap();
        };
        let (result, ()) = tokio::join!(client.get_data("getTemp"), daemon_side);

        assert_eq!(result.unwrap(), "23.5");
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_overlapping_get_is_rejected() {
        let (client, mut daemon) = connected_client().await;

        let daemon_side = async {
            expect_line(&mut daemon, "getTemp\n").await;
            daemon.write_all(b"23.5vctrld>").await.unwrap();
        };
        let (first, second, ()) = tokio::join!(
            client.get_data("getTemp"),
            client.get_data("getPressure"),
            daemon_side
        );

        assert_eq!(first.unwrap(), "23.5");
        assert!(matches!(
            second,
            Err(VControlError::InvalidState {
                state: ConnectionState::Busy,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_timeout_closes_connection() {
        let (mut client, mut daemon) = connected_client().await;
        client.set_timeout(Some(Duration::from_millis(50)));

        let result = client.get_data("getTemp").await;
        assert!(matches!(result, Err(VControlError::Timeout(_))));
        assert_eq!(client.state(), ConnectionState::Closed);

        expect_line(&mut daemon, "getTemp\n").await;
        assert!(matches!(
            client.get_data("getTemp").await,
            Err(VControlError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_twice_takes_no_transport_action() {
        let (client, _daemon) = connected_client().await;
        let (unused, _other) = tokio::io::duplex(16);

        let result = client.connect_with(unused).await;
        assert!(matches!(result, Err(VControlError::AlreadyConnected(_))));
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_close_never_connected() {
        let client = VControlClient::new();
        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_get_closes_connection() {
        let (client, mut daemon) = connected_client().await;

        let cancelled = timeout(Duration::from_millis(50), client.get_data("getTemp")).await;
        assert!(cancelled.is_err(), "get should still be waiting for the daemon");
        assert_eq!(client.state(), ConnectionState::Closed);

        // A late answer has nothing to resolve.
        expect_line(&mut daemon, "getTemp\n").await;
        let _ = daemon.write_all(b"23.5vctrld>").await;
        assert!(matches!(
            client.get_data("getTemp").await,
            Err(VControlError::InvalidState {
                operation: "get",
                state: ConnectionState::Closed
            })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_connect_closes_connection() {
        let (client_end, _daemon) = tokio::io::duplex(64);
        let client = VControlClient::new();

        let cancelled = timeout(Duration::from_millis(50), client.connect_with(client_end)).await;
        assert!(cancelled.is_err(), "connect should still be waiting for the prompt");
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_completed_get_is_not_cancelled_by_drop() {
        let (client, mut daemon) = connected_client().await;

        let daemon_side = async {
            expect_line(&mut daemon, "getTemp\n").await;
            daemon.write_all(b"23.5vctrld>").await.unwrap();
        };
        let (result, ()) = tokio::join!(client.get_data("getTemp"), daemon_side);
        assert_eq!(result.unwrap(), "23.5");

        // The finished call's guard is gone; the connection stays usable.
        assert_eq!(client.state(), ConnectionState::Ready);
        let daemon_side = async {
            expect_line(&mut daemon, "getTemp\n").await;
            daemon.write_all(b"24.0vctrld>").await.unwrap();
        };
        let (result, ()) = tokio::join!(client.get_data("getTemp"), daemon_side);
        assert_eq!(result.unwrap(), "24.0");
    }
}
