//! In-process vcontrold emulator for tests and local experiments.
//!
//! The mock speaks the same prompt-delimited protocol as the real daemon:
//!
//! - On accept it writes the prompt.
//! - A line without arguments gets the command's configured response, or
//!   `ERR: unknown command`, followed by a newline and the prompt.
//! - A line with arguments is checked against the command's argument check
//!   and answered with `OK` or an `ERR:` line, then the prompt.
//! - `quit` closes the connection without a prompt.
//!
//! What a command returns and which arguments it accepts are configured
//! independently.
//!
//! # Example
//!
//! ```ignore
//! use vctrld_client::mock::MockVControld;
//!
//! let mut mock = MockVControld::new();
//! mock.respond("getTempA", "23.5");
//! mock.accept_args("setBetriebsart", |arg| matches!(arg, "WW" | "H+WW"));
//! let addr = mock.start("127.0.0.1:0").await?;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::vcontrol::{PROMPT, QUIT_COMMAND};

/// Produces the response for an argument-less command.
pub type ResponseFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Decides whether a single argument is acceptable for a set command.
pub type ArgumentCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Reply text used for commands the mock does not know.
pub const UNKNOWN_COMMAND: &str = "ERR: unknown command";

#[derive(Clone, Default)]
struct MockCommand {
    response: Option<ResponseFn>,
    argument_check: Option<ArgumentCheck>,
}

/// What the mock does with one received line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MockReply {
    /// Write this text, a newline, then the prompt.
    Text(String),
    /// Close the connection.
    Quit,
}

#[derive(Default)]
struct MockState {
    commands: Mutex<HashMap<String, MockCommand>>,
    command_log: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockState {
    fn reply_to(&self, raw: &str) -> MockReply {
        let (command, args) = match raw.split_once(' ') {
            Some((command, rest)) => (command, rest.split(' ').collect::<Vec<_>>()),
            None => (raw, Vec::new()),
        };

        if command == QUIT_COMMAND {
            return MockReply::Quit;
        }

        let commands = lock(&self.commands);
        let Some(entry) = commands.get(command) else {
            debug!("Mock: unknown command '{}'", command);
            return MockReply::Text(UNKNOWN_COMMAND.to_string());
        };

        if args.is_empty() {
            return match &entry.response {
                Some(response) => MockReply::Text(response()),
                None => MockReply::Text(UNKNOWN_COMMAND.to_string()),
            };
        }

        match &entry.argument_check {
            Some(check) if args.iter().all(|arg| check(*arg)) => MockReply::Text("OK".to_string()),
            Some(_) => {
                debug!("Mock: arguments {:?} rejected for '{}'", args, command);
                MockReply::Text(format!(
                    "ERR: invalid arguments for {}: {}",
                    command,
                    args.join(" ")
                ))
            }
            None => MockReply::Text(UNKNOWN_COMMAND.to_string()),
        }
    }
}

/// A TCP server emulating vcontrold.
pub struct MockVControld {
    state: Arc<MockState>,
    accept_task: Option<JoinHandle<()>>,
}

impl MockVControld {
    /// Create a mock with no commands configured.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            accept_task: None,
        }
    }

    /// Answer `command` (sent without arguments) with a fixed response.
    pub fn respond(&mut self, command: &str, response: &str) -> &mut Self {
        let response = response.to_string();
        self.respond_with(command, move || response.clone())
    }

    /// Answer `command` (sent without arguments) with a computed response.
    pub fn respond_with<F>(&mut self, command: &str, response: F) -> &mut Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        lock(&self.state.commands)
            .entry(command.to_string())
            .or_default()
            .response = Some(Arc::new(response));
        self
    }

    /// Accept `command` with arguments when every argument passes `check`.
    pub fn accept_args<F>(&mut self, command: &str, check: F) -> &mut Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        lock(&self.state.commands)
            .entry(command.to_string())
            .or_default()
            .argument_check = Some(Arc::new(check));
        self
    }

    /// Every line received so far, across all connections, without newlines.
    pub fn command_log(&self) -> Vec<String> {
        lock(&self.state.command_log).clone()
    }

    /// Forget the lines received so far.
    pub fn reset_command_log(&self) {
        lock(&self.state.command_log).clear();
    }

    /// Bind to `addr` and start serving. Port `0` picks a free port.
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self, addr: &str) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Mock vcontrold listening on {}", local_addr);

        let state = Arc::clone(&self.state);
        self.accept_task = Some(tokio::spawn(async move {
            // Dropping the set (when this task is aborted) aborts every session.
            let mut sessions = JoinSet::new();
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Mock: client connected from {}", peer);
                        sessions.spawn(serve(stream, Arc::clone(&state)));
                    }
                    Err(e) => warn!("Mock: accept failed: {}", e),
                }
            }
        }));

        Ok(local_addr)
    }

    /// Stop accepting connections and drop all live sessions.
    pub fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

impl Default for MockVControld {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockVControld {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serve one client connection until it quits or disconnects.
async fn serve(stream: TcpStream, state: Arc<MockState>) {
    let (read_half, mut write_half) = stream.into_split();

    if let Err(e) = write_half.write_all(PROMPT.as_bytes()).await {
        warn!("Mock: failed to send greeting: {}", e);
        return;
    }

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Mock: client disconnected");
                return;
            }
            Err(e) => {
                warn!("Mock: read failed: {}", e);
                return;
            }
        };

        lock(&state.command_log).push(line.clone());

        match state.reply_to(&line) {
            MockReply::Quit => {
                debug!("Mock: client sent quit");
                let _ = write_half.shutdown().await;
                return;
            }
            MockReply::Text(text) => {
                // Response and prompt go out as separate writes, like the daemon.
                let response = format!("{}\n", text);
                if let Err(e) = write_half.write_all(response.as_bytes()).await {
                    warn!("Mock: failed to send response: {}", e);
                    return;
                }
                if let Err(e) = write_half.write_all(PROMPT.as_bytes()).await {
                    warn!("Mock: failed to send prompt: {}", e);
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mock_state() -> MockVControld {
        let mut mock = MockVControld::new();
        mock.respond("getTemp", "23.5");
        mock.accept_args("setMode", |arg| matches!(arg, "eco" | "fast"));
        mock
    }

    fn reply(mock: &MockVControld, line: &str) -> MockReply {
        mock.state.reply_to(line)
    }

    #[test]
    fn test_get_reply() {
        let mock = mock_state();
        assert_eq!(reply(&mock, "getTemp"), MockReply::Text("23.5".to_string()));
        assert_eq!(
            reply(&mock, "getNothing"),
            MockReply::Text(UNKNOWN_COMMAND.to_string())
        );
    }

    #[test]
    fn test_set_reply_uses_argument_check_not_response() {
        let mock = mock_state();
        assert_eq!(
            reply(&mock, "setMode eco fast"),
            MockReply::Text("OK".to_string())
        );

        let MockReply::Text(rejected) = reply(&mock, "setMode turbo") else {
            panic!("expected a text reply");
        };
        assert!(rejected.starts_with("ERR:"), "unexpected reply: {}", rejected);
    }

    #[test]
    fn test_set_with_trailing_space_checks_empty_argument() {
        let mock = mock_state();
        let MockReply::Text(rejected) = reply(&mock, "setMode ") else {
            panic!("expected a text reply");
        };
        assert!(rejected.starts_with("ERR:"));
    }

    #[test]
    fn test_get_only_command_rejects_arguments() {
        let mock = mock_state();
        assert_eq!(
            reply(&mock, "getTemp 1"),
            MockReply::Text(UNKNOWN_COMMAND.to_string())
        );
    }

    #[test]
    fn test_quit() {
        let mock = mock_state();
        assert_eq!(reply(&mock, "quit"), MockReply::Quit);
    }

    #[test]
    fn test_computed_response() {
        let mut mock = MockVControld::new();
        let counter = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&counter);
        mock.respond_with("getCount", move || {
            let mut n = seen.lock().unwrap();
            *n += 1;
            n.to_string()
        });

        assert_eq!(reply(&mock, "getCount"), MockReply::Text("1".to_string()));
        assert_eq!(reply(&mock, "getCount"), MockReply::Text("2".to_string()));
    }
}
