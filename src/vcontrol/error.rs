//! Error types for vcontrold client operations.

use std::time::Duration;

use thiserror::Error;

use crate::vcontrol::session::ConnectionState;

/// Errors surfaced by [`VControlClient`](crate::vcontrol::VControlClient).
///
/// Every failed operation resolves with exactly one of these; nothing is
/// retried internally.
#[derive(Debug, Error)]
pub enum VControlError {
    /// The TCP connection could not be established.
    #[error(transparent)]
    Connection(std::io::Error),

    /// The first data received after connecting was not the prompt token.
    ///
    /// The message is the raw greeting text, unmodified.
    #[error("{0}")]
    UnexpectedGreeting(String),

    /// A get command answered with an `ERR:` payload.
    #[error("Unable to perform command '{command}': {response}")]
    CommandExecution {
        /// The command as sent, without the newline.
        command: String,
        /// The payload returned by the daemon.
        response: String,
    },

    /// A set command answered with anything other than an `OK` payload.
    #[error("Command for vcontrold failed: {command_line} ({response})")]
    CommandFailed {
        /// The full command line including arguments.
        command_line: String,
        /// The payload returned by the daemon.
        response: String,
    },

    /// `connect` was called on a client that already left `Disconnected`.
    #[error("Already connected (connection is {0})")]
    AlreadyConnected(ConnectionState),

    /// An operation was invoked in a lifecycle state that does not allow it.
    #[error("Cannot {operation} while connection is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the connection was in.
        state: ConnectionState,
    },

    /// The transport failed while an operation was pending.
    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// The daemon closed the connection while an operation was pending.
    #[error("Connection closed while an operation was pending")]
    ConnectionClosed,

    /// No completing prompt arrived within the configured timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        let greeting = VControlError::UnexpectedGreeting("hello there".to_string());
        assert_eq!(greeting.to_string(), "hello there");

        let get_err = VControlError::CommandExecution {
            command: "getTemp".to_string(),
            response: "ERR:sensor offline".to_string(),
        };
        assert_eq!(
            get_err.to_string(),
            "Unable to perform command 'getTemp': ERR:sensor offline"
        );

        let set_err = VControlError::CommandFailed {
            command_line: "setMode eco".to_string(),
            response: "FAIL".to_string(),
        };
        assert_eq!(
            set_err.to_string(),
            "Command for vcontrold failed: setMode eco (FAIL)"
        );

        let usage = VControlError::InvalidState {
            operation: "get",
            state: ConnectionState::Busy,
        };
        assert_eq!(usage.to_string(), "Cannot get while connection is busy");

        let timeout = VControlError::Timeout(Duration::from_millis(250));
        assert_eq!(timeout.to_string(), "Operation timed out after 250ms");
    }

    #[test]
    fn test_connection_error_is_verbatim() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = VControlError::Connection(refused);
        assert_eq!(err.to_string(), "refused");
    }
}
