//! Command-line encoding and response grammar for get/set commands.

use crate::vcontrol::error::VControlError;

/// Payload prefix marking a failed get command.
pub const ERROR_PREFIX: &str = "ERR:";

/// Payload prefix marking a successful set command.
pub const OK_PREFIX: &str = "OK";

/// Command that asks the daemon to close the connection.
pub const QUIT_COMMAND: &str = "quit";

/// Arguments for a set command.
///
/// A list drops empty and absent entries before joining with single spaces.
/// A single string is sent as given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SetArgs {
    /// No arguments; the line still carries the separating space.
    #[default]
    None,
    /// Sent verbatim.
    Verbatim(String),
    /// Normalized before sending.
    List(Vec<Option<String>>),
}

impl SetArgs {
    /// Render the argument string that follows the command and its space.
    pub fn to_arg_string(&self) -> String {
        match self {
            SetArgs::None => String::new(),
            SetArgs::Verbatim(args) => args.clone(),
            SetArgs::List(items) => items
                .iter()
                .flatten()
                .filter(|item| !item.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<&str> for SetArgs {
    fn from(args: &str) -> Self {
        SetArgs::Verbatim(args.to_string())
    }
}

impl From<String> for SetArgs {
    fn from(args: String) -> Self {
        SetArgs::Verbatim(args)
    }
}

impl From<Vec<String>> for SetArgs {
    fn from(items: Vec<String>) -> Self {
        SetArgs::List(items.into_iter().map(Some).collect())
    }
}

impl From<Vec<&str>> for SetArgs {
    fn from(items: Vec<&str>) -> Self {
        SetArgs::List(items.into_iter().map(|s| Some(s.to_string())).collect())
    }
}

impl<const N: usize> From<[&str; N]> for SetArgs {
    fn from(items: [&str; N]) -> Self {
        SetArgs::List(items.iter().map(|s| Some(s.to_string())).collect())
    }
}

impl From<Vec<Option<&str>>> for SetArgs {
    fn from(items: Vec<Option<&str>>) -> Self {
        SetArgs::List(items.into_iter().map(|s| s.map(str::to_string)).collect())
    }
}

impl<const N: usize> From<[Option<&str>; N]> for SetArgs {
    fn from(items: [Option<&str>; N]) -> Self {
        SetArgs::List(items.iter().map(|s| s.map(str::to_string)).collect())
    }
}

/// Build the line for a get command.
pub fn get_line(command: &str) -> String {
    format!("{}\n", command)
}

/// Build the command string for a set command, without the newline.
///
/// The space after the command is always present, even with no arguments.
pub fn set_command_string(command: &str, args: &SetArgs) -> String {
    format!("{} {}", command, args.to_arg_string())
}

/// Interpret a completed get payload.
pub fn interpret_get(command: &str, payload: String) -> Result<String, VControlError> {
    if payload.starts_with(ERROR_PREFIX) {
        Err(VControlError::CommandExecution {
            command: command.to_string(),
            response: payload,
        })
    } else {
        Ok(payload)
    }
}

/// Interpret a completed set payload.
pub fn interpret_set(command_line: &str, payload: String) -> Result<String, VControlError> {
    if payload.starts_with(OK_PREFIX) {
        Ok(payload)
    } else {
        Err(VControlError::CommandFailed {
            command_line: command_line.to_string(),
            response: payload,
        })
    }
}
