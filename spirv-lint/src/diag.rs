//! The message sink the linter reports through.

/// Severity of a reported message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// Location triple attached to each message.
///
/// The linter works on a decoded binary with no source text to point
/// into, so it always reports zeroes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub index: usize,
}

/// Callback invoked once per message: `(level, source_name, position, text)`.
///
/// The linter emits an empty source name; pretty-printed instructions
/// are embedded in the message text on an indented continuation line.
pub type MessageConsumer = Box<dyn Fn(Level, &str, Position, &str)>;

/// A consumer that drops every message, the default for a fresh
/// [`Linter`](crate::Linter).
pub fn ignore_messages() -> MessageConsumer {
    Box::new(|_, _, _, _| {})
}
