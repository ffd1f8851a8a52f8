//! Text protocol spoken over a link.
//!
//! Clients send directives (`@d <seconds>`), the program source and input
//! values as plain messages. The server answers with one tagged line per
//! event:
//!
//! ```text
//! @p 3            pointer moved to instruction 3
//! @r 1|0|0|2      register bank a|b|c|d
//! @s 4|5          stack, bottom to top
//! @o 9            program output
//! @i ?stack       input requested (?stack or ?<register>)
//! @i 42           input consumed or seeded
//! @f              run finished
//! @e Kind: text   run failed
//! ```

use crate::virtual_machine::errors::{DecodeError, Fault};
use crate::virtual_machine::operand::InputTarget;
use crate::virtual_machine::state::{InputEvent, StateDelta};
use std::fmt;
use std::time::Duration;

const DIRECTIVE_PREFIX: char = '@';
const DELAY_DIRECTIVES: [&str; 2] = ["@d", "@delay"];

/// Malformed or unknown `@` directive. Sessions log and ignore these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    #[error("unknown directive {0}")]
    Unknown(String),
    #[error("invalid delay {0:?}, expected a non-negative number of seconds")]
    InvalidDelay(String),
}

/// A message received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Pacing directive.
    Delay(Duration),
    /// Program source or an input value, depending on the session state.
    Text(String),
}

impl Inbound {
    pub fn parse(message: &str) -> Result<Inbound, DirectiveError> {
        let trimmed = message.trim();
        if !trimmed.starts_with(DIRECTIVE_PREFIX) {
            return Ok(Inbound::Text(message.to_string()));
        }

        let mut parts = trimmed.split_whitespace();
        let name = parts.next().unwrap_or_default();
        if !DELAY_DIRECTIVES.contains(&name) {
            return Err(DirectiveError::Unknown(name.to_string()));
        }

        let arg = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return Err(DirectiveError::InvalidDelay(
                trimmed[name.len()..].trim().to_string(),
            ));
        }
        arg.parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map(Inbound::Delay)
            .ok_or_else(|| DirectiveError::InvalidDelay(arg.to_string()))
    }
}

/// One outbound protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pointer(usize),
    Registers(Vec<i64>),
    Stack(Vec<i64>),
    Output(i64),
    InputRequested(InputTarget),
    Input(i64),
    Finished,
    Error { kind: &'static str, message: String },
}

impl Event {
    pub fn fault(fault: &Fault) -> Self {
        Event::Error {
            kind: fault.kind(),
            message: fault.to_string(),
        }
    }

    pub fn decode_error(err: &DecodeError) -> Self {
        Event::Error {
            kind: err.kind.kind(),
            message: err.to_string(),
        }
    }

    /// Events for one step, in emission order: input echo, registers, stack,
    /// output, pointer, input request, finish.
    pub fn from_delta(delta: &StateDelta) -> Vec<Event> {
        let mut events = Vec::new();
        if let Some(InputEvent::Consumed(v)) = delta.input {
            events.push(Event::Input(v));
        }
        if let Some(regs) = &delta.registers {
            events.push(Event::Registers(regs.clone()));
        }
        if let Some(stack) = &delta.stack {
            events.push(Event::Stack(stack.clone()));
        }
        if let Some(v) = delta.output {
            events.push(Event::Output(v));
        }
        if let Some(ip) = delta.pointer {
            events.push(Event::Pointer(ip));
        }
        if let Some(InputEvent::Requested(target)) = delta.input {
            events.push(Event::InputRequested(target));
        }
        if delta.halted {
            events.push(Event::Finished);
        }
        events
    }
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Pointer(ip) => write!(f, "@p {ip}"),
            Event::Registers(regs) => write!(f, "@r {}", join(regs)),
            Event::Stack(stack) => write!(f, "@s {}", join(stack)),
            Event::Output(v) => write!(f, "@o {v}"),
            Event::InputRequested(target) => write!(f, "@i ?{target}"),
            Event::Input(v) => write!(f, "@i {v}"),
            Event::Finished => write!(f, "@f"),
            Event::Error { kind, message } => write!(f, "@e {kind}: {message}"),
        }
    }
}
