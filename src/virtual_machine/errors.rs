//! Decode-time and run-time error types.
//!
//! Every error exposes a stable [`kind`](Fault::kind) name. Sessions report
//! failures to clients as `@e <Kind>: <message>`.

/// Errors raised while expanding `#define` blocks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    /// `#define NAME` without a matching `#enddefine`.
    #[error("macro {name} is never closed with #enddefine")]
    UnterminatedDefine { name: String },
    /// `NAME!` invoked before (or without) a definition.
    #[error("macro {name} is not defined")]
    UndefinedMacro { name: String },
    /// The same macro name defined twice.
    #[error("macro {name} is already defined")]
    MacroRedefinition { name: String },
    /// Malformed header, self invocation or bad placeholder usage.
    #[error("invalid macro: {reason}")]
    InvalidMacro { reason: String },
    /// `#enddefine` without an open `#define`.
    #[error("#enddefine used without #define")]
    StrayEnddefine,
}

/// What went wrong while decoding a single line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeErrorKind {
    #[error("{0}")]
    Macro(#[from] PreprocessError),
    /// Mnemonic not part of the instruction set.
    #[error("unknown instruction {name}")]
    UnknownOpcode { name: String },
    /// Mnemonic exists but no form takes this many operands.
    #[error("{instruction} takes {expected} operand(s), got {actual}")]
    ArityMismatch {
        instruction: String,
        expected: String,
        actual: usize,
    },
    /// Operand is not of the type the instruction expects.
    #[error("invalid operand {token} for {instruction}: expected {expected}")]
    InvalidOperand {
        instruction: String,
        token: String,
        expected: &'static str,
    },
    #[error("immediate {token} is outside [-{max}, {max}]")]
    ImmediateOutOfRange { token: String, max: i64 },
    #[error("invalid label declaration {token}")]
    InvalidLabel { token: String },
    #[error("label {label} is already defined")]
    DuplicateLabel { label: String },
    #[error("label {label} is not defined")]
    UndefinedLabel { label: String },
    #[error("program has {actual} instructions, the maximum is {max}")]
    CodeTooBig { actual: usize, max: usize },
}

impl DecodeErrorKind {
    /// Stable name of the error class.
    pub const fn kind(&self) -> &'static str {
        match self {
            DecodeErrorKind::Macro(e) => match e {
                PreprocessError::UnterminatedDefine { .. } => "UnterminatedDefine",
                PreprocessError::UndefinedMacro { .. } => "UndefinedMacro",
                PreprocessError::MacroRedefinition { .. } => "MacroRedefinition",
                PreprocessError::InvalidMacro { .. } => "InvalidMacro",
                PreprocessError::StrayEnddefine => "StrayEnddefine",
            },
            DecodeErrorKind::UnknownOpcode { .. } => "UnknownOpcode",
            DecodeErrorKind::ArityMismatch { .. } => "ArityMismatch",
            DecodeErrorKind::InvalidOperand { .. } => "InvalidOperand",
            DecodeErrorKind::ImmediateOutOfRange { .. } => "ImmediateOutOfRange",
            DecodeErrorKind::InvalidLabel { .. } => "InvalidLabel",
            DecodeErrorKind::DuplicateLabel { .. } => "DuplicateLabel",
            DecodeErrorKind::UndefinedLabel { .. } => "UndefinedLabel",
            DecodeErrorKind::CodeTooBig { .. } => "CodeTooBig",
        }
    }
}

/// Decoding failure tied to the 1-based source line it came from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct DecodeError {
    pub line: usize,
    pub kind: DecodeErrorKind,
}

impl DecodeError {
    pub fn new(line: usize, kind: impl Into<DecodeErrorKind>) -> Self {
        Self {
            line,
            kind: kind.into(),
        }
    }
}

/// Which resource ceiling a session hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimit {
    StackDepth(usize),
    StepCount(u64),
    InputTimeout(std::time::Duration),
    RunTime(std::time::Duration),
}

impl std::fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceLimit::StackDepth(max) => write!(f, "stack depth exceeded {max}"),
            ResourceLimit::StepCount(max) => write!(f, "step count exceeded {max}"),
            ResourceLimit::InputTimeout(d) => {
                write!(f, "no input received within {} seconds", d.as_secs_f64())
            }
            ResourceLimit::RunTime(d) => {
                write!(f, "run time exceeded {} seconds", d.as_secs_f64())
            }
        }
    }
}

/// Runtime faults. Raising one ends the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("cannot pop from empty stack (instruction {ip})")]
    StackUnderflow { ip: usize },
    #[error("division by zero (instruction {ip})")]
    DivisionByZero { ip: usize },
    #[error("register r{index} out of range, machine has {available} registers")]
    InvalidRegister { index: u8, available: usize },
    #[error("jump target {target} outside program of {len} instructions")]
    InvalidJumpTarget { target: usize, len: usize },
    #[error("value exceeded {max} (instruction {ip})")]
    ValueOverflow { ip: usize, max: i64 },
    #[error("input {input:?} is not an integer within [-{max}, {max}]")]
    InvalidInput { input: String, max: i64 },
    #[error("input supplied while the machine was not waiting for it")]
    UnexpectedInput,
    #[error("{0}")]
    ResourceLimitExceeded(ResourceLimit),
}

impl Fault {
    /// Stable name of the fault class.
    pub const fn kind(&self) -> &'static str {
        match self {
            Fault::StackUnderflow { .. } => "StackUnderflow",
            Fault::DivisionByZero { .. } => "DivisionByZero",
            Fault::InvalidRegister { .. } => "InvalidRegister",
            Fault::InvalidJumpTarget { .. } => "InvalidJumpTarget",
            Fault::ValueOverflow { .. } => "ValueOverflow",
            Fault::InvalidInput { .. } => "InvalidInput",
            Fault::UnexpectedInput => "UnexpectedInput",
            Fault::ResourceLimitExceeded(_) => "ResourceLimitExceeded",
        }
    }
}
