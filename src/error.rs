use thiserror::Error;
use crate::expr::TimeLevel;




/**
 * Failures of the code generation pipeline. Every stage is a deterministic
 * transformation, so none of these are retried; they propagate to the caller,
 * which decides whether to abandon the problem or skip one block.
 */
#[derive(Error, Debug)]
pub enum Error {
    #[error("free indices of left-hand side {lhs:?} do not match right-hand side {rhs:?} in {equation}")]
    IndexMismatch {
        equation: String,
        lhs: Vec<String>,
        rhs: Vec<String>,
    },

    #[error("invalid index usage in {term}: {reason}")]
    InvalidIndexUsage { term: String, reason: String },

    #[error("no {role} scheme is bound{}", .direction.map(|d| format!(" for direction {}", d)).unwrap_or_default())]
    UnsupportedScheme {
        role: &'static str,
        direction: Option<usize>,
    },

    #[error("derivative {derivative} cannot be resolved: {reason}")]
    UnresolvedDerivative { derivative: String, reason: String },

    #[error("cyclic kernel dependency: kernel '{kernel}' reads {field} at offset {offset:?} ({level}) written by a kernel that depends on it")]
    CyclicKernelDependency {
        kernel: String,
        field: String,
        offset: Vec<i64>,
        level: TimeLevel,
    },

    #[error("grid of block {block} has {found} dimensions, but the problem has {expected}")]
    DimensionMismatch {
        block: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid equation {equation}: {reason}")]
    InvalidEquation { equation: String, reason: String },

    #[error("coefficient in {expression} does not fit in 128 bits")]
    CoefficientOverflow { expression: String },

    #[error("parse error at byte {position} of '{input}': {message}")]
    Parse {
        input: String,
        position: usize,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
