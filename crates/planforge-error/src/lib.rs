//! Error taxonomy shared by every crate in the workspace.
//!
//! Each variant is a distinct kind (not a string) per the propagation
//! policy: the core never swallows errors, and error kinds are never
//! blended together (a driver failure never surfaces as a `ConfigError`).

use std::fmt;
use std::path::PathBuf;

/// A location in a model source file, used to annotate `ConfigError`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub line: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path.display(), self.line)
    }
}

/// The single error type propagated out of the planning engine.
///
/// Surfaced to callers as-is; the core retries nothing itself (`EngineError`
/// retry decisions belong to the caller).
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// A malformed model or seed file. Never retried.
    #[error("{location}: {message}")]
    Config {
        location: SourceLocation,
        message: String,
    },

    /// Failure while evaluating the `@`-macro language.
    #[error("macro evaluation failed: {message}\n\ngenerated code:\n{generated}\n\noriginal sql:\n{original_sql}")]
    MacroEval {
        message: String,
        generated: String,
        original_sql: String,
    },

    /// A state-reader invariant was violated (e.g. a stored snapshot's
    /// fingerprint disagrees with its id). Fatal to the current plan.
    #[error("state invariant violated for snapshot {snapshot_id}: {message}")]
    State {
        snapshot_id: String,
        message: String,
    },

    /// Wraps an execution-backend failure. The caller decides whether to
    /// retry; the core never does.
    #[error("engine operation failed: {0}")]
    Engine(String),
}

impl PlanError {
    pub fn config(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        PlanError::Config {
            location: SourceLocation {
                path: path.into(),
                line,
            },
            message: message.into(),
        }
    }

    pub fn macro_eval(
        message: impl Into<String>,
        generated: impl Into<String>,
        original_sql: impl Into<String>,
    ) -> Self {
        PlanError::MacroEval {
            message: message.into(),
            generated: generated.into(),
            original_sql: original_sql.into(),
        }
    }

    pub fn state(snapshot_id: impl Into<String>, message: impl Into<String>) -> Self {
        PlanError::State {
            snapshot_id: snapshot_id.into(),
            message: message.into(),
        }
    }

    pub fn engine(message: impl fmt::Display) -> Self {
        PlanError::Engine(message.to_string())
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
