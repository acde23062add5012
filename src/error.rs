//! Error taxonomy for the compile-and-run session
//!
//! A failed compilation is not an error here: it is reported through
//! `CompileResult` and forwarded to the client verbatim.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaygroundError {
    /// The compiler or the compiled binary could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unexpected channel message
    #[error("malformed channel message: {0}")]
    Protocol(String),

    /// Artifact deletion failed for a reason other than "not found"
    #[error("failed to delete artifact {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlaygroundError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        PlaygroundError::Spawn {
            program: program.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for PlaygroundError {
    fn from(e: serde_json::Error) -> Self {
        PlaygroundError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_names_program() {
        let err = PlaygroundError::spawn(
            "g++",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.to_string(), "failed to start g++: no such file");
    }

    #[test]
    fn test_protocol_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PlaygroundError = json_err.into();
        assert!(matches!(err, PlaygroundError::Protocol(_)));
    }
}
