//! Runner module - Execution supervisor
//!
//! Spawns a compiled program with piped standard streams and streams what it
//! prints back as [`RunEvent`]s while it runs:
//! - stdout and stderr chunks are forwarded as soon as they are read
//! - a single `Exited` event follows once both streams are drained
//! - output is buffered up to a fixed number of chunks, after which the
//!   program blocks on its own pipe until the consumer catches up
//!
//! The runner does NOT:
//! - Limit CPU time or memory
//! - Decide when the program wants input (see `heuristic`)

pub mod group;
pub mod process;

use std::time::Duration;

pub use process::RunningProcess;

/// Something observed on a running program
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Chunk read from standard output
    Stdout(String),
    /// Chunk read from standard error
    Stderr(String),
    /// The program exited on its own
    Exited(ExitReport),
}

/// How and when a program exited
#[derive(Debug, Clone, PartialEq)]
pub struct ExitReport {
    /// Wall-clock time from spawn to exit
    pub elapsed: Duration,
    /// Exit code, None when terminated by a signal
    pub code: Option<i32>,
}

impl ExitReport {
    /// Elapsed seconds with two decimals, e.g. "0.42"
    pub fn timer(&self) -> String {
        format!("{:.2}", self.elapsed.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_format() {
        let report = ExitReport {
            elapsed: Duration::from_millis(1234),
            code: Some(0),
        };
        assert_eq!(report.timer(), "1.23");

        let instant = ExitReport {
            elapsed: Duration::ZERO,
            code: None,
        };
        assert_eq!(instant.timer(), "0.00");
    }
}
