//! Input-wait heuristic
//!
//! A running program never says that it is blocked on a read from stdin, so
//! the session guesses:
//! - Static pass: the source is scanned for input reads before running.
//! - Dynamic pass: once the program has been quiet for a short while after
//!   starting or after an output burst, the client is asked for input.
//!
//! An extra prompt is harmless (the client may ignore it) and a missed prompt
//! only delays things, since input is accepted at any time.

use anyhow::Context;
use regex::Regex;
use tokio::time::Instant;

use crate::config::ProbeConfig;

/// Static scan of submitted source for stdin reads
#[derive(Debug, Clone)]
pub struct InputDetector {
    patterns: Vec<Regex>,
}

impl InputDetector {
    pub fn new(patterns: &[String]) -> anyhow::Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid input pattern: {}", p)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// True when the source looks like it may read from standard input
    pub fn may_read_input(&self, source: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(source))
    }
}

/// Idle timer deciding when to emit an input request for one run
#[derive(Debug)]
pub struct InputProbe {
    config: ProbeConfig,
    enabled: bool,
    deadline: Option<Instant>,
    waiting: bool,
}

impl InputProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            enabled: false,
            deadline: None,
            waiting: false,
        }
    }

    /// Start tracking a new run. Nothing is ever armed when `enabled` is false.
    pub fn start(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.waiting = false;
        self.deadline = None;
        if enabled {
            self.deadline = Some(Instant::now() + self.config.initial_delay);
        }
    }

    /// Stop tracking; used when the run ends or is torn down
    pub fn stop(&mut self) {
        self.enabled = false;
        self.waiting = false;
        self.deadline = None;
    }

    /// Record an output burst.
    ///
    /// Returns true when the chunk itself asks for input (content sniffing is
    /// enabled and the chunk contains "Enter"); the caller should then prompt
    /// right away through [`InputProbe::fire`].
    pub fn on_output(&mut self, chunk: &str) -> bool {
        if !self.enabled || self.waiting {
            return false;
        }
        self.deadline = Some(Instant::now() + self.config.idle_delay);
        self.config.prompt_on_enter_text && chunk.contains("Enter")
    }

    /// Record that the client supplied a line of input
    pub fn on_input(&mut self) {
        self.waiting = false;
        if self.enabled {
            self.deadline = Some(Instant::now() + self.config.idle_delay);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Called when the deadline elapsed (or output asked for input).
    ///
    /// Returns true when an input request should be emitted now.
    pub fn fire(&mut self, process_alive: bool) -> bool {
        self.deadline = None;
        if !self.enabled || self.waiting || !process_alive {
            return false;
        }
        self.waiting = true;
        true
    }
}
