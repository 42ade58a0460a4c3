//! Wall-clock timing of a parallel run
//!
//! The measured time is informational: it is reported after the run
//! completes and never changes what the run returns.

use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Where the timing line of a run is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingReport {
    /// Write `Parallel execution time: <N> microseconds` to the output
    /// channel (stdout unless the caller supplies a writer)
    #[default]
    Stdout,

    /// Emit the elapsed time as a `tracing` info event
    Log,

    /// Measure but do not report
    Silent,
}

impl TimingReport {
    /// Report `elapsed` on this channel, writing the `Stdout` line to `out`
    ///
    /// A failed write is logged and otherwise ignored.
    pub fn emit_to<W: Write>(self, out: &mut W, elapsed: Elapsed) {
        match self {
            TimingReport::Stdout => {
                if let Err(err) = writeln!(out, "{}", elapsed).and_then(|()| out.flush()) {
                    warn!(error = %err, "failed to write timing line");
                }
            }
            TimingReport::Log => info!(micros = elapsed.as_micros(), "parallel execution complete"),
            TimingReport::Silent => {}
        }
    }
}

/// Elapsed wall-clock time of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Elapsed(pub Duration);

impl Elapsed {
    /// Whole microseconds elapsed
    pub fn as_micros(&self) -> u128 {
        self.0.as_micros()
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parallel execution time: {} microseconds", self.as_micros())
    }
}

/// Run `f` and return its result together with the time it took
pub fn timed<R>(f: impl FnOnce() -> R) -> (R, Elapsed) {
    let start = Instant::now();
    let result = f();
    (result, Elapsed(start.elapsed()))
}
