//! Run configuration

use crate::error::ForError;
use crate::timer::TimingReport;

/// Environment variable overriding the worker count
pub const ENV_NUM_THREADS: &str = "PARFOR_NUM_THREADS";

/// Environment variable selecting the timing report (`stdout`, `log`, `silent`)
pub const ENV_REPORT: &str = "PARFOR_REPORT";

/// What to do when the OS refuses to start a worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpawnPolicy {
    /// Stop spawning, skip the caller's own chunk, join the workers already
    /// started and return [`ForError::WorkerSpawn`]
    #[default]
    Abort,

    /// Run the refused chunk on the calling thread and keep going
    RunInline,
}

/// Configuration for a parallel loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForConfig {
    /// Requested number of workers, including the calling thread.
    /// Clamped to the iteration count at run time.
    pub num_threads: usize,

    /// Handling of thread creation failures
    pub spawn_policy: SpawnPolicy,

    /// Where the elapsed time is reported
    pub report: TimingReport,

    /// Prefix for worker thread names (`<prefix>-<index>`)
    pub thread_name: String,
}

impl Default for ForConfig {
    fn default() -> Self {
        Self::with_threads(
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        )
    }
}

impl ForConfig {
    /// Create a configuration with the given worker count
    ///
    /// Does not query the machine's parallelism.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            spawn_policy: SpawnPolicy::default(),
            report: TimingReport::default(),
            thread_name: "parfor".to_string(),
        }
    }

    pub fn spawn_policy(mut self, policy: SpawnPolicy) -> Self {
        self.spawn_policy = policy;
        self
    }

    pub fn report(mut self, report: TimingReport) -> Self {
        self.report = report;
        self
    }

    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Build a configuration from `PARFOR_NUM_THREADS` and `PARFOR_REPORT`
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ForError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ForError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_NUM_THREADS) {
            config.num_threads = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ForError::InvalidEnv {
                        var: ENV_NUM_THREADS,
                        value,
                    })
                }
            };
        }

        if let Some(value) = lookup(ENV_REPORT) {
            config.report = match value.trim().to_ascii_lowercase().as_str() {
                "stdout" => TimingReport::Stdout,
                "log" => TimingReport::Log,
                "silent" => TimingReport::Silent,
                _ => {
                    return Err(ForError::InvalidEnv {
                        var: ENV_REPORT,
                        value,
                    })
                }
            };
        }

        Ok(config)
    }
}
