//! Parallel loop execution over a partitioned range
//!
//! Every chunk but the last gets its own scoped worker thread; the last
//! chunk runs on the calling thread, which then waits for the others. At
//! most `chunks - 1` threads are created per call and none outlive it.
//!
//! # Callback contract
//!
//! The callback is shared by reference between all workers and may be
//! called concurrently, always with distinct indices. The partitioning
//! itself never hands the same index to two workers; any shared state the
//! callback touches beyond its index is its own responsibility, which is
//! why it must be `Sync`.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicI64, Ordering};
//!
//! let sum = AtomicI64::new(0);
//! parfor::parallel_for(0, 100, |i| {
//!     sum.fetch_add(i, Ordering::Relaxed);
//! }, 4).unwrap();
//! assert_eq!(sum.load(Ordering::Relaxed), 4950);
//! ```

use crate::chunks::{partition, partition_2d, Chunk, GridChunk};
use crate::config::{ForConfig, SpawnPolicy};
use crate::error::ForError;
use crate::sync::{join_all, WorkerHandle};
use crate::timer::{timed, Elapsed};
use std::io::{self, Write};
use std::thread::{self, Scope, ScopedJoinHandle};
use tracing::{debug, trace, warn};

/// Outcome of a successful run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Number of chunks the range was split into
    pub chunks: usize,

    /// Number of worker threads started (at most `chunks - 1`)
    pub workers_spawned: usize,

    /// Chunks that ran on the calling thread because their worker could
    /// not be started (only with [`SpawnPolicy::RunInline`])
    pub inline_fallbacks: usize,

    /// Wall-clock time of dispatch and join
    pub elapsed: Elapsed,
}

/// Runs parallel loops with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ForConfig,
}

impl Executor {
    pub fn new(config: ForConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForConfig {
        &self.config
    }

    /// Call `f(i)` once for every `i` in `[low, high)`
    ///
    /// The timing line goes to stdout.
    ///
    /// # Errors
    ///
    /// Argument errors are returned before any work starts. Spawn and
    /// worker failures are returned after every started worker is joined.
    pub fn run<F>(&self, low: i64, high: i64, f: F) -> Result<RunReport, ForError>
    where
        F: Fn(i64) + Sync,
    {
        self.run_to(&mut io::stdout(), low, high, f)
    }

    /// As [`Executor::run`], writing the timing line to `out`
    pub fn run_to<O, F>(
        &self,
        out: &mut O,
        low: i64,
        high: i64,
        f: F,
    ) -> Result<RunReport, ForError>
    where
        O: Write,
        F: Fn(i64) + Sync,
    {
        let plan = partition(low, high, self.config.num_threads)?;
        debug!(low, high, chunks = plan.num_chunks(), "running 1D loop");

        self.execute(out, &plan.chunks, |chunk: &Chunk| {
            for i in chunk.indices() {
                f(i);
            }
        })
    }

    /// Call `f(i, j)` once for every pair of `[low1, high1) x [low2, high2)`
    ///
    /// Only the outer range is split between workers; each worker runs the
    /// whole inner range for every outer index it owns. The timing line goes
    /// to stdout.
    pub fn run_2d<F>(
        &self,
        low1: i64,
        high1: i64,
        low2: i64,
        high2: i64,
        f: F,
    ) -> Result<RunReport, ForError>
    where
        F: Fn(i64, i64) + Sync,
    {
        self.run_2d_to(&mut io::stdout(), low1, high1, low2, high2, f)
    }

    /// As [`Executor::run_2d`], writing the timing line to `out`
    pub fn run_2d_to<O, F>(
        &self,
        out: &mut O,
        low1: i64,
        high1: i64,
        low2: i64,
        high2: i64,
        f: F,
    ) -> Result<RunReport, ForError>
    where
        O: Write,
        F: Fn(i64, i64) + Sync,
    {
        let plan = partition_2d(low1, high1, low2, high2, self.config.num_threads)?;
        debug!(
            low1,
            high1,
            low2,
            high2,
            chunks = plan.num_chunks(),
            "running 2D loop"
        );

        self.execute(out, &plan.chunks, |chunk: &GridChunk| {
            for i in chunk.outer.indices() {
                for j in chunk.inner.indices() {
                    f(i, j);
                }
            }
        })
    }

    /// Time the dispatch of `chunks` and report it
    fn execute<O, C, W>(
        &self,
        out: &mut O,
        chunks: &[C],
        work: W,
    ) -> Result<RunReport, ForError>
    where
        O: Write,
        C: Sync,
        W: Fn(&C) + Sync,
    {
        let (outcome, elapsed) = timed(|| self.dispatch(chunks, &work));
        let (workers_spawned, inline_fallbacks) = outcome?;

        self.config.report.emit_to(out, elapsed);
        Ok(RunReport {
            chunks: chunks.len(),
            workers_spawned,
            inline_fallbacks,
            elapsed,
        })
    }

    /// Run all chunks, returning `(workers_spawned, inline_fallbacks)`
    fn dispatch<C, W>(&self, chunks: &[C], work: &W) -> Result<(usize, usize), ForError>
    where
        C: Sync,
        W: Fn(&C) + Sync,
    {
        let Some((own, rest)) = chunks.split_last() else {
            return Ok((0, 0));
        };

        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(rest.len());
            let mut inline_fallbacks = 0;
            let mut spawn_error = None;

            for (worker, chunk) in rest.iter().enumerate() {
                match self.spawn_worker(scope, worker, move || work(chunk)) {
                    Ok(handle) => {
                        trace!(worker, "worker spawned");
                        workers.push(WorkerHandle::new(worker, handle));
                    }
                    Err(source) => match self.config.spawn_policy {
                        SpawnPolicy::RunInline => {
                            warn!(worker, error = %source, "spawn failed, running chunk inline");
                            inline_fallbacks += 1;
                            work(chunk);
                        }
                        SpawnPolicy::Abort => {
                            warn!(worker, error = %source, "spawn failed, aborting run");
                            spawn_error = Some(ForError::WorkerSpawn { worker, source });
                            break;
                        }
                    },
                }
            }

            let spawned = workers.len();
            if spawn_error.is_none() {
                work(own);
            }

            let joined = join_all(workers);
            match spawn_error {
                Some(err) => Err(err),
                None => joined.map(|()| (spawned, inline_fallbacks)),
            }
        })
    }

    fn spawn_worker<'scope, 'env, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        worker: usize,
        f: F,
    ) -> io::Result<ScopedJoinHandle<'scope, ()>>
    where
        F: FnOnce() + Send + 'scope,
    {
        #[cfg(test)]
        fault::check(worker)?;

        thread::Builder::new()
            .name(format!("{}-{}", self.config.thread_name, worker))
            .spawn_scoped(scope, f)
    }
}

/// Call `f(i)` once for every `i` in `[low, high)` using up to
/// `num_threads` threads, the calling thread included
///
/// Prints `Parallel execution time: <N> microseconds` when done.
///
/// # Errors
///
/// * [`ForError::InvalidThreadCount`] if `num_threads` is 0
/// * [`ForError::InvalidRange`] if `high < low`
/// * [`ForError::WorkerSpawn`] if a worker thread could not be started
/// * [`ForError::WorkerPanicked`] if a worker panicked
pub fn parallel_for<F>(low: i64, high: i64, f: F, num_threads: usize) -> Result<(), ForError>
where
    F: Fn(i64) + Sync,
{
    Executor::new(ForConfig::with_threads(num_threads))
        .run(low, high, f)
        .map(|_| ())
}

/// Call `f(i, j)` once for every pair of `[low1, high1) x [low2, high2)`
/// using up to `num_threads` threads, splitting only the outer range
///
/// Prints `Parallel execution time: <N> microseconds` when done. Errors are
/// as for [`parallel_for`], with either range checked.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let calls = AtomicUsize::new(0);
/// parfor::parallel_for_2d(0, 4, 0, 2, |_i, _j| {
///     calls.fetch_add(1, Ordering::Relaxed);
/// }, 2).unwrap();
/// assert_eq!(calls.load(Ordering::Relaxed), 8);
/// ```
pub fn parallel_for_2d<F>(
    low1: i64,
    high1: i64,
    low2: i64,
    high2: i64,
    f: F,
    num_threads: usize,
) -> Result<(), ForError>
where
    F: Fn(i64, i64) + Sync,
{
    Executor::new(ForConfig::with_threads(num_threads))
        .run_2d(low1, high1, low2, high2, f)
        .map(|_| ())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimingReport;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn silent(num_threads: usize) -> Executor {
        Executor::new(ForConfig::with_threads(num_threads).report(TimingReport::Silent))
    }

    #[test]
    fn test_every_index_once() {
        let seen = Mutex::new(Vec::new());
        let report = silent(4)
            .run(0, 1000, |i| seen.lock().unwrap().push(i))
            .unwrap();

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
        assert_eq!(report.chunks, 4);
        assert_eq!(report.workers_spawned, 3);
        assert_eq!(report.inline_fallbacks, 0);
    }

    #[test]
    fn test_single_thread_runs_in_order_on_caller() {
        let caller = thread::current().id();
        let seen = Mutex::new(Vec::new());

        let report = silent(1)
            .run(3, 13, |i| {
                assert_eq!(thread::current().id(), caller);
                seen.lock().unwrap().push(i);
            })
            .unwrap();

        assert_eq!(seen.into_inner().unwrap(), (3..13).collect::<Vec<_>>());
        assert_eq!(report.chunks, 1);
        assert_eq!(report.workers_spawned, 0);
    }

    #[test]
    fn test_last_chunk_runs_on_caller() {
        let caller = thread::current().id();
        let on_caller = Mutex::new(Vec::new());

        silent(3)
            .run(0, 10, |i| {
                if thread::current().id() == caller {
                    on_caller.lock().unwrap().push(i);
                }
            })
            .unwrap();

        // Chunks are {0..4, 4..7, 7..10}; the caller owns the last one
        assert_eq!(on_caller.into_inner().unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_in_order_within_chunk() {
        let per_thread = Mutex::new(Vec::<(thread::ThreadId, i64)>::new());

        silent(4)
            .run(0, 400, |i| per_thread.lock().unwrap().push((thread::current().id(), i)))
            .unwrap();

        let log = per_thread.into_inner().unwrap();
        let threads: HashSet<_> = log.iter().map(|(t, _)| *t).collect();
        for t in threads {
            let indices: Vec<_> = log.iter().filter(|(id, _)| *id == t).map(|(_, i)| *i).collect();
            assert!(indices.windows(2).all(|w| w[1] == w[0] + 1));
        }
    }

    #[test]
    fn test_worker_threads_are_named() {
        let names = Mutex::new(HashSet::new());

        Executor::new(
            ForConfig::with_threads(3)
                .report(TimingReport::Silent)
                .thread_name("grid"),
        )
        .run(0, 3, |_| {
            if let Some(name) = thread::current().name() {
                names.lock().unwrap().insert(name.to_string());
            }
        })
        .unwrap();

        let names = names.into_inner().unwrap();
        assert!(names.contains("grid-0"));
        assert!(names.contains("grid-1"));
    }

    #[test]
    fn test_clamped_thread_count() {
        let calls = AtomicUsize::new(0);
        let report = silent(10)
            .run(0, 3, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.chunks, 3);
        assert_eq!(report.workers_spawned, 2);
    }

    #[test]
    fn test_empty_range_does_nothing() {
        let calls = AtomicUsize::new(0);
        let report = silent(4)
            .run(5, 5, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.chunks, 0);
        assert_eq!(report.workers_spawned, 0);
    }

    #[test]
    fn test_invalid_arguments_run_nothing() {
        let calls = AtomicUsize::new(0);
        let count = |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        };

        assert!(matches!(
            silent(0).run(0, 10, count),
            Err(ForError::InvalidThreadCount(0))
        ));
        assert!(matches!(
            silent(2).run(10, 0, count),
            Err(ForError::InvalidRange { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_2d_every_pair_once() {
        let seen = Mutex::new(Vec::new());
        let report = silent(2)
            .run_2d(0, 4, 0, 2, |i, j| seen.lock().unwrap().push((i, j)))
            .unwrap();

        let mut seen = seen.into_inner().unwrap();
        seen.sort_unstable();
        let expected: Vec<_> = (0..4).flat_map(|i| (0..2).map(move |j| (i, j))).collect();
        assert_eq!(seen, expected);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.workers_spawned, 1);
    }

    #[test]
    fn test_2d_inner_runs_whole_and_in_order() {
        let caller = thread::current().id();
        let on_caller = Mutex::new(Vec::new());

        silent(2)
            .run_2d(0, 4, 10, 13, |i, j| {
                if thread::current().id() == caller {
                    on_caller.lock().unwrap().push((i, j));
                }
            })
            .unwrap();

        assert_eq!(
            on_caller.into_inner().unwrap(),
            vec![(2, 10), (2, 11), (2, 12), (3, 10), (3, 11), (3, 12)]
        );
    }

    #[test]
    fn test_2d_empty_inner_spawns_nothing() {
        let calls = AtomicUsize::new(0);
        let report = silent(4)
            .run_2d(0, 100, 3, 3, |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.workers_spawned, 0);
    }

    #[test]
    fn test_worker_panic_is_an_error() {
        let result = silent(4).run(0, 8, |i| {
            if i == 0 {
                panic!("bad index {}", i);
            }
        });

        match result {
            Err(ForError::WorkerPanicked { worker, message }) => {
                assert_eq!(worker, 0);
                assert_eq!(message, "bad index 0");
            }
            other => panic!("expected WorkerPanicked, got {:?}", other),
        }
    }

    #[test]
    fn test_spawn_failure_aborts() {
        let calls = AtomicUsize::new(0);

        fault::fail_spawn_of(1);
        let result = silent(4).run(0, 8, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        fault::clear();

        match result {
            Err(ForError::WorkerSpawn { worker, source }) => {
                assert_eq!(worker, 1);
                assert_eq!(source.kind(), io::ErrorKind::WouldBlock);
            }
            other => panic!("expected WorkerSpawn, got {:?}", other),
        }
        // Only worker 0 was started; the caller skipped its own chunk
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_spawn_failure_runs_inline() {
        let caller = thread::current().id();
        let on_caller = Mutex::new(Vec::new());
        let calls = AtomicUsize::new(0);

        fault::fail_spawn_of(0);
        let result = Executor::new(
            ForConfig::with_threads(4)
                .report(TimingReport::Silent)
                .spawn_policy(SpawnPolicy::RunInline),
        )
        .run(0, 8, |i| {
            calls.fetch_add(1, Ordering::SeqCst);
            if thread::current().id() == caller {
                on_caller.lock().unwrap().push(i);
            }
        });
        fault::clear();

        let report = result.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(report.workers_spawned, 2);
        assert_eq!(report.inline_fallbacks, 1);

        let mut on_caller = on_caller.into_inner().unwrap();
        on_caller.sort_unstable();
        assert_eq!(on_caller, vec![0, 1, 6, 7]);
    }

    #[test]
    fn test_repeated_calls_cover_same_set() {
        let collect = || {
            let seen = Mutex::new(HashSet::new());
            silent(3)
                .run(-20, 20, |i| {
                    seen.lock().unwrap().insert(i);
                })
                .unwrap();
            seen.into_inner().unwrap()
        };

        assert_eq!(collect(), collect());
    }

    #[test]
    fn test_success_emits_one_timing_line() {
        let executor = Executor::new(ForConfig::with_threads(3));
        let mut out = Vec::new();

        let report = executor.run_to(&mut out, 0, 30, |_| {}).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], report.elapsed.to_string());
        assert!(lines[0].starts_with("Parallel execution time: "));
        assert!(lines[0].ends_with(" microseconds"));

        let mut out = Vec::new();
        let report = executor.run_2d_to(&mut out, 0, 4, 0, 2, |_, _| {}).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{}\n", report.elapsed)
        );
    }

    #[test]
    fn test_failed_run_emits_nothing() {
        let executor = Executor::new(ForConfig::with_threads(2));
        let mut out = Vec::new();

        assert!(executor.run_to(&mut out, 5, 1, |_| {}).is_err());
        assert!(executor
            .run_2d_to(&mut out, 0, 4, 0, 2, |i, _| {
                if i == 0 {
                    panic!("first chunk fails");
                }
            })
            .is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_silent_report_emits_nothing() {
        let mut out = Vec::new();
        silent(2).run_to(&mut out, 0, 10, |_| {}).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_free_functions() {
        let calls = AtomicUsize::new(0);
        parallel_for(
            0,
            10,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
            3,
        )
        .unwrap();
        parallel_for_2d(
            0,
            3,
            0,
            3,
            |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
            2,
        )
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 19);
        assert!(matches!(
            parallel_for(0, 10, |_| {}, 0),
            Err(ForError::InvalidThreadCount(0))
        ));
    }
}
