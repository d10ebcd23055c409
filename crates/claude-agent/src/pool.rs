//! Warm pool of pre-spawned CLI processes.
//!
//! Cold-starting the CLI (process creation, runtime init, auth check) costs
//! a few hundred milliseconds; popping an idle process off a queue costs
//! nothing. The pool keeps `size` processes waiting with stdin open, hands
//! them out on [`acquire`](ProcessPool::acquire), and tops itself back up
//! from a background refill task.
//!
//! The pool is an owned value. Whoever constructs it calls
//! [`start`](ProcessPool::start) and [`stop`](ProcessPool::stop).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::process::ClaudeProcess;
use crate::types::QueryOptions;
use crate::Result;

// ─── Spawner ──────────────────────────────────────────────────────────────

/// Produces one fresh, prompt-less process.
pub trait Spawner: Send + Sync + 'static {
    fn spawn(&self) -> Result<ClaudeProcess>;
}

impl<F> Spawner for F
where
    F: Fn() -> Result<ClaudeProcess> + Send + Sync + 'static,
{
    fn spawn(&self) -> Result<ClaudeProcess> {
        self()
    }
}

/// Spawns the real CLI with fixed options.
#[derive(Debug, Clone)]
pub struct CliSpawner {
    opts: QueryOptions,
}

impl CliSpawner {
    pub fn new(opts: QueryOptions) -> Self {
        Self { opts }
    }
}

impl Spawner for CliSpawner {
    fn spawn(&self) -> Result<ClaudeProcess> {
        ClaudeProcess::spawn(&self.opts)
    }
}

// ─── ProcessPool ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub refill_interval: Duration,
    /// How long a process gets to exit after stdin closes before it is killed.
    pub terminate_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            refill_interval: Duration::from_millis(500),
            terminate_timeout: Duration::from_secs(2),
        }
    }
}

pub struct ProcessPool {
    inner: Arc<PoolInner>,
    refill: Mutex<Option<JoinHandle<()>>>,
}

struct PoolInner {
    spawner: Box<dyn Spawner>,
    options: PoolOptions,
    /// Idle processes. Never held across an await.
    idle: Mutex<VecDeque<ClaudeProcess>>,
    target: AtomicUsize,
    stopped: AtomicBool,
}

impl ProcessPool {
    pub fn new(spawner: impl Spawner, options: PoolOptions) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                spawner: Box::new(spawner),
                options,
                idle: Mutex::new(VecDeque::new()),
                target: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
            }),
            refill: Mutex::new(None),
        }
    }

    /// Spawn up to `size` warm processes and start the refill loop.
    ///
    /// Spawn failures are logged and leave the pool smaller; callers fall
    /// back to cold spawns. Must be called from within a Tokio runtime.
    pub fn start(&self, size: usize) {
        self.inner.target.store(size, Ordering::SeqCst);
        self.inner.stopped.store(false, Ordering::SeqCst);
        let spawned = self.inner.fill();
        tracing::info!(requested = size, spawned, "process pool started");

        let inner = Arc::clone(&self.inner);
        let period = inner.options.refill_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if inner.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let spawned = inner.fill();
                if spawned > 0 {
                    tracing::debug!(spawned, "process pool refilled");
                }
            }
        });

        let mut slot = self.refill.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Take a ready process. Never waits on the pool: an empty pool, or an
    /// idle process that has died, falls back to a synchronous cold spawn.
    ///
    /// Only fails when the cold spawn itself fails.
    pub fn acquire(&self) -> Result<ClaudeProcess> {
        loop {
            let next = self.inner.lock_idle().pop_front();
            match next {
                Some(mut process) => {
                    if process.is_alive() {
                        tracing::debug!(pid = ?process.id(), "acquired warm process");
                        return Ok(process);
                    }
                    tracing::warn!("discarding dead pooled process");
                }
                None => break,
            }
        }
        tracing::debug!("pool empty, cold-spawning");
        self.inner.spawner.spawn()
    }

    /// Number of processes waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.inner.lock_idle().len()
    }

    pub fn target_size(&self) -> usize {
        self.inner.target.load(Ordering::SeqCst)
    }

    /// Cancel the refill loop, then terminate every idle process
    /// (close stdin, wait, kill).
    pub async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let handle = self
            .refill
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        let drained: Vec<ClaudeProcess> = self.inner.lock_idle().drain(..).collect();
        let count = drained.len();
        let grace = self.inner.options.terminate_timeout;
        futures::future::join_all(drained.into_iter().map(|mut p| async move {
            p.terminate(grace).await;
        }))
        .await;
        tracing::info!(terminated = count, "process pool stopped");
    }
}

impl PoolInner {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, VecDeque<ClaudeProcess>> {
        self.idle.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Spawn until the pool reaches its target. Returns how many were added.
    fn fill(&self) -> usize {
        let mut spawned = 0;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            let missing = self
                .target
                .load(Ordering::SeqCst)
                .saturating_sub(self.lock_idle().len());
            if missing == 0 {
                break;
            }
            match self.spawner.spawn() {
                Ok(process) => {
                    self.lock_idle().push_back(process);
                    spawned += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to spawn pooled process");
                    break;
                }
            }
        }
        spawned
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        if let Some(handle) = self
            .refill
            .get_mut()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPool")
            .field("idle", &self.idle_count())
            .field("target", &self.target_size())
            .finish()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClaudeAgentError;
    use tokio::process::Command;

    /// Spawner running `program args…` and counting invocations.
    struct Counting {
        program: &'static str,
        args: Vec<&'static str>,
        count: Arc<AtomicUsize>,
        pids: Arc<Mutex<Vec<u32>>>,
    }

    impl Counting {
        fn new(program: &'static str, args: &[&'static str]) -> Self {
            Self {
                program,
                args: args.to_vec(),
                count: Arc::new(AtomicUsize::new(0)),
                pids: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Spawner for Counting {
        fn spawn(&self) -> Result<ClaudeProcess> {
            self.count.fetch_add(1, Ordering::SeqCst);
            let mut cmd = Command::new(self.program);
            cmd.args(&self.args);
            let process = ClaudeProcess::from_command(cmd)?;
            if let Some(pid) = process.id() {
                self.pids.lock().unwrap().push(pid);
            }
            Ok(process)
        }
    }

    fn slow_refill() -> PoolOptions {
        PoolOptions {
            refill_interval: Duration::from_secs(3600),
            terminate_timeout: Duration::from_millis(100),
        }
    }

    fn pid_exists(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn warm_acquires_do_not_spawn() {
        let spawner = Counting::new("cat", &[]);
        let count = Arc::clone(&spawner.count);
        let pool = ProcessPool::new(spawner, slow_refill());
        pool.start(3);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(pool.acquire().unwrap());
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        held.push(pool.acquire().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 4);

        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_terminates_every_pooled_process() {
        // `cat` exits on stdin close; `sleep` needs the kill escalation.
        for (program, args) in [("cat", vec![]), ("sleep", vec!["30"])] {
            let spawner = Counting::new(program, &args);
            let pids = Arc::clone(&spawner.pids);
            let pool = ProcessPool::new(spawner, slow_refill());
            pool.start(2);
            assert_eq!(pool.idle_count(), 2);

            pool.stop().await;
            assert_eq!(pool.idle_count(), 0);
            for pid in pids.lock().unwrap().iter() {
                assert!(!pid_exists(*pid), "{program} pid {pid} still running");
            }
        }
    }

    #[tokio::test]
    async fn dead_idle_process_is_replaced_on_acquire() {
        let spawner = Counting::new("true", &[]);
        let count = Arc::clone(&spawner.count);
        let pool = ProcessPool::new(spawner, slow_refill());
        pool.start(1);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let _process = pool.acquire().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        pool.stop().await;
    }

    #[tokio::test]
    async fn refill_loop_tops_the_pool_back_up() {
        let spawner = Counting::new("cat", &[]);
        let count = Arc::clone(&spawner.count);
        let pool = ProcessPool::new(
            spawner,
            PoolOptions {
                refill_interval: Duration::from_millis(20),
                terminate_timeout: Duration::from_millis(100),
            },
        );
        pool.start(2);
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.idle_count(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 4);
        pool.stop().await;
    }

    #[tokio::test]
    async fn spawn_failures_shrink_the_pool_without_failing() {
        let pool = ProcessPool::new(
            || -> Result<ClaudeProcess> { Err(ClaudeAgentError::Process("no binary".into())) },
            slow_refill(),
        );
        pool.start(2);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.target_size(), 2);
        assert!(pool.acquire().is_err());
        pool.stop().await;
    }

    #[tokio::test]
    async fn stopped_pool_does_not_refill() {
        let spawner = Counting::new("cat", &[]);
        let count = Arc::clone(&spawner.count);
        let pool = ProcessPool::new(
            spawner,
            PoolOptions {
                refill_interval: Duration::from_millis(10),
                terminate_timeout: Duration::from_millis(100),
            },
        );
        pool.start(1);
        pool.stop().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 0);
    }
}
