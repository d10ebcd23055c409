//! Keep-alive multiplexing for long-lived SSE responses.
//!
//! A chat turn can sit silent for minutes while a tool runs or the CLI
//! thinks, and proxies drop idle connections. [`multiplex`] wraps any stream
//! and interleaves [`Pulse::Heartbeat`]s during silence, ending with a single
//! [`Pulse::Timeout`] once silence exceeds `max_silence`.
//!
//! Two producers feed one queue: a forwarder draining the wrapped stream and
//! a timer watching for silence. Both are tied to the returned stream and
//! never outlive it.

use std::time::Duration;

use ba_core::config::HeartbeatSettings;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Silence before the first heartbeat.
    pub initial_delay: Duration,
    /// Silence between subsequent heartbeats.
    pub interval: Duration,
    /// Silence (no data) after which the stream is abandoned.
    pub max_silence: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from(&HeartbeatSettings::default())
    }
}

impl From<&HeartbeatSettings> for HeartbeatConfig {
    fn from(s: &HeartbeatSettings) -> Self {
        Self {
            initial_delay: Duration::from_secs(s.initial_delay_secs),
            interval: Duration::from_secs(s.interval_secs),
            max_silence: Duration::from_secs(s.max_silence_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pulse<T> {
    Data(T),
    Heartbeat,
    /// Terminal. Nothing follows it.
    Timeout,
}

enum Signal<T> {
    Data(T),
    Heartbeat,
    Timeout,
    Finished,
}

/// Wrap `upstream` with heartbeats and a silence timeout.
///
/// Lazy: the producers start on first poll. Must be polled inside a Tokio
/// runtime.
pub fn multiplex<S>(upstream: S, config: HeartbeatConfig) -> impl Stream<Item = Pulse<S::Item>> + Send
where
    S: Stream + Send + 'static,
    S::Item: Send + 'static,
{
    async_stream::stream! {
        let (tx, mut rx) = mpsc::channel::<Signal<S::Item>>(32);
        let (activity_tx, activity_rx) = watch::channel(Instant::now());

        let mut producers = Producers {
            forward: tokio::spawn(forward(upstream, tx.clone(), activity_tx)),
            timer: tokio::spawn(timer(config, tx, activity_rx)),
        };

        while let Some(signal) = rx.recv().await {
            match signal {
                Signal::Data(item) => yield Pulse::Data(item),
                Signal::Heartbeat => yield Pulse::Heartbeat,
                Signal::Timeout => {
                    tracing::warn!(
                        max_silence_secs = config.max_silence.as_secs(),
                        "response timed out waiting for upstream"
                    );
                    producers.shutdown().await;
                    yield Pulse::Timeout;
                    return;
                }
                Signal::Finished => break,
            }
        }
        producers.shutdown().await;
    }
}

async fn forward<S>(upstream: S, tx: mpsc::Sender<Signal<S::Item>>, activity: watch::Sender<Instant>)
where
    S: Stream,
{
    let mut upstream = std::pin::pin!(upstream);
    while let Some(item) = upstream.next().await {
        activity.send_replace(Instant::now());
        if tx.send(Signal::Data(item)).await.is_err() {
            return;
        }
    }
    let _ = tx.send(Signal::Finished).await;
}

async fn timer<T>(config: HeartbeatConfig, tx: mpsc::Sender<Signal<T>>, mut activity: watch::Receiver<Instant>) {
    let mut last_data = *activity.borrow_and_update();
    let mut last_beat: Option<Instant> = None;
    loop {
        let next_beat = match last_beat {
            Some(beat) if beat > last_data => beat + config.interval,
            _ => last_data + config.initial_delay,
        };
        let deadline = last_data + config.max_silence;

        tokio::select! {
            changed = activity.changed() => {
                if changed.is_err() {
                    return;
                }
                last_data = *activity.borrow_and_update();
            }
            _ = sleep_until(next_beat.min(deadline)) => {
                // Data arriving at the same instant wins over a heartbeat.
                tokio::task::yield_now().await;
                if activity.has_changed().unwrap_or(false) {
                    continue;
                }
                let now = Instant::now();
                if now >= deadline {
                    let _ = tx.send(Signal::Timeout).await;
                    return;
                }
                if tx.send(Signal::Heartbeat).await.is_err() {
                    return;
                }
                last_beat = Some(now);
            }
        }
    }
}

/// Both producer tasks. Dropping aborts them; [`shutdown`](Self::shutdown)
/// also waits for them to finish.
struct Producers {
    forward: JoinHandle<()>,
    timer: JoinHandle<()>,
}

impl Producers {
    async fn shutdown(&mut self) {
        self.forward.abort();
        self.timer.abort();
        let _ = (&mut self.forward).await;
        let _ = (&mut self.timer).await;
    }
}

impl Drop for Producers {
    fn drop(&mut self) {
        self.forward.abort();
        self.timer.abort();
    }
}
