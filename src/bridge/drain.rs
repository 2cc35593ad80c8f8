//! Rate-limited drain loop.
//!
//! Once per tick the loop pops up to `max_fragments_per_tick` fragments from
//! the relay queue, joins them into one batch and hands the batch to the
//! gateway event loop. It runs on its own thread and never waits on gateway
//! I/O: a hand-off is a channel send.

use std::io;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::queue::RelayQueue;
use crate::common::{DrainBatch, GatewayTask};

/// Time between drain ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on fragments folded into one batch.
pub const MAX_FRAGMENTS_PER_TICK: usize = 5;

/// Drain loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSettings {
    pub tick_interval: Duration,
    pub max_fragments_per_tick: usize,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            tick_interval: TICK_INTERVAL,
            max_fragments_per_tick: MAX_FRAGMENTS_PER_TICK,
        }
    }
}

/// Pop up to `max` fragments and join them, each followed by a newline.
///
/// Returns `None` when nothing was queued, so no empty batch is ever built.
pub fn collect_batch(queue: &RelayQueue, max: usize) -> Option<DrainBatch> {
    let mut text = String::new();
    let mut fragments = 0;

    while fragments < max {
        let Some(fragment) = queue.pop_front() else {
            break;
        };
        text.push_str(&fragment.text);
        text.push('\n');
        fragments += 1;
    }

    (fragments > 0).then_some(DrainBatch { text, fragments })
}

/// Handle to a running drain loop thread.
///
/// Stopping is cooperative: the thread finishes the tick in progress and
/// exits before starting another. Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct DrainLoop {
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DrainLoop {
    /// Spawn the drain thread.
    pub fn spawn(
        queue: RelayQueue,
        settings: DrainSettings,
        tasks: mpsc::UnboundedSender<GatewayTask>,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = std_mpsc::channel();

        let handle = thread::Builder::new()
            .name("relay-drain".to_string())
            .spawn(move || run(queue, settings, tasks, stop_rx))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the loop to stop. Does not wait for the thread.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The thread may already be gone if the gateway side closed.
            let _ = stop_tx.send(());
        }
    }

    /// Signal the loop to stop and wait for the thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Drain loop thread panicked");
            }
        }
    }
}

impl Drop for DrainLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    queue: RelayQueue,
    settings: DrainSettings,
    tasks: mpsc::UnboundedSender<GatewayTask>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    debug!(?settings, "Drain loop started");

    loop {
        match stop_rx.recv_timeout(settings.tick_interval) {
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        if let Some(batch) = collect_batch(&queue, settings.max_fragments_per_tick) {
            debug!(fragments = batch.fragments, "Handing off drain batch");
            if tasks.send(GatewayTask::Deliver(batch)).is_err() {
                warn!("Gateway task channel closed, stopping drain loop");
                break;
            }
        }
    }

    let discarded = queue.clear();
    let overflowed = queue.dropped();
    if discarded > 0 || overflowed > 0 {
        info!(
            discarded,
            overflowed, "Drain loop stopped, some fragments were never delivered"
        );
    } else {
        debug!("Drain loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ChatFragment;

    fn queue_with(texts: &[&str]) -> RelayQueue {
        let queue = RelayQueue::new();
        for text in texts {
            queue.push(ChatFragment::new(*text));
        }
        queue
    }

    fn fast_settings() -> DrainSettings {
        DrainSettings {
            tick_interval: Duration::from_millis(10),
            max_fragments_per_tick: MAX_FRAGMENTS_PER_TICK,
        }
    }

    #[test]
    fn test_batch_takes_first_five() {
        let queue = queue_with(&["a", "b", "c", "d", "e", "f", "g"]);

        let batch = collect_batch(&queue, MAX_FRAGMENTS_PER_TICK).unwrap();
        assert_eq!(batch.text, "a\nb\nc\nd\ne\n");
        assert_eq!(batch.fragments, 5);

        let rest: Vec<String> = std::iter::from_fn(|| queue.pop_front())
            .map(|f| f.text)
            .collect();
        assert_eq!(rest, vec!["f", "g"]);
    }

    #[test]
    fn test_batch_stops_early_on_empty() {
        let queue = queue_with(&["only"]);
        let batch = collect_batch(&queue, MAX_FRAGMENTS_PER_TICK).unwrap();
        assert_eq!(batch.text, "only\n");
        assert_eq!(batch.fragments, 1);
    }

    #[test]
    fn test_empty_queue_builds_no_batch() {
        assert_eq!(collect_batch(&RelayQueue::new(), MAX_FRAGMENTS_PER_TICK), None);
    }

    #[test]
    fn test_loop_delivers_in_bounded_batches() {
        let texts: Vec<String> = (0..12).map(|i| format!("m{}", i)).collect();
        let queue = RelayQueue::new();
        for text in &texts {
            queue.push(ChatFragment::new(text.clone()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let drain = DrainLoop::spawn(queue.clone(), fast_settings(), tx).unwrap();

        let mut delivered = Vec::new();
        while delivered.len() < texts.len() {
            match rx.blocking_recv() {
                Some(GatewayTask::Deliver(batch)) => {
                    assert!(batch.fragments <= MAX_FRAGMENTS_PER_TICK);
                    assert!(!batch.text.is_empty());
                    delivered.extend(batch.text.lines().map(str::to_string));
                }
                other => panic!("unexpected task: {:?}", other),
            }
        }
        drain.join();

        assert_eq!(delivered, texts);
    }

    #[test]
    fn test_idle_loop_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let drain = DrainLoop::spawn(RelayQueue::new(), fast_settings(), tx).unwrap();

        thread::sleep(Duration::from_millis(60));
        drain.join();

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stop_drops_remaining_fragments() {
        let queue = RelayQueue::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let settings = DrainSettings {
            tick_interval: Duration::from_secs(60),
            max_fragments_per_tick: MAX_FRAGMENTS_PER_TICK,
        };
        let drain = DrainLoop::spawn(queue.clone(), settings, tx).unwrap();

        queue.push(ChatFragment::new("never sent"));
        drain.join();

        assert!(queue.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
