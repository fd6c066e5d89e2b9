//! Cross-thread progress reporting and cooperative cancellation.
//!
//! A worker (Scanner or Executor) pushes [`ProgressMessage`] values onto an
//! SPSC channel and writes one byte to a companion wake pipe so the UI's
//! event loop knows to drain it. Control flows the other way through a
//! small set of boolean latches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Minimum spacing between progress samples pushed by a worker.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// One advisory snapshot of counters, or the final outcome of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressMessage {
    Scan(ScanSample),
    CopyMove(CopyMoveSample),
    Delete(DeleteSample),
    Done(FinalResult),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSample {
    pub current: String,
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyMoveSample {
    pub cur_source: String,
    pub cur_target: String,
    pub cur_size: u64,
    pub cur_bytes: u64,
    pub cur_time: f64,
    pub files: u64,
    pub bytes: u64,
    pub time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteSample {
    pub current: String,
    pub files: u64,
    pub bytes: u64,
    pub time: f64,
}

/// One file-level outcome in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub file: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalResult {
    pub result: Vec<ReportEntry>,
    pub error: Vec<ReportEntry>,
    pub skipped: Vec<ReportEntry>,
    pub aborted: Vec<ReportEntry>,
}

/// Converts a scanner side-band (`scan_error`/`scan_skipped`, a list of
/// `(path, message)` pairs) into report entries for the final message.
pub fn entries_from_paths(list: &[(std::path::PathBuf, String)]) -> Vec<ReportEntry> {
    list.iter()
        .map(|(path, message)| ReportEntry {
            file: path.to_string_lossy().to_string(),
            message: message.clone(),
        })
        .collect()
}

/// The producer half, held by a worker thread.
#[derive(Clone)]
pub struct ProgressProducer {
    sender: Sender<ProgressMessage>,
    waker: Arc<dyn Fn() + Send + Sync>,
    last_push: Arc<std::sync::Mutex<Instant>>,
}

impl ProgressProducer {
    /// Pushes a message unconditionally and wakes the consumer. Used for
    /// the final [`FinalResult`], which must never be throttled away.
    pub fn push(&self, message: ProgressMessage) {
        let _ = self.sender.send(message);
        (self.waker)();
    }

    /// Pushes `message` only if at least [`SAMPLE_INTERVAL`] has elapsed
    /// since the last push, so rapid per-file progress doesn't flood the
    /// channel.
    pub fn push_throttled(&self, message: ProgressMessage) {
        let mut last = self.last_push.lock().unwrap_or_else(|e| e.into_inner());
        if last.elapsed() >= SAMPLE_INTERVAL {
            *last = Instant::now();
            drop(last);
            self.push(message);
        }
    }
}

/// The consumer half, held by the UI event loop.
pub struct ProgressConsumer {
    receiver: Receiver<ProgressMessage>,
}

impl ProgressConsumer {
    /// Drains every message currently queued without blocking.
    pub fn drain(&self) -> Vec<ProgressMessage> {
        self.receiver.try_iter().collect()
    }

    /// Blocks until the final message arrives, draining intermediate
    /// samples along the way. Used by non-interactive callers (tests, a
    /// headless `--printwd`-only invocation) that don't pump a UI loop.
    pub fn wait_for_final(&self) -> FinalResult {
        for message in self.receiver.iter() {
            if let ProgressMessage::Done(result) = message {
                return result;
            }
        }
        FinalResult::default()
    }
}

/// Builds a connected producer/consumer pair. `waker` is called once per
/// push; production code wires it to a self-pipe write, tests pass a no-op.
pub fn channel(waker: Arc<dyn Fn() + Send + Sync>) -> (ProgressProducer, ProgressConsumer) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (
        ProgressProducer {
            sender,
            waker,
            last_push: Arc::new(std::sync::Mutex::new(Instant::now() - SAMPLE_INTERVAL)),
        },
        ProgressConsumer { receiver },
    )
}

/// Cooperative control-flow signal, checked at every suspension point
/// inside a worker's main loop. Replaces the original's cancellation
/// exceptions with a plain enum so the worker's loop stays a `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    Abort,
    Skip,
    Interrupt,
}

/// The set of cooperative latches shared between a worker and the UI.
#[derive(Debug, Default)]
pub struct ControlEvents {
    /// Level-triggered: once set, stays set for the remainder of the job.
    abort: AtomicBool,
    /// Edge-triggered: the worker clears it after acting on it once.
    skip: AtomicBool,
    /// Process-wide monotonic latch for shutdown.
    interrupt: AtomicBool,
    /// Level-triggered: workers block in [`ControlEvents::wait_if_suspended`]
    /// while this is `true`.
    suspended: AtomicBool,
    /// Set when the executor should stop touching the job persistence
    /// layer for the remainder of the job (the user asked to proceed
    /// without a working database).
    nodb: AtomicBool,
}

impl ControlEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn request_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    pub fn request_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn set_nodb(&self) {
        self.nodb.store(true, Ordering::SeqCst);
    }

    pub fn is_nodb(&self) -> bool {
        self.nodb.load(Ordering::SeqCst)
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::SeqCst);
    }

    /// Blocks the calling worker thread while suspended, returning the
    /// accumulated wait duration so the caller can exclude it from
    /// elapsed-time counters used for ETA display.
    pub fn wait_if_suspended(&self) -> Duration {
        let start = Instant::now();
        while self.suspended.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(20));
        }
        start.elapsed()
    }

    /// Checks and consumes pending control signals, in priority order:
    /// interrupt, abort, skip.
    pub fn poll(&self) -> ControlSignal {
        if self.interrupt.load(Ordering::SeqCst) {
            return ControlSignal::Interrupt;
        }
        if self.abort.load(Ordering::SeqCst) {
            return ControlSignal::Abort;
        }
        if self.skip.swap(false, Ordering::SeqCst) {
            return ControlSignal::Skip;
        }
        ControlSignal::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn push_wakes_consumer_and_delivers_message() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let wakes_clone = wakes.clone();
        let (producer, consumer) = channel(Arc::new(move || {
            wakes_clone.fetch_add(1, Ordering::SeqCst);
        }));
        producer.push(ProgressMessage::Scan(ScanSample {
            current: "/a".to_string(),
            files: 1,
            bytes: 10,
        }));
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(consumer.drain().len(), 1);
    }

    #[test]
    fn throttled_push_drops_messages_within_the_interval() {
        let (producer, consumer) = channel(Arc::new(|| {}));
        for i in 0..5 {
            producer.push_throttled(ProgressMessage::Scan(ScanSample {
                current: format!("/{i}"),
                files: i,
                bytes: 0,
            }));
        }
        assert_eq!(consumer.drain().len(), 1);
    }

    #[test]
    fn skip_is_edge_triggered() {
        let events = ControlEvents::new();
        events.request_skip();
        assert_eq!(events.poll(), ControlSignal::Skip);
        assert_eq!(events.poll(), ControlSignal::Continue);
    }

    #[test]
    fn interrupt_outranks_abort_and_skip() {
        let events = ControlEvents::new();
        events.request_skip();
        events.request_abort();
        events.request_interrupt();
        assert_eq!(events.poll(), ControlSignal::Interrupt);
    }

    #[test]
    fn abort_is_monotonic() {
        let events = ControlEvents::new();
        events.request_abort();
        assert_eq!(events.poll(), ControlSignal::Abort);
        assert_eq!(events.poll(), ControlSignal::Abort);
    }
}
