//! Progress reporting and cancellation support.
//!
//! A transcode job runs synchronously on whatever thread calls it. Two things
//! cross the thread boundary while it runs:
//!
//! - [`TranscodingProgress`] snapshots, delivered through a
//!   [`ProgressCallback`] at a bounded cadence. [`progress_channel`] and
//!   [`LatestProgress`] are ready-made callbacks that hand snapshots to
//!   another thread without tearing.
//! - A [`CancellationToken`], polled once per demuxed packet.
//!
//! # Example
//!
//! ```no_run
//! use std::thread;
//!
//! use convertify::{Pipeline, TranscodingConfig, progress_channel};
//!
//! let config = TranscodingConfig::new("input.mp4", "output.webm")?;
//! let mut pipeline = Pipeline::new(config);
//! let token = pipeline.cancellation_token();
//! let (sender, receiver) = progress_channel(16);
//!
//! let worker = thread::spawn(move || pipeline.transcode(&sender));
//! for progress in receiver.iter() {
//!     println!("{:.0}%", progress.percentage * 100.0);
//!     if progress.current_time.as_secs() > 60 {
//!         token.cancel();
//!     }
//! }
//! let result = worker.join();
//! # Ok::<(), convertify::ConvertError>(())
//! ```

use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// A snapshot of a running job.
///
/// The last snapshot delivered before the job returns is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodingProgress {
    /// Presentation time reached in the output timeline.
    pub current_time: Duration,
    /// Expected duration of the output (trim range applied).
    pub total_duration: Duration,
    /// `current_time / total_duration`, clamped to `[0, 1]`.
    pub percentage: f64,
    /// Media seconds processed per wall-clock second.
    pub speed: f64,
    /// Frames processed so far.
    pub frame_count: u64,
    /// Measured frames per wall-clock second.
    pub fps: f64,
    /// Bytes handed to the muxer so far.
    pub output_size: u64,
}

impl TranscodingProgress {
    /// Build a snapshot from raw counters.
    ///
    /// `elapsed` is the wall-clock time since the job started. Rates are zero
    /// until some time has elapsed; the percentage is zero when the total
    /// duration is unknown.
    pub fn compute(
        current_time: Duration,
        total_duration: Duration,
        frame_count: u64,
        elapsed: Duration,
        output_size: u64,
    ) -> Self {
        let percentage = if total_duration.is_zero() {
            0.0
        } else {
            (current_time.as_secs_f64() / total_duration.as_secs_f64()).clamp(0.0, 1.0)
        };

        let elapsed_seconds = elapsed.as_secs_f64();
        let (fps, speed) = if elapsed_seconds > 0.0 {
            (
                frame_count as f64 / elapsed_seconds,
                current_time.as_secs_f64() / elapsed_seconds,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            current_time,
            total_duration,
            percentage,
            speed,
            frame_count,
            fps,
            output_size,
        }
    }
}

/// Trait for receiving progress updates while a job runs.
///
/// Implementations must be [`Send`] and [`Sync`] because the job usually
/// runs on a worker thread. Callbacks observe but cannot halt the job; use
/// [`CancellationToken`] for that.
///
/// Any `Fn(&TranscodingProgress) + Send + Sync` closure is a callback.
pub trait ProgressCallback: Send + Sync {
    /// Called every N processed frames and once when the job completes.
    fn on_progress(&self, progress: &TranscodingProgress);
}

impl<F> ProgressCallback for F
where
    F: Fn(&TranscodingProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &TranscodingProgress) {
        self(progress)
    }
}

/// A callback that discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _progress: &TranscodingProgress) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to stop the
/// associated job. The frame loop checks
/// [`is_cancelled`](CancellationToken::is_cancelled) before reading each
/// packet, so cancellation latency is bounded by one packet's processing.
///
/// # Example
///
/// ```
/// use convertify::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation.
    ///
    /// All clones of this token observe the cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half of [`progress_channel`].
///
/// Never blocks the job: when the consumer lags and the queue is full, the
/// snapshot is dropped.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    sender: SyncSender<TranscodingProgress>,
}

impl ProgressCallback for ProgressSender {
    fn on_progress(&self, progress: &TranscodingProgress) {
        match self.sender.try_send(progress.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                log::trace!("Progress consumer is lagging; dropped a snapshot");
            }
        }
    }
}

/// Consumer half of [`progress_channel`].
#[derive(Debug)]
pub struct ProgressReceiver {
    receiver: Receiver<TranscodingProgress>,
}

impl ProgressReceiver {
    /// Block until the next snapshot arrives, or return `None` once the job
    /// has finished and every sender is gone.
    pub fn recv(&self) -> Option<TranscodingProgress> {
        self.receiver.recv().ok()
    }

    /// Return the next queued snapshot without blocking.
    pub fn try_recv(&self) -> Option<TranscodingProgress> {
        self.receiver.try_recv().ok()
    }

    /// Drain the queue and return only the newest snapshot.
    pub fn latest(&self) -> Option<TranscodingProgress> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(progress) => latest = Some(progress),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return latest,
            }
        }
    }

    /// Blocking iterator over snapshots; ends when the job finishes.
    pub fn iter(&self) -> impl Iterator<Item = TranscodingProgress> + '_ {
        self.receiver.iter()
    }
}

/// Create a bounded single-producer/single-consumer progress queue.
///
/// Pass the sender to the job as its callback and read from the receiver on
/// the consuming thread. `capacity` is clamped to at least one.
pub fn progress_channel(capacity: usize) -> (ProgressSender, ProgressReceiver) {
    let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
    (ProgressSender { sender }, ProgressReceiver { receiver })
}

/// A shared "latest snapshot" cell.
///
/// Clones share the same cell. Use it as the job's callback and poll
/// [`get`](LatestProgress::get) from a UI timer.
#[derive(Debug, Clone, Default)]
pub struct LatestProgress {
    latest: Arc<Mutex<Option<TranscodingProgress>>>,
}

impl LatestProgress {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent snapshot, if any has been delivered.
    pub fn get(&self) -> Option<TranscodingProgress> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressCallback for LatestProgress {
    fn on_progress(&self, progress: &TranscodingProgress) {
        let mut guard = match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(progress.clone());
    }
}

/// Internal helper that tracks job timing and emits callbacks every
/// `interval` frames.
pub(crate) struct ProgressTracker<'a> {
    callback: &'a dyn ProgressCallback,
    total_duration: Duration,
    interval: u64,
    start_time: Instant,
    frame_count: u64,
    frames_since_last_report: u64,
    current_time: Duration,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(
        callback: &'a dyn ProgressCallback,
        total_duration: Duration,
        interval: u64,
    ) -> Self {
        Self {
            callback,
            total_duration,
            interval: interval.max(1),
            start_time: Instant::now(),
            frame_count: 0,
            frames_since_last_report: 0,
            current_time: Duration::ZERO,
        }
    }

    /// Record one processed frame at `current_time` and fire the callback if
    /// the cadence threshold is reached.
    pub(crate) fn advance(&mut self, current_time: Duration, output_size: u64) {
        self.frame_count += 1;
        self.frames_since_last_report += 1;
        self.current_time = self.current_time.max(current_time);

        if self.frames_since_last_report >= self.interval {
            self.report(output_size);
            self.frames_since_last_report = 0;
        }
    }

    /// Emit the final report of a completed job; the clock snaps to the
    /// expected duration.
    pub(crate) fn finish(&mut self, output_size: u64) {
        self.current_time = self.current_time.max(self.total_duration);
        self.report(output_size);
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn report(&self, output_size: u64) {
        let progress = TranscodingProgress::compute(
            self.current_time,
            self.total_duration,
            self.frame_count,
            self.start_time.elapsed(),
            output_size,
        );
        self.callback.on_progress(&progress);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;

    #[test]
    fn tracker_reports_at_cadence() {
        let calls = AtomicU64::new(0);
        let callback = |_: &TranscodingProgress| {
            calls.fetch_add(1, Ordering::Relaxed);
        };
        let mut tracker = ProgressTracker::new(&callback, Duration::from_secs(10), 10);

        for frame in 0..25 {
            tracker.advance(Duration::from_millis(frame * 40), 0);
        }
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        tracker.finish(0);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(tracker.frame_count(), 25);
    }

    #[test]
    fn tracker_keeps_the_furthest_time() {
        let latest = LatestProgress::new();
        let mut tracker = ProgressTracker::new(&latest, Duration::from_secs(4), 1);

        tracker.advance(Duration::from_secs(2), 100);
        // A late audio frame must not move the clock backwards.
        tracker.advance(Duration::from_secs(1), 200);

        let progress = latest.get().expect("snapshot");
        assert_eq!(progress.current_time, Duration::from_secs(2));
        assert_eq!(progress.output_size, 200);
        assert!((progress.percentage - 0.5).abs() < 1e-9);

        tracker.finish(300);
        assert_eq!(latest.get().map(|p| p.percentage), Some(1.0));
    }

    #[test]
    fn zero_interval_reports_every_frame() {
        let calls = AtomicU64::new(0);
        let callback = |_: &TranscodingProgress| {
            calls.fetch_add(1, Ordering::Relaxed);
        };
        let mut tracker = ProgressTracker::new(&callback, Duration::ZERO, 0);
        tracker.advance(Duration::ZERO, 0);
        tracker.advance(Duration::ZERO, 0);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }
}
