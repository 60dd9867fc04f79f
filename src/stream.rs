//! Async transcoding.
//!
//! [`transcode_async`] runs a blocking [`Pipeline`] job on
//! `tokio::task::spawn_blocking` and hands back two halves:
//!
//! - a [`TranscodeFuture`] that resolves to the job's result, and
//! - a [`ProgressStream`] of progress snapshots.
//!
//! Snapshots travel through a bounded `mpsc` channel. When the consumer
//! falls behind, new snapshots are dropped rather than stalling the job.
//!
//! # Example
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//!
//! use convertify::{ConvertError, JobOptions, TranscodingConfig, transcode_async};
//!
//! # async fn example() -> Result<(), ConvertError> {
//! let config = TranscodingConfig::new("input.mov", "output.mp4")?;
//! let (job, mut progress) = transcode_async(config, JobOptions::new());
//!
//! while let Some(snapshot) = progress.next().await {
//!     println!("{:.0}%", snapshot.percentage * 100.0);
//! }
//! job.await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::FusedStream;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_stream::Stream;

use crate::config::{JobOptions, TranscodingConfig};
use crate::error::ConvertError;
use crate::pipeline::Pipeline;
use crate::progress::{CancellationToken, ProgressCallback, TranscodingProgress};

/// Default bounded-channel capacity for [`ProgressStream`].
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Progress snapshots from a background job.
///
/// Ends when the job finishes, whatever its outcome.
pub struct ProgressStream {
    receiver: Receiver<TranscodingProgress>,
    done: bool,
}

impl Stream for ProgressStream {
    type Item = TranscodingProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        let polled = self.receiver.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.done = true;
        }
        polled
    }
}

impl FusedStream for ProgressStream {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

/// A future that resolves when a background job finishes.
pub struct TranscodeFuture {
    handle: JoinHandle<Result<(), ConvertError>>,
    cancellation: CancellationToken,
}

impl TranscodeFuture {
    /// Request cancellation of the background job.
    ///
    /// The future still has to be awaited; it resolves to
    /// [`ConvertError::Cancelled`].
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// The job's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

impl Future for TranscodeFuture {
    type Output = Result<(), ConvertError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(ConvertError::Cancelled)))
    }
}

struct ChannelProgress {
    sender: Sender<TranscodingProgress>,
}

impl ProgressCallback for ChannelProgress {
    fn on_progress(&self, progress: &TranscodingProgress) {
        // A full or closed channel only means nobody is keeping up.
        let _ = self.sender.try_send(progress.clone());
    }
}

/// Run a transcoding job on a blocking thread.
///
/// Must be called from within a Tokio runtime.
pub fn transcode_async(config: TranscodingConfig, options: JobOptions) -> (TranscodeFuture, ProgressStream) {
    transcode_async_with_capacity(config, options, DEFAULT_CHANNEL_CAPACITY)
}

/// [`transcode_async`] with an explicit progress channel capacity.
pub fn transcode_async_with_capacity(
    config: TranscodingConfig,
    options: JobOptions,
    capacity: usize,
) -> (TranscodeFuture, ProgressStream) {
    let (sender, receiver) = tokio::sync::mpsc::channel(capacity.max(1));
    let cancellation = options.cancellation_token().clone();

    let handle = tokio::task::spawn_blocking(move || {
        let progress = ChannelProgress { sender };
        Pipeline::new(config).with_options(options).transcode(&progress)
    });

    (
        TranscodeFuture { handle, cancellation },
        ProgressStream {
            receiver,
            done: false,
        },
    )
}
