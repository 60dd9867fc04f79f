//! # convertify
//!
//! Convert, trim, compress, and re-encode audio, video, and image files,
//! powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Inspect a File
//!
//! ```no_run
//! use convertify::MediaProbe;
//!
//! for stream in MediaProbe::probe("input.mkv").unwrap() {
//!     println!("#{} {:?} {}", stream.index, stream.kind, stream.codec);
//! }
//! ```
//!
//! ### Trim and Re-encode
//!
//! ```no_run
//! use convertify::{NoOpProgress, TranscodingConfig, transcode};
//!
//! let config = TranscodingConfig::new("input.mov", "clip.mp4")
//!     .unwrap()
//!     .with_trim(Some(2.0), Some(7.0))
//!     .with_resolution(Some(1280), None);
//! transcode(config, &NoOpProgress).unwrap();
//! ```
//!
//! ### From a User Request
//!
//! ```no_run
//! use convertify::{ConversionRequest, ContainerFormat, Pipeline, QualityPreset};
//!
//! let config = ConversionRequest::new("input.mp4", "small.webm")
//!     .with_format(ContainerFormat::WebM)
//!     .with_quality(QualityPreset::Low)
//!     .with_target_width(640)
//!     .into_config()
//!     .unwrap();
//! Pipeline::new(config)
//!     .transcode(&|progress: &convertify::TranscodingProgress| {
//!         eprintln!("{:.0}%", progress.percentage * 100.0);
//!     })
//!     .unwrap();
//! ```
//!
//! ### Animated GIF
//!
//! ```no_run
//! use convertify::{GifTranscoder, NoOpProgress};
//!
//! GifTranscoder::new("input.mp4", "clip.gif", 10.0, 320, None, Some(0.0), Some(5.0))
//!     .run(&NoOpProgress)
//!     .unwrap();
//! ```
//!
//! ## Features
//!
//! - **Stream probing**: codec, dimensions, frame rate, sample rate, and a
//!   duration that falls back from the container to the streams to a frame
//!   count estimate
//! - **Transcoding**: any supported container to any other, with per-stream
//!   copy / re-encode / strip, trimming, cropping, scaling, frame rate and
//!   pixel format changes, audio resampling, remixing, and gain
//! - **Quality presets**: CRF per codec family, overridden by an explicit
//!   CRF or bit rate
//! - **Hardware encoders**: VideoToolbox, NVENC, Quick Sync, and AMF for
//!   H.264/HEVC when present, software otherwise
//! - **Animated GIF**: two-pass palette generation with Bayer dithering
//! - **Still images**: JPEG, PNG, WebP, HEIC, TIFF, BMP, and ICO
//! - **Progress & cancellation**: bounded-cadence snapshots and a
//!   `CancellationToken` polled once per packet
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | `transcode_async` returning a future and a progress stream (Tokio) |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

mod codec;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod filter;
pub mod gif;
mod graph;
pub mod hardware;
mod lane;
pub mod pipeline;
pub mod probe;
pub mod progress;
pub mod still;
#[cfg(feature = "async")]
pub mod stream;
pub mod timestamp;

pub use config::{
    AudioCodec, ContainerFormat, ConversionRequest, JobOptions, QualityPreset, StreamPlan,
    TranscodingConfig, VideoCodec,
};
pub use error::ConvertError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use filter::{
    AudioSource, AudioTransform, CropRect, PaletteOptions, PaletteStatsMode, VideoSource,
    VideoTransform, audio_chain, palette_chain, video_chain,
};
pub use gif::GifTranscoder;
pub use hardware::{
    CodecFamily, EncoderChoice, HardwareCapabilities, HardwareDeviceType,
    available_hardware_devices, detect_capabilities, select_encoder, select_encoder_with,
};
pub use pipeline::{Pipeline, PipelineState, transcode, transcode_with_options};
pub use probe::{AudioDetails, MediaInfo, MediaKind, MediaProbe, StreamDescriptor, VideoDetails};
pub use progress::{
    CancellationToken, LatestProgress, NoOpProgress, ProgressCallback, ProgressReceiver,
    ProgressSender, TranscodingProgress, progress_channel,
};
pub use still::{ImageFormat, ImageTranscoder};
#[cfg(feature = "async")]
pub use stream::{ProgressStream, TranscodeFuture, transcode_async, transcode_async_with_capacity};
