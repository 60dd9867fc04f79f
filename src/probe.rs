//! Stream probing.
//!
//! [`MediaProbe`] opens a file read-only, describes its audio and video
//! streams, and closes it again. Nothing is kept open between calls, so it is
//! cheap to probe many files in a row.
//!
//! Duration is resolved in three tiers because many containers leave the
//! header field empty:
//!
//! 1. the container duration, when positive;
//! 2. otherwise the longest stream duration;
//! 3. otherwise, for video, frame count divided by frame rate (counting
//!    packets when the header does not carry a frame count).
//!
//! # Example
//!
//! ```no_run
//! use convertify::MediaProbe;
//!
//! let info = MediaProbe::inspect("input.mp4")?;
//! println!("{} lasting {:?}", info.format_name, info.duration);
//! for stream in &info.streams {
//!     println!("#{} {:?} {}", stream.index, stream.kind, stream.codec);
//! }
//! # Ok::<(), convertify::ConvertError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::{
    Packet, Rational,
    codec::context::Context as CodecContext,
    format::{Pixel, Sample, context::Input},
    media::Type,
};

use crate::error::ConvertError;
use crate::timestamp;

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Moving pictures.
    Video,
    /// Sound.
    Audio,
}

/// Video-specific stream properties.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDetails {
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Decoded pixel format.
    pub pixel_format: Pixel,
    /// Average frame rate as reported by the container.
    pub frame_rate: Rational,
    /// Number of frames, when the container records it.
    pub frame_count: Option<u64>,
}

impl VideoDetails {
    /// Frame rate in frames per second, when known.
    pub fn frames_per_second(&self) -> Option<f64> {
        timestamp::frames_per_second(self.frame_rate)
    }
}

/// Audio-specific stream properties.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDetails {
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Decoded sample format.
    pub sample_format: Sample,
}

/// Read-only description of one audio or video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    /// Index of the stream in the container.
    pub index: usize,
    /// Whether the stream is audio or video.
    pub kind: MediaKind,
    /// Codec name (e.g. `"h264"`, `"aac"`).
    pub codec: String,
    /// Time base of the stream's timestamps.
    pub time_base: Rational,
    /// Stream duration, when recorded.
    pub duration: Option<Duration>,
    /// Bit rate in bits per second, 0 when unknown.
    pub bit_rate: u64,
    /// Present for video streams.
    pub video: Option<VideoDetails>,
    /// Present for audio streams.
    pub audio: Option<AudioDetails>,
}

/// Container-level summary of a probed file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// The probed path.
    pub path: PathBuf,
    /// Demuxer name (e.g. `"mov,mp4,m4a,3gp,3g2,mj2"`).
    pub format_name: String,
    /// Resolved duration; zero when no tier produced one.
    pub duration: Duration,
    /// Container bit rate in bits per second, 0 when unknown.
    pub bit_rate: u64,
    /// Audio and video streams in container order.
    pub streams: Vec<StreamDescriptor>,
    /// Index into `streams` of FFmpeg's preferred video stream.
    pub best_video: Option<usize>,
    /// Index into `streams` of FFmpeg's preferred audio stream.
    pub best_audio: Option<usize>,
}

impl MediaInfo {
    /// FFmpeg's preferred video stream.
    pub fn video(&self) -> Option<&StreamDescriptor> {
        self.best_video.and_then(|position| self.streams.get(position))
    }

    /// FFmpeg's preferred audio stream.
    pub fn audio(&self) -> Option<&StreamDescriptor> {
        self.best_audio.and_then(|position| self.streams.get(position))
    }
}

/// Inputs to the three-tier duration policy.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DurationSources {
    pub(crate) container: Option<Duration>,
    pub(crate) streams: Vec<Duration>,
    pub(crate) frames: Option<(u64, f64)>,
}

impl DurationSources {
    pub(crate) fn resolve(&self) -> Option<Duration> {
        if let Some(container) = self.container.filter(|duration| !duration.is_zero()) {
            return Some(container);
        }

        if let Some(longest) = self.streams.iter().copied().filter(|d| !d.is_zero()).max() {
            return Some(longest);
        }

        match self.frames {
            Some((count, fps)) if count > 0 && fps > 0.0 => {
                Some(timestamp::seconds_to_duration(count as f64 / fps))
            }
            _ => None,
        }
    }
}

/// Stateless media prober.
pub struct MediaProbe;

impl MediaProbe {
    /// Describe the audio and video streams of a file.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::OpenInputFailed`] if the file cannot be opened or
    ///   parsed.
    /// - [`ConvertError::StreamInfoUnavailable`] if a stream's parameters
    ///   cannot be read.
    /// - [`ConvertError::NoStreamsFound`] if there is no audio or video.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Vec<StreamDescriptor>, ConvertError> {
        Self::inspect(path).map(|info| info.streams)
    }

    /// Describe a file, including container-level information.
    ///
    /// # Errors
    ///
    /// Same as [`probe`](MediaProbe::probe).
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<MediaInfo, ConvertError> {
        let path = path.as_ref();
        let mut input = open_input(path)?;
        let info = describe(&mut input, path)?;

        log::debug!(
            "Probed {} (format={}, duration={:.2}s, streams={})",
            path.display(),
            info.format_name,
            info.duration.as_secs_f64(),
            info.streams.len(),
        );
        Ok(info)
    }

    /// Probe several files; failures are reported per file.
    pub fn probe_many<P: AsRef<Path>>(paths: &[P]) -> Vec<Result<MediaInfo, ConvertError>> {
        paths.iter().map(Self::inspect).collect()
    }
}

/// Open a demuxer for `path`, initialising FFmpeg first.
pub(crate) fn open_input(path: &Path) -> Result<Input, ConvertError> {
    crate::ffmpeg::initialize(path)?;
    ffmpeg_next::format::input(&path).map_err(|error| ConvertError::OpenInputFailed {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })
}

/// Describe an already-open input.
///
/// May read packets to estimate duration, in which case the demuxer is
/// rewound to the start before returning.
pub(crate) fn describe(input: &mut Input, path: &Path) -> Result<MediaInfo, ConvertError> {
    let best_video_index = input.streams().best(Type::Video).map(|stream| stream.index());
    let best_audio_index = input.streams().best(Type::Audio).map(|stream| stream.index());

    let mut streams = Vec::new();
    for stream in input.streams() {
        let kind = match stream.parameters().medium() {
            Type::Video => MediaKind::Video,
            Type::Audio => MediaKind::Audio,
            _ => continue,
        };

        let index = stream.index();
        let time_base = stream.time_base();
        let unavailable = |reason: String| ConvertError::StreamInfoUnavailable {
            path: path.to_path_buf(),
            reason: format!("stream {index}: {reason}"),
        };

        let parameters = stream.parameters();
        let codec = parameters.id().name().to_string();
        let bit_rate = unsafe { (*parameters.as_ptr()).bit_rate }.max(0) as u64;
        let context = CodecContext::from_parameters(parameters)
            .map_err(|error| unavailable(format!("failed to read codec parameters: {error}")))?;

        let duration = (stream.duration() > 0 && timestamp::is_set(stream.duration()))
            .then(|| timestamp::seconds_to_duration(timestamp::to_seconds(stream.duration(), time_base)));

        let (video, audio) = match kind {
            MediaKind::Video => {
                let decoder = context
                    .decoder()
                    .video()
                    .map_err(|error| unavailable(format!("failed to open {codec} decoder: {error}")))?;
                let mut frame_rate = stream.avg_frame_rate();
                if timestamp::frames_per_second(frame_rate).is_none() {
                    frame_rate = stream.rate();
                }
                let frame_count = (stream.frames() > 0).then_some(stream.frames() as u64);
                let details = VideoDetails {
                    width: decoder.width(),
                    height: decoder.height(),
                    pixel_format: decoder.format(),
                    frame_rate,
                    frame_count,
                };
                (Some(details), None)
            }
            MediaKind::Audio => {
                let decoder = context
                    .decoder()
                    .audio()
                    .map_err(|error| unavailable(format!("failed to open {codec} decoder: {error}")))?;
                let details = AudioDetails {
                    sample_rate: decoder.rate(),
                    channels: decoder.channels(),
                    sample_format: decoder.format(),
                };
                (None, Some(details))
            }
        };

        streams.push(StreamDescriptor {
            index,
            kind,
            codec,
            time_base,
            duration,
            bit_rate,
            video,
            audio,
        });
    }

    if streams.is_empty() {
        return Err(ConvertError::NoStreamsFound {
            path: path.to_path_buf(),
        });
    }

    let container = (input.duration() > 0).then(|| Duration::from_micros(input.duration() as u64));
    let mut sources = DurationSources {
        container,
        streams: streams.iter().filter_map(|stream| stream.duration).collect(),
        frames: None,
    };

    if sources.resolve().is_none()
        && let Some(video) = best_video_index
            .and_then(|index| streams.iter().find(|stream| stream.index == index))
            .and_then(|stream| stream.video.as_ref().map(|details| (stream.index, details)))
            .map(|(index, details)| (index, details.frame_count, details.frames_per_second()))
        && let (index, frame_count, Some(fps)) = video
    {
        let count = match frame_count {
            Some(count) => count,
            None => count_packets(input, index)?,
        };
        sources.frames = Some((count, fps));
    }

    let position = |index: Option<usize>| {
        index.and_then(|index| streams.iter().position(|stream| stream.index == index))
    };

    Ok(MediaInfo {
        path: path.to_path_buf(),
        format_name: input.format().name().to_string(),
        duration: sources.resolve().unwrap_or(Duration::ZERO),
        bit_rate: input.bit_rate().max(0) as u64,
        best_video: position(best_video_index),
        best_audio: position(best_audio_index),
        streams,
    })
}

// Count the packets of one stream, then rewind.
fn count_packets(input: &mut Input, stream_index: usize) -> Result<u64, ConvertError> {
    let mut count = 0_u64;
    loop {
        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) => {
                if packet.stream() == stream_index {
                    count += 1;
                }
            }
            Err(ffmpeg_next::Error::Eof) => break,
            Err(error) => return Err(ConvertError::DecodingFailed(error.to_string())),
        }
    }

    input
        .seek(0, ..)
        .map_err(|error| ConvertError::DecodingFailed(format!("cannot rewind after counting packets: {error}")))?;
    log::debug!("Counted {count} packets in stream {stream_index}");
    Ok(count)
}
