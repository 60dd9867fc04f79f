//! Job configuration.
//!
//! [`TranscodingConfig`] is the immutable description of one transcode job.
//! [`ConversionRequest`] captures what a user asked for (format, quality
//! preset, trim, crop, target size) and translates it into a config.
//! [`JobOptions`] threads the cancellation token and tuning knobs through a
//! job without polluting every signature.
//!
//! # Example
//!
//! ```no_run
//! use convertify::{ConversionRequest, ContainerFormat, CropRect, QualityPreset};
//!
//! let config = ConversionRequest::new("input.mov", "clip.mp4")
//!     .with_format(ContainerFormat::Mp4)
//!     .with_quality(QualityPreset::High)
//!     .with_trim(Some(2.0), Some(7.0))
//!     .with_crop(CropRect::new(0, 0, 1280, 720))
//!     .with_target_width(640)
//!     .into_config()?;
//! # Ok::<(), convertify::ConvertError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

use crate::error::ConvertError;
use crate::filter::CropRect;
use crate::hardware::CodecFamily;
use crate::progress::CancellationToken;

/// Output containers the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// MPEG-4 Part 14.
    Mp4,
    /// QuickTime.
    Mov,
    /// Matroska.
    Mkv,
    /// WebM (VP9/AV1 + Opus/Vorbis).
    WebM,
    /// Audio Video Interleave.
    Avi,
    /// MPEG-4 audio.
    M4a,
    /// Free Lossless Audio Codec.
    Flac,
    /// RIFF WAVE.
    Wav,
    /// MPEG audio layer III.
    Mp3,
    /// Ogg.
    Ogg,
    /// Animated GIF.
    Gif,
}

impl ContainerFormat {
    /// Every supported container, in display order.
    pub const ALL: [ContainerFormat; 11] = [
        ContainerFormat::Mp4,
        ContainerFormat::Mov,
        ContainerFormat::Mkv,
        ContainerFormat::WebM,
        ContainerFormat::Avi,
        ContainerFormat::M4a,
        ContainerFormat::Flac,
        ContainerFormat::Wav,
        ContainerFormat::Mp3,
        ContainerFormat::Ogg,
        ContainerFormat::Gif,
    ];

    /// Name of the FFmpeg muxer that writes this container.
    pub fn muxer_name(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "matroska",
            ContainerFormat::WebM => "webm",
            ContainerFormat::Avi => "avi",
            ContainerFormat::M4a => "ipod",
            ContainerFormat::Flac => "flac",
            ContainerFormat::Wav => "wav",
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::Ogg => "ogg",
            ContainerFormat::Gif => "gif",
        }
    }

    /// Canonical file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "mkv",
            ContainerFormat::WebM => "webm",
            ContainerFormat::Avi => "avi",
            ContainerFormat::M4a => "m4a",
            ContainerFormat::Flac => "flac",
            ContainerFormat::Wav => "wav",
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::Ogg => "ogg",
            ContainerFormat::Gif => "gif",
        }
    }

    /// Look a container up by file extension (case-insensitive, with or
    /// without a leading dot).
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        match extension.as_str() {
            "mp4" | "m4v" => Some(ContainerFormat::Mp4),
            "mov" | "qt" => Some(ContainerFormat::Mov),
            "mkv" => Some(ContainerFormat::Mkv),
            "webm" => Some(ContainerFormat::WebM),
            "avi" => Some(ContainerFormat::Avi),
            "m4a" | "aac" => Some(ContainerFormat::M4a),
            "flac" => Some(ContainerFormat::Flac),
            "wav" | "wave" => Some(ContainerFormat::Wav),
            "mp3" => Some(ContainerFormat::Mp3),
            "ogg" | "oga" | "opus" => Some(ContainerFormat::Ogg),
            "gif" => Some(ContainerFormat::Gif),
            _ => None,
        }
    }

    /// Infer the container from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the container can carry a video stream.
    pub fn supports_video(self) -> bool {
        matches!(
            self,
            ContainerFormat::Mp4
                | ContainerFormat::Mov
                | ContainerFormat::Mkv
                | ContainerFormat::WebM
                | ContainerFormat::Avi
                | ContainerFormat::Gif
        )
    }

    /// Whether the container can carry an audio stream.
    pub fn supports_audio(self) -> bool {
        self != ContainerFormat::Gif
    }

    /// Video codec used when the config does not name one.
    pub fn default_video_codec(self) -> Option<VideoCodec> {
        match self {
            ContainerFormat::Mp4 | ContainerFormat::Mov | ContainerFormat::Mkv => {
                Some(VideoCodec::H264)
            }
            ContainerFormat::WebM => Some(VideoCodec::Vp9),
            ContainerFormat::Avi => Some(VideoCodec::Mpeg4),
            ContainerFormat::Gif => Some(VideoCodec::Gif),
            _ => None,
        }
    }

    /// Audio codec used when the config does not name one.
    pub fn default_audio_codec(self) -> Option<AudioCodec> {
        match self {
            ContainerFormat::Mp4
            | ContainerFormat::Mov
            | ContainerFormat::Mkv
            | ContainerFormat::M4a => Some(AudioCodec::Aac),
            ContainerFormat::WebM | ContainerFormat::Ogg => Some(AudioCodec::Opus),
            ContainerFormat::Avi | ContainerFormat::Mp3 => Some(AudioCodec::Mp3),
            ContainerFormat::Flac => Some(AudioCodec::Flac),
            ContainerFormat::Wav => Some(AudioCodec::Pcm),
            ContainerFormat::Gif => None,
        }
    }
}

impl Display for ContainerFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.extension())
    }
}

/// Video codecs the engine can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    Hevc,
    /// VP9.
    Vp9,
    /// AV1.
    Av1,
    /// MPEG-4 Part 2 (for AVI compatibility).
    Mpeg4,
    /// Apple ProRes.
    ProRes,
    /// GIF (indexed colour).
    Gif,
}

impl VideoCodec {
    /// The encoder family handed to the hardware selector.
    pub fn family(self) -> CodecFamily {
        match self {
            VideoCodec::H264 => CodecFamily::H264,
            VideoCodec::Hevc => CodecFamily::Hevc,
            VideoCodec::Vp9 => CodecFamily::Vp9,
            VideoCodec::Av1 => CodecFamily::Av1,
            VideoCodec::Mpeg4 => CodecFamily::Mpeg4,
            VideoCodec::ProRes => CodecFamily::ProRes,
            VideoCodec::Gif => CodecFamily::Gif,
        }
    }

    /// Valid CRF range, for codecs that have one.
    pub fn crf_range(self) -> Option<(u32, u32)> {
        match self {
            VideoCodec::H264 | VideoCodec::Hevc => Some((0, 51)),
            VideoCodec::Vp9 | VideoCodec::Av1 => Some((0, 63)),
            VideoCodec::Mpeg4 | VideoCodec::ProRes | VideoCodec::Gif => None,
        }
    }

    /// Parse a codec name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "x264" => Some(VideoCodec::H264),
            "h265" | "hevc" | "x265" => Some(VideoCodec::Hevc),
            "vp9" => Some(VideoCodec::Vp9),
            "av1" => Some(VideoCodec::Av1),
            "mpeg4" | "xvid" => Some(VideoCodec::Mpeg4),
            "prores" => Some(VideoCodec::ProRes),
            "gif" => Some(VideoCodec::Gif),
            _ => None,
        }
    }
}

/// Audio codecs the engine can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// Advanced Audio Coding.
    Aac,
    /// MPEG audio layer III.
    Mp3,
    /// Opus.
    Opus,
    /// Vorbis.
    Vorbis,
    /// FLAC.
    Flac,
    /// PCM signed 16-bit little-endian.
    Pcm,
    /// Apple Lossless.
    Alac,
}

impl AudioCodec {
    /// The encoder family handed to the hardware selector.
    pub fn family(self) -> CodecFamily {
        match self {
            AudioCodec::Aac => CodecFamily::Aac,
            AudioCodec::Mp3 => CodecFamily::Mp3,
            AudioCodec::Opus => CodecFamily::Opus,
            AudioCodec::Vorbis => CodecFamily::Vorbis,
            AudioCodec::Flac => CodecFamily::Flac,
            AudioCodec::Pcm => CodecFamily::Pcm,
            AudioCodec::Alac => CodecFamily::Alac,
        }
    }

    /// Whether the codec is lossless (bit rate settings are ignored).
    pub fn is_lossless(self) -> bool {
        matches!(self, AudioCodec::Flac | AudioCodec::Pcm | AudioCodec::Alac)
    }

    /// Bit rate used when neither the config nor a preset sets one.
    pub fn default_bit_rate(self) -> Option<u64> {
        match self {
            AudioCodec::Aac | AudioCodec::Mp3 | AudioCodec::Vorbis => Some(128_000),
            AudioCodec::Opus => Some(96_000),
            AudioCodec::Flac | AudioCodec::Pcm | AudioCodec::Alac => None,
        }
    }

    /// Parse a codec name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aac" => Some(AudioCodec::Aac),
            "mp3" => Some(AudioCodec::Mp3),
            "opus" => Some(AudioCodec::Opus),
            "vorbis" => Some(AudioCodec::Vorbis),
            "flac" => Some(AudioCodec::Flac),
            "pcm" | "wav" | "pcm_s16le" => Some(AudioCodec::Pcm),
            "alac" => Some(AudioCodec::Alac),
            _ => None,
        }
    }
}

/// Coarse quality presets offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QualityPreset {
    /// Small files.
    Low,
    /// Balanced size and quality.
    #[default]
    Medium,
    /// Visually transparent for most content.
    High,
    /// Mathematically lossless where the codec allows it.
    Lossless,
}

impl QualityPreset {
    /// CRF for a video codec, or `None` when the codec is not CRF-driven.
    pub fn crf_for(self, codec: VideoCodec) -> Option<u32> {
        match codec {
            VideoCodec::H264 | VideoCodec::Hevc => Some(match self {
                QualityPreset::Low => 28,
                QualityPreset::Medium => 23,
                QualityPreset::High => 18,
                QualityPreset::Lossless => 0,
            }),
            VideoCodec::Vp9 | VideoCodec::Av1 => Some(match self {
                QualityPreset::Low => 40,
                QualityPreset::Medium => 32,
                QualityPreset::High => 24,
                QualityPreset::Lossless => 0,
            }),
            VideoCodec::Mpeg4 | VideoCodec::ProRes | VideoCodec::Gif => None,
        }
    }

    /// Audio bit rate for a lossy codec, or `None` for lossless ones.
    pub fn audio_bit_rate_for(self, codec: AudioCodec) -> Option<u64> {
        if codec.is_lossless() {
            return None;
        }
        Some(match self {
            QualityPreset::Low => 96_000,
            QualityPreset::Medium => 128_000,
            QualityPreset::High => 192_000,
            QualityPreset::Lossless => 320_000,
        })
    }

    /// Parse a preset name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "low" => Some(QualityPreset::Low),
            "medium" | "default" => Some(QualityPreset::Medium),
            "high" => Some(QualityPreset::High),
            "lossless" => Some(QualityPreset::Lossless),
            _ => None,
        }
    }
}

/// What the pipeline does with one media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPlan {
    /// Leave the stream out of the output.
    Strip,
    /// Copy packets without decoding.
    Copy,
    /// Decode, optionally filter, and re-encode.
    Encode,
}

/// Immutable description of one transcode job.
///
/// Build with [`TranscodingConfig::new`] and the `with_*` methods, or from a
/// [`ConversionRequest`]. The engine never mutates a config.
///
/// `strip_*` wins over both `copy_*` and an explicit codec for the same
/// media kind. `copy_*` means no encoder is opened for that kind.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodingConfig {
    /// Input file.
    pub input: PathBuf,
    /// Output file.
    pub output: PathBuf,
    /// Output container.
    pub container: ContainerFormat,
    /// Video codec; `None` uses the container default.
    pub video_codec: Option<VideoCodec>,
    /// Target video bit rate in bits per second. Overrides CRF.
    pub video_bit_rate: Option<u64>,
    /// Constant rate factor.
    pub crf: Option<u32>,
    /// Target width. Height follows the aspect ratio when unset.
    pub width: Option<u32>,
    /// Target height. Width follows the aspect ratio when unset.
    pub height: Option<u32>,
    /// Target frame rate in frames per second.
    pub frame_rate: Option<f64>,
    /// Target pixel format name (e.g. `"yuv420p"`).
    pub pixel_format: Option<String>,
    /// Audio codec; `None` uses the container default.
    pub audio_codec: Option<AudioCodec>,
    /// Target audio bit rate in bits per second.
    pub audio_bit_rate: Option<u64>,
    /// Target sample rate in hertz.
    pub sample_rate: Option<u32>,
    /// Target channel count.
    pub channels: Option<u16>,
    /// Audio gain in decibels.
    pub audio_gain_db: Option<f64>,
    /// Trim start in seconds.
    pub start_time: Option<f64>,
    /// Trim end in seconds.
    pub end_time: Option<f64>,
    /// Crop rectangle in source pixels.
    pub crop: Option<CropRect>,
    /// Extra video filter-chain fragments appended after the built-in chain.
    pub filters: Vec<String>,
    /// Copy the video stream without re-encoding.
    pub copy_video: bool,
    /// Copy the audio stream without re-encoding.
    pub copy_audio: bool,
    /// Leave video out of the output.
    pub strip_video: bool,
    /// Leave audio out of the output.
    pub strip_audio: bool,
    /// Prefer hardware encoders and decoders when available.
    pub prefer_hardware: bool,
}

impl TranscodingConfig {
    /// Create a config that re-encodes `input` into `output` with the
    /// container's default codecs.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::OutputFormatUnsupported`] if the output
    /// extension does not name a supported container. Use
    /// [`with_container`](TranscodingConfig::with_container) afterwards to
    /// override the inferred container.
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(input: P1, output: P2) -> Result<Self, ConvertError> {
        let output = output.as_ref().to_path_buf();
        let container = ContainerFormat::from_path(&output).ok_or_else(|| {
            ConvertError::OutputFormatUnsupported(format!(
                "cannot infer a container from {}",
                output.display()
            ))
        })?;
        Ok(Self::with_format(input, output, container))
    }

    /// Create a config with an explicit container, regardless of extension.
    pub fn with_format<P1: AsRef<Path>, P2: AsRef<Path>>(
        input: P1,
        output: P2,
        container: ContainerFormat,
    ) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            container,
            video_codec: None,
            video_bit_rate: None,
            crf: None,
            width: None,
            height: None,
            frame_rate: None,
            pixel_format: None,
            audio_codec: None,
            audio_bit_rate: None,
            sample_rate: None,
            channels: None,
            audio_gain_db: None,
            start_time: None,
            end_time: None,
            crop: None,
            filters: Vec::new(),
            copy_video: false,
            copy_audio: false,
            strip_video: false,
            strip_audio: false,
            prefer_hardware: false,
        }
    }

    /// Override the output container.
    #[must_use]
    pub fn with_container(mut self, container: ContainerFormat) -> Self {
        self.container = container;
        self
    }

    /// Set the video codec.
    #[must_use]
    pub fn with_video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = Some(codec);
        self
    }

    /// Set the target video bit rate in bits per second.
    #[must_use]
    pub fn with_video_bit_rate(mut self, bit_rate: u64) -> Self {
        self.video_bit_rate = Some(bit_rate);
        self
    }

    /// Set the constant rate factor.
    #[must_use]
    pub fn with_crf(mut self, crf: u32) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Set the output resolution. Pass `None` for either dimension to derive
    /// it from the source aspect ratio.
    #[must_use]
    pub fn with_resolution(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the output frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Set the output pixel format by FFmpeg name.
    #[must_use]
    pub fn with_pixel_format(mut self, name: impl Into<String>) -> Self {
        self.pixel_format = Some(name.into());
        self
    }

    /// Set the audio codec.
    #[must_use]
    pub fn with_audio_codec(mut self, codec: AudioCodec) -> Self {
        self.audio_codec = Some(codec);
        self
    }

    /// Set the target audio bit rate in bits per second.
    #[must_use]
    pub fn with_audio_bit_rate(mut self, bit_rate: u64) -> Self {
        self.audio_bit_rate = Some(bit_rate);
        self
    }

    /// Set the output sample rate.
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Set the output channel count.
    #[must_use]
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Apply a gain to the audio, in decibels.
    #[must_use]
    pub fn with_audio_gain(mut self, decibels: f64) -> Self {
        self.audio_gain_db = Some(decibels);
        self
    }

    /// Set the trim range in seconds. Either end may be open.
    #[must_use]
    pub fn with_trim(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Crop the video before scaling.
    #[must_use]
    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Append a raw FFmpeg video filter-chain fragment.
    #[must_use]
    pub fn with_filter(mut self, fragment: impl Into<String>) -> Self {
        self.filters.push(fragment.into());
        self
    }

    /// Copy the video stream without re-encoding.
    #[must_use]
    pub fn copy_video(mut self) -> Self {
        self.copy_video = true;
        self
    }

    /// Copy the audio stream without re-encoding.
    #[must_use]
    pub fn copy_audio(mut self) -> Self {
        self.copy_audio = true;
        self
    }

    /// Leave video out of the output.
    #[must_use]
    pub fn strip_video(mut self) -> Self {
        self.strip_video = true;
        self
    }

    /// Leave audio out of the output.
    #[must_use]
    pub fn strip_audio(mut self) -> Self {
        self.strip_audio = true;
        self
    }

    /// Prefer hardware encoders and decoders.
    #[must_use]
    pub fn prefer_hardware(mut self, prefer: bool) -> Self {
        self.prefer_hardware = prefer;
        self
    }

    /// What happens to the video stream.
    pub fn video_plan(&self) -> StreamPlan {
        if self.strip_video || !self.container.supports_video() {
            StreamPlan::Strip
        } else if self.copy_video {
            StreamPlan::Copy
        } else {
            StreamPlan::Encode
        }
    }

    /// What happens to the audio stream.
    pub fn audio_plan(&self) -> StreamPlan {
        if self.strip_audio || !self.container.supports_audio() {
            StreamPlan::Strip
        } else if self.copy_audio {
            StreamPlan::Copy
        } else {
            StreamPlan::Encode
        }
    }

    /// The video codec that will be encoded, if video is re-encoded.
    pub fn resolved_video_codec(&self) -> Option<VideoCodec> {
        self.video_codec.or_else(|| self.container.default_video_codec())
    }

    /// The audio codec that will be encoded, if audio is re-encoded.
    pub fn resolved_audio_codec(&self) -> Option<AudioCodec> {
        self.audio_codec.or_else(|| self.container.default_audio_codec())
    }

    /// Whether the video settings ask for anything beyond a straight
    /// re-encode.
    fn has_video_settings(&self) -> bool {
        self.video_codec.is_some()
            || self.video_bit_rate.is_some()
            || self.crf.is_some()
            || self.width.is_some()
            || self.height.is_some()
            || self.frame_rate.is_some()
            || self.pixel_format.is_some()
            || self.crop.is_some()
            || !self.filters.is_empty()
    }

    /// Check the config for contradictions.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::InvalidConfiguration`] describing the first
    /// problem found.
    pub fn validate(&self) -> Result<(), ConvertError> {
        let invalid = |reason: String| Err(ConvertError::InvalidConfiguration(reason));

        if self.input == self.output {
            return invalid("input and output must be different files".to_string());
        }

        for (name, value) in [("start", self.start_time), ("end", self.end_time)] {
            if let Some(seconds) = value
                && (!seconds.is_finite() || seconds < 0.0)
            {
                return invalid(format!("{name} time must be a non-negative number, got {seconds}"));
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time)
            && start >= end
        {
            return invalid(format!("start time ({start}s) must be before end time ({end}s)"));
        }

        if self.width == Some(0) || self.height == Some(0) {
            return invalid("output dimensions must be greater than zero".to_string());
        }
        if let Some(fps) = self.frame_rate
            && (!fps.is_finite() || fps <= 0.0)
        {
            return invalid(format!("frame rate must be positive, got {fps}"));
        }
        if self.sample_rate == Some(0) || self.channels == Some(0) {
            return invalid("sample rate and channel count must be greater than zero".to_string());
        }
        if let Some(gain) = self.audio_gain_db
            && !gain.is_finite()
        {
            return invalid("audio gain must be a finite number".to_string());
        }
        if let Some(crop) = &self.crop
            && (crop.width == 0 || crop.height == 0)
        {
            return invalid("crop rectangle must have a non-zero size".to_string());
        }

        if let (Some(crf), Some(codec)) = (self.crf, self.resolved_video_codec())
            && let Some((low, high)) = codec.crf_range()
            && !(low..=high).contains(&crf)
        {
            return invalid(format!("CRF {crf} is outside {low}..={high} for {codec:?}"));
        }

        if self.video_plan() == StreamPlan::Strip && self.audio_plan() == StreamPlan::Strip {
            return invalid("both video and audio are stripped; nothing to write".to_string());
        }

        if !self.container.supports_video() && !self.strip_video && self.has_video_settings() {
            return invalid(format!(
                "{} output cannot carry video; remove the video settings or strip video",
                self.container
            ));
        }

        if self.copy_video && self.video_plan() == StreamPlan::Copy && self.has_video_settings() {
            return invalid("video settings have no effect when copying the video stream".to_string());
        }

        if !self.filters.is_empty()
            && self.video_plan() == StreamPlan::Encode
            && self.resolved_video_codec() == Some(VideoCodec::Gif)
        {
            return invalid("custom video filters cannot be combined with GIF palette output".to_string());
        }

        Ok(())
    }

    /// Output dimensions for a source of `source_width` x `source_height`
    /// (after cropping).
    ///
    /// When `even` is set both dimensions are rounded down to even numbers,
    /// which 4:2:0 encoders require.
    pub fn resolve_dimensions(&self, source_width: u32, source_height: u32, even: bool) -> (u32, u32) {
        let (width, height) = resolve_dimensions(self.width, self.height, source_width, source_height);
        if even {
            (round_to_even(width), round_to_even(height))
        } else {
            (width, height)
        }
    }
}

/// Resolve a requested size against a source size, preserving the aspect
/// ratio when only one dimension is given.
pub(crate) fn resolve_dimensions(
    width: Option<u32>,
    height: Option<u32>,
    source_width: u32,
    source_height: u32,
) -> (u32, u32) {
    match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) if source_width > 0 => {
            let ratio = w as f64 / source_width as f64;
            let h = (source_height as f64 * ratio).round() as u32;
            (w, h.max(1))
        }
        (None, Some(h)) if source_height > 0 => {
            let ratio = h as f64 / source_height as f64;
            let w = (source_width as f64 * ratio).round() as u32;
            (w.max(1), h)
        }
        (Some(w), None) => (w, source_height),
        (None, Some(h)) => (source_width, h),
        (None, None) => (source_width, source_height),
    }
}

pub(crate) fn round_to_even(value: u32) -> u32 {
    (value & !1).max(2)
}

/// A user's conversion intent, as collected by a front end.
///
/// Translate into a [`TranscodingConfig`] with
/// [`into_config`](ConversionRequest::into_config). Explicit CRF or bit rate
/// values always win over the quality preset.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    input: PathBuf,
    output: PathBuf,
    format: Option<ContainerFormat>,
    quality: QualityPreset,
    start_time: Option<f64>,
    end_time: Option<f64>,
    crop: Option<CropRect>,
    target_width: Option<u32>,
    target_height: Option<u32>,
    frame_rate: Option<f64>,
    video_codec: Option<VideoCodec>,
    audio_codec: Option<AudioCodec>,
    video_bit_rate: Option<u64>,
    crf: Option<u32>,
    audio_bit_rate: Option<u64>,
    keep_original_video: bool,
    keep_original_audio: bool,
    remove_video: bool,
    remove_audio: bool,
    prefer_hardware: bool,
}

impl ConversionRequest {
    /// Start a request converting `input` into `output`.
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(input: P1, output: P2) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            format: None,
            quality: QualityPreset::default(),
            start_time: None,
            end_time: None,
            crop: None,
            target_width: None,
            target_height: None,
            frame_rate: None,
            video_codec: None,
            audio_codec: None,
            video_bit_rate: None,
            crf: None,
            audio_bit_rate: None,
            keep_original_video: false,
            keep_original_audio: false,
            remove_video: false,
            remove_audio: false,
            prefer_hardware: false,
        }
    }

    /// Choose the output container instead of inferring it from the path.
    #[must_use]
    pub fn with_format(mut self, format: ContainerFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Choose a quality preset.
    #[must_use]
    pub fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = quality;
        self
    }

    /// Trim to `[start, end)` seconds.
    #[must_use]
    pub fn with_trim(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Crop the picture.
    #[must_use]
    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Resize to this width, keeping the aspect ratio unless a height is set.
    #[must_use]
    pub fn with_target_width(mut self, width: u32) -> Self {
        self.target_width = Some(width);
        self
    }

    /// Resize to this height, keeping the aspect ratio unless a width is set.
    #[must_use]
    pub fn with_target_height(mut self, height: u32) -> Self {
        self.target_height = Some(height);
        self
    }

    /// Change the frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Encode video with a specific codec.
    #[must_use]
    pub fn with_video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = Some(codec);
        self
    }

    /// Encode audio with a specific codec.
    #[must_use]
    pub fn with_audio_codec(mut self, codec: AudioCodec) -> Self {
        self.audio_codec = Some(codec);
        self
    }

    /// Target a video bit rate instead of a quality level.
    #[must_use]
    pub fn with_video_bit_rate(mut self, bit_rate: u64) -> Self {
        self.video_bit_rate = Some(bit_rate);
        self
    }

    /// Use an explicit CRF instead of the preset's.
    #[must_use]
    pub fn with_crf(mut self, crf: u32) -> Self {
        self.crf = Some(crf);
        self
    }

    /// Use an explicit audio bit rate instead of the preset's.
    #[must_use]
    pub fn with_audio_bit_rate(mut self, bit_rate: u64) -> Self {
        self.audio_bit_rate = Some(bit_rate);
        self
    }

    /// Keep the source video stream as-is.
    #[must_use]
    pub fn keep_original_video(mut self) -> Self {
        self.keep_original_video = true;
        self
    }

    /// Keep the source audio stream as-is.
    #[must_use]
    pub fn keep_original_audio(mut self) -> Self {
        self.keep_original_audio = true;
        self
    }

    /// Drop video from the output.
    #[must_use]
    pub fn remove_video(mut self) -> Self {
        self.remove_video = true;
        self
    }

    /// Drop audio from the output.
    #[must_use]
    pub fn remove_audio(mut self) -> Self {
        self.remove_audio = true;
        self
    }

    /// Prefer hardware encoders and decoders.
    #[must_use]
    pub fn prefer_hardware(mut self, prefer: bool) -> Self {
        self.prefer_hardware = prefer;
        self
    }

    /// Translate the request into a validated [`TranscodingConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::OutputFormatUnsupported`] when no container
    /// was chosen and the output extension is unknown, or
    /// [`ConvertError::InvalidConfiguration`] from
    /// [`TranscodingConfig::validate`].
    pub fn into_config(self) -> Result<TranscodingConfig, ConvertError> {
        let mut config = match self.format {
            Some(format) => TranscodingConfig::with_format(&self.input, &self.output, format),
            None => TranscodingConfig::new(&self.input, &self.output)?,
        };

        config.start_time = self.start_time;
        config.end_time = self.end_time;
        config.prefer_hardware = self.prefer_hardware;
        config.copy_video = self.keep_original_video;
        config.copy_audio = self.keep_original_audio;
        config.strip_video = self.remove_video || !config.container.supports_video();
        config.strip_audio = self.remove_audio || !config.container.supports_audio();

        if !config.strip_video && !config.copy_video {
            config.video_codec = self.video_codec;
            config.crop = self.crop;
            config.width = self.target_width;
            config.height = self.target_height;
            config.frame_rate = self.frame_rate;
            config.video_bit_rate = self.video_bit_rate;
            config.crf = match (self.crf, self.video_bit_rate) {
                (Some(crf), _) => Some(crf),
                (None, Some(_)) => None,
                (None, None) => config
                    .resolved_video_codec()
                    .and_then(|codec| self.quality.crf_for(codec)),
            };
        }

        if !config.strip_audio && !config.copy_audio {
            config.audio_codec = self.audio_codec;
            config.audio_bit_rate = self.audio_bit_rate.or_else(|| {
                config
                    .resolved_audio_codec()
                    .and_then(|codec| self.quality.audio_bit_rate_for(codec))
            });
        }

        config.validate()?;
        log::debug!(
            "Translated conversion request into {:?} job (video={:?}, audio={:?}, crf={:?})",
            config.container,
            config.video_plan(),
            config.audio_plan(),
            config.crf,
        );
        Ok(config)
    }
}

/// Operational settings for a job.
///
/// All fields have sensible defaults: a fresh token, a progress report every
/// ten frames, and codec-chosen thread counts.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub(crate) cancellation: CancellationToken,
    pub(crate) progress_interval: u64,
    pub(crate) threads: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl JobOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            progress_interval: 10,
            threads: 0,
        }
    }

    /// Use an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Report progress every `frames` processed frames (minimum 1).
    #[must_use]
    pub fn with_progress_interval(mut self, frames: u64) -> Self {
        self.progress_interval = frames.max(1);
        self
    }

    /// Hint the number of codec worker threads; 0 lets FFmpeg decide.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// The token polled by the job.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_follow_aspect_ratio() {
        assert_eq!(resolve_dimensions(Some(320), None, 1920, 1080), (320, 180));
        assert_eq!(resolve_dimensions(None, Some(360), 1920, 1080), (640, 360));
        assert_eq!(resolve_dimensions(None, None, 1920, 1080), (1920, 1080));
        assert_eq!(resolve_dimensions(Some(100), Some(50), 1920, 1080), (100, 50));
    }

    #[test]
    fn even_rounding_never_reaches_zero() {
        let config = TranscodingConfig::with_format("a.mov", "b.mp4", ContainerFormat::Mp4)
            .with_resolution(Some(1), None);
        assert_eq!(config.resolve_dimensions(641, 361, true), (2, 2));

        let config = config.with_resolution(Some(321), None);
        assert_eq!(config.resolve_dimensions(640, 360, true), (320, 180));
        assert_eq!(config.resolve_dimensions(640, 360, false), (321, 181));
    }

    #[test]
    fn strip_wins_over_copy_and_codec() {
        let config = TranscodingConfig::with_format("a.mov", "b.mp4", ContainerFormat::Mp4)
            .with_audio_codec(AudioCodec::Opus)
            .copy_audio()
            .strip_audio();
        assert_eq!(config.audio_plan(), StreamPlan::Strip);
        assert_eq!(config.video_plan(), StreamPlan::Encode);
    }

    #[test]
    fn audio_containers_never_plan_video() {
        let config = TranscodingConfig::with_format("a.mp4", "b.flac", ContainerFormat::Flac);
        assert_eq!(config.video_plan(), StreamPlan::Strip);
        assert_eq!(config.resolved_audio_codec(), Some(AudioCodec::Flac));
    }
}
