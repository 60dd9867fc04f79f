//! The transcoding pipeline.
//!
//! A [`Pipeline`] runs one [`TranscodingConfig`] to completion on the calling
//! thread. Jobs move through [`PipelineState`] strictly in order:
//!
//! ```text
//! Idle -> InputOpened -> OutputConfigured -> HeaderWritten -> Processing
//!      -> Completed | Failed | Cancelled
//! ```
//!
//! There is no retry in place. A failed or cancelled job leaves the pipeline
//! in a terminal state; build a new one from a (possibly modified) config to
//! try again.
//!
//! Every native handle a job acquires (demuxer, muxer, codecs, filter
//! graphs, resamplers) is owned by values local to the run, so all of them
//! are released on every exit path. When a job fails or is cancelled after
//! the output file was created, that file is removed.
//!
//! # Example
//!
//! ```no_run
//! use convertify::{Pipeline, TranscodingConfig, TranscodingProgress};
//!
//! let config = TranscodingConfig::new("input.mov", "output.mp4")?.with_trim(Some(2.0), Some(7.0));
//! let mut pipeline = Pipeline::new(config);
//! pipeline.transcode(&|progress: &TranscodingProgress| {
//!     println!("{:.0}%", progress.percentage * 100.0);
//! })?;
//! # Ok::<(), convertify::ConvertError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use ffmpeg_next::{
    Dictionary, Packet, Rational,
    format::{
        Flags as FormatFlags, Pixel,
        context::{Input, Output},
    },
};

use crate::codec::{self, AudioEncoderSettings, VideoEncoderSettings};
use crate::config::{JobOptions, StreamPlan, TranscodingConfig, VideoCodec};
use crate::error::ConvertError;
use crate::filter::{AudioTransform, PaletteOptions, PaletteStatsMode, VideoTransform};
use crate::gif;
use crate::hardware::{self, DecoderSetup};
use crate::lane::{
    AudioEncodeLane, AudioLaneParts, CopyLane, Lane, PacketSink, ProgressPoint, PtsMode, Timeline,
    VideoEncodeLane, VideoFilterPlan, VideoLaneParts,
};
use crate::probe::{self, MediaInfo, StreamDescriptor};
use crate::progress::{CancellationToken, ProgressCallback, ProgressTracker};
use crate::timestamp;

/// Lifecycle of a transcoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Created, not yet run.
    Idle,
    /// The input container is open and described.
    InputOpened,
    /// Output streams and codecs are set up.
    OutputConfigured,
    /// The container header has been written.
    HeaderWritten,
    /// Packets are being processed.
    Processing,
    /// The output was finalized successfully.
    Completed,
    /// The job stopped with an error.
    Failed,
    /// The job was cancelled.
    Cancelled,
}

impl PipelineState {
    /// Whether the job can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Runs one transcoding job.
pub struct Pipeline {
    config: TranscodingConfig,
    options: JobOptions,
    state: PipelineState,
}

impl Pipeline {
    /// Create a pipeline with default [`JobOptions`].
    pub fn new(config: TranscodingConfig) -> Self {
        Self {
            config,
            options: JobOptions::default(),
            state: PipelineState::Idle,
        }
    }

    /// Replace the job options (cancellation token, progress cadence,
    /// codec threads).
    #[must_use]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// The config this pipeline runs.
    pub fn config(&self) -> &TranscodingConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// A handle that cancels this job from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.options.cancellation.clone()
    }

    /// Request cancellation. Observed before the next packet is read.
    pub fn cancel(&self) {
        self.options.cancellation.cancel();
    }

    /// Run the job, blocking until it completes, fails, or is cancelled.
    ///
    /// `progress` is called every few processed frames (see
    /// [`JobOptions::with_progress_interval`]) and once more on success.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::InvalidConfiguration`] if the config is
    ///   inconsistent or this pipeline has already run.
    /// - [`ConvertError::Cancelled`] if cancellation was requested.
    /// - Any setup or processing error, see [`ConvertError`].
    pub fn transcode(&mut self, progress: &dyn ProgressCallback) -> Result<(), ConvertError> {
        if self.state != PipelineState::Idle {
            return Err(ConvertError::InvalidConfiguration(format!(
                "pipeline already ran (state {:?}); create a new one",
                self.state
            )));
        }
        if let Err(error) = self.config.validate() {
            self.state = PipelineState::Failed;
            return Err(error);
        }

        log::info!(
            "Transcoding {} -> {} ({})",
            self.config.input.display(),
            self.config.output.display(),
            self.config.container
        );

        let job = Job {
            input: &self.config.input,
            output: &self.config.output,
            muxer: self.config.container.muxer_name(),
            muxer_options: Vec::new(),
            start: self.config.start_time,
            end: self.config.end_time,
            options: &self.options,
        };
        let config = &self.config;
        let options = &self.options;
        job.run(&mut self.state, progress, |input, info, output| {
            build_lanes(config, options, input, info, output)
        })
    }
}

/// Transcode `config` with default [`JobOptions`].
///
/// # Errors
///
/// See [`Pipeline::transcode`].
pub fn transcode(config: TranscodingConfig, progress: &dyn ProgressCallback) -> Result<(), ConvertError> {
    Pipeline::new(config).transcode(progress)
}

/// Transcode `config` with explicit [`JobOptions`].
///
/// # Errors
///
/// See [`Pipeline::transcode`].
pub fn transcode_with_options(
    config: TranscodingConfig,
    options: JobOptions,
    progress: &dyn ProgressCallback,
) -> Result<(), ConvertError> {
    Pipeline::new(config).with_options(options).transcode(progress)
}

/// The container-level half of a job, shared by every front door.
pub(crate) struct Job<'a> {
    pub(crate) input: &'a Path,
    pub(crate) output: &'a Path,
    pub(crate) muxer: &'a str,
    pub(crate) muxer_options: Vec<(&'static str, String)>,
    pub(crate) start: Option<f64>,
    pub(crate) end: Option<f64>,
    pub(crate) options: &'a JobOptions,
}

impl Job<'_> {
    /// Run the job, tracking `state`, and remove a partial output on failure
    /// or cancellation.
    pub(crate) fn run<F>(
        &self,
        state: &mut PipelineState,
        progress: &dyn ProgressCallback,
        build: F,
    ) -> Result<(), ConvertError>
    where
        F: FnOnce(&Input, &MediaInfo, &mut Output) -> Result<Vec<Box<dyn Lane>>, ConvertError>,
    {
        let mut partial = PartialOutput::new(self.output);
        let result = self.execute(state, &mut partial, progress, build);

        match &result {
            Ok(()) => *state = PipelineState::Completed,
            Err(error) => {
                *state = if error.is_cancelled() {
                    log::info!("Transcoding of {} cancelled", self.input.display());
                    PipelineState::Cancelled
                } else {
                    log::warn!("Transcoding of {} failed: {error}", self.input.display());
                    PipelineState::Failed
                };
                partial.discard();
            }
        }

        result
    }

    fn execute<F>(
        &self,
        state: &mut PipelineState,
        partial: &mut PartialOutput<'_>,
        progress: &dyn ProgressCallback,
        build: F,
    ) -> Result<(), ConvertError>
    where
        F: FnOnce(&Input, &MediaInfo, &mut Output) -> Result<Vec<Box<dyn Lane>>, ConvertError>,
    {
        let mut input = probe::open_input(self.input)?;
        let info = probe::describe(&mut input, self.input)?;
        *state = PipelineState::InputOpened;

        let mut output =
            ffmpeg_next::format::output_as(self.output, self.muxer).map_err(|error| {
                ConvertError::OutputOpenFailed {
                    path: self.output.to_path_buf(),
                    reason: error.to_string(),
                }
            })?;
        partial.mark_created();

        let mut lanes = build(&input, &info, &mut output)?;
        if lanes.is_empty() {
            return Err(ConvertError::NoStreamsFound {
                path: self.input.to_path_buf(),
            });
        }
        *state = PipelineState::OutputConfigured;

        if let Some(start) = self.start.filter(|start| *start > 0.0) {
            let target = timestamp::seconds_to_microseconds(start);
            input
                .seek(target, ..target)
                .map_err(|error| ConvertError::DecodingFailed(format!("seek to {start}s failed: {error}")))?;
            log::debug!("Seeked to keyframe at or before {start}s");
        }

        let mut muxer_options = Dictionary::new();
        for (key, value) in &self.muxer_options {
            muxer_options.set(key, value);
        }
        output
            .write_header_with(muxer_options)
            .map_err(|error| ConvertError::HeaderWriteFailed(error.to_string()))?;
        *state = PipelineState::HeaderWritten;

        let time_bases: Vec<Rational> = input.streams().map(|stream| stream.time_base()).collect();
        let expected = expected_duration(info.duration, self.start, self.end);
        let tracker = ProgressTracker::new(progress, expected, self.options.progress_interval);
        let mut timeline = Timeline::new(self.start, self.end);

        *state = PipelineState::Processing;
        let (mut tracker, bytes_written) = {
            let mut sink = PacketSink::new(&mut output, tracker);
            read_packets(
                &mut input,
                &mut lanes,
                &mut sink,
                &mut timeline,
                &time_bases,
                &self.options.cancellation,
            )?;

            for lane in &mut lanes {
                lane.finish(&mut sink, &timeline)?;
            }
            sink.into_tracker()
        };

        output
            .write_trailer()
            .map_err(|error| ConvertError::MuxingFailed(format!("cannot write trailer: {error}")))?;
        tracker.finish(bytes_written);

        log::info!(
            "Wrote {} ({} frames, {} bytes)",
            self.output.display(),
            tracker.frame_count(),
            bytes_written
        );
        Ok(())
    }
}

// The demux loop. Cancellation is polled once per packet.
fn read_packets(
    input: &mut Input,
    lanes: &mut [Box<dyn Lane>],
    sink: &mut PacketSink<'_, '_>,
    timeline: &mut Timeline,
    time_bases: &[Rational],
    cancellation: &CancellationToken,
) -> Result<(), ConvertError> {
    loop {
        if cancellation.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let mut packet = Packet::empty();
        match packet.read(input) {
            Ok(()) => {}
            Err(ffmpeg_next::Error::Eof) => return Ok(()),
            Err(error) => return Err(ConvertError::DecodingFailed(format!("cannot read packet: {error}"))),
        }

        let index = packet.stream();
        let Some(lane) = lanes.iter_mut().find(|lane| lane.input_index() == index) else {
            continue;
        };
        if let Some(time_base) = time_bases.get(index) {
            timeline.observe(&packet, *time_base);
        }
        lane.process(&packet, sink, timeline)?;

        if lanes.iter().all(|lane| lane.is_finished()) {
            log::debug!("Reached end of trim window");
            return Ok(());
        }
    }
}

/// Length of the output the job is expected to produce, for progress.
pub(crate) fn expected_duration(total: Duration, start: Option<f64>, end: Option<f64>) -> Duration {
    let mut expected = total;
    if let Some(end) = end.map(timestamp::seconds_to_duration) {
        expected = if expected.is_zero() { end } else { expected.min(end) };
    }
    if let Some(start) = start.map(timestamp::seconds_to_duration) {
        expected = expected.saturating_sub(start);
    }
    expected
}

/// An output path a job may have written to.
///
/// Only a file the job itself created or truncated is removed on failure; a
/// file that was already at the path before the job opened it is left alone.
pub(crate) struct PartialOutput<'a> {
    path: &'a Path,
    created: bool,
}

impl<'a> PartialOutput<'a> {
    pub(crate) fn new(path: &'a Path) -> Self {
        Self { path, created: false }
    }

    /// Record that the job has opened the path for writing.
    pub(crate) fn mark_created(&mut self) {
        self.created = true;
    }

    /// Remove the output if this job created it.
    pub(crate) fn discard(self) {
        if !self.created {
            return;
        }
        match std::fs::remove_file(self.path) {
            Ok(()) => log::debug!("Removed partial output {}", self.path.display()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => log::warn!("Could not remove partial output {}: {error}", self.path.display()),
        }
    }
}

pub(crate) fn needs_global_header(output: &Output) -> bool {
    output.format().flags().contains(FormatFlags::GLOBAL_HEADER)
}

fn build_lanes(
    config: &TranscodingConfig,
    options: &JobOptions,
    input: &Input,
    info: &MediaInfo,
    output: &mut Output,
) -> Result<Vec<Box<dyn Lane>>, ConvertError> {
    let video_plan = config.video_plan();
    let audio_plan = config.audio_plan();
    let mut lanes: Vec<Box<dyn Lane>> = Vec::new();

    let video = info.video().filter(|_| video_plan != StreamPlan::Strip);
    let audio = info.audio().filter(|_| audio_plan != StreamPlan::Strip);

    if video.is_none() && video_plan != StreamPlan::Strip && (config.copy_video || config.video_codec.is_some()) {
        return Err(ConvertError::NoVideoStream);
    }
    if audio.is_none() && audio_plan != StreamPlan::Strip && (config.copy_audio || config.audio_codec.is_some()) {
        return Err(ConvertError::NoAudioStream);
    }
    if video.is_none() && audio.is_none() {
        return Err(if video_plan == StreamPlan::Strip {
            ConvertError::NoAudioStream
        } else {
            ConvertError::NoVideoStream
        });
    }

    if let Some(descriptor) = video {
        let lane: Box<dyn Lane> = match video_plan {
            StreamPlan::Copy => Box::new(copy_lane(input, output, descriptor, true)?),
            _ => Box::new(video_lane(config, options, input, output, descriptor)?),
        };
        lanes.push(lane);
    }

    if let Some(descriptor) = audio {
        let drives_progress = video.is_none();
        let lane: Box<dyn Lane> = match audio_plan {
            StreamPlan::Copy => Box::new(copy_lane(input, output, descriptor, drives_progress)?),
            _ => Box::new(audio_lane(config, options, input, output, descriptor, drives_progress)?),
        };
        lanes.push(lane);
    }

    Ok(lanes)
}

fn input_stream<'a>(
    input: &'a Input,
    descriptor: &StreamDescriptor,
) -> Result<ffmpeg_next::format::stream::Stream<'a>, ConvertError> {
    input.stream(descriptor.index).ok_or_else(|| ConvertError::StreamInfoUnavailable {
        path: std::path::PathBuf::new(),
        reason: format!("stream {} disappeared", descriptor.index),
    })
}

fn copy_lane(
    input: &Input,
    output: &mut Output,
    descriptor: &StreamDescriptor,
    drives_progress: bool,
) -> Result<CopyLane, ConvertError> {
    let stream = input_stream(input, descriptor)?;
    let output_index = codec::add_copy_stream(output, &stream)?;
    log::debug!(
        "Copying {:?} stream {} ({}) to output stream {output_index}",
        descriptor.kind,
        descriptor.index,
        descriptor.codec
    );
    Ok(CopyLane::new(descriptor.index, output_index, stream.time_base(), drives_progress))
}

/// Parse an FFmpeg pixel format name.
pub(crate) fn parse_pixel_format(name: &str) -> Result<Pixel, ConvertError> {
    match name.parse::<Pixel>() {
        Ok(Pixel::None) | Err(_) => Err(ConvertError::InvalidConfiguration(format!(
            "unknown pixel format '{name}'"
        ))),
        Ok(format) => Ok(format),
    }
}

/// A usable frame rate: the stream's average rate, else its base rate.
pub(crate) fn stream_frame_rate(stream: &ffmpeg_next::format::stream::Stream<'_>) -> Option<Rational> {
    [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .find(|rate| timestamp::frames_per_second(*rate).is_some())
}

/// Frame rate of a GIF when neither the config nor the source has one.
const DEFAULT_GIF_FPS: f64 = 10.0;

/// Palette settings for GIF output described by a [`TranscodingConfig`].
///
/// Size follows the config like any other video output, without rounding to
/// even numbers. The frame rate is the config's, else the source's.
pub(crate) fn gif_palette_options(
    config: &TranscodingConfig,
    source_width: u32,
    source_height: u32,
    source_rate: Option<Rational>,
) -> PaletteOptions {
    let (width, height) = match config.crop {
        Some(crop) => config.resolve_dimensions(crop.width, crop.height, false),
        None => config.resolve_dimensions(source_width, source_height, false),
    };
    let fps = config
        .frame_rate
        .or_else(|| source_rate.and_then(timestamp::frames_per_second))
        .unwrap_or(DEFAULT_GIF_FPS);

    PaletteOptions {
        crop: config.crop,
        fps,
        width,
        height,
        stats_mode: PaletteStatsMode::default(),
        bayer_scale: gif::BAYER_SCALE,
    }
}

fn video_lane(
    config: &TranscodingConfig,
    options: &JobOptions,
    input: &Input,
    output: &mut Output,
    descriptor: &StreamDescriptor,
) -> Result<VideoEncodeLane, ConvertError> {
    let stream = input_stream(input, descriptor)?;
    let details = descriptor.video.as_ref().ok_or(ConvertError::NoVideoStream)?;

    if config.resolved_video_codec() == Some(VideoCodec::Gif) {
        let palette = gif_palette_options(config, details.width, details.height, stream_frame_rate(&stream));
        log::debug!(
            "Video stream {} ({}) -> GIF {}x{} at {} fps",
            descriptor.index,
            descriptor.codec,
            palette.width,
            palette.height,
            palette.fps
        );
        return gif::palette_lane(input, output, descriptor, &palette, options.threads);
    }

    let mut context = codec::decoder_context(&stream)?;
    context.set_threading(codec::threading(options.threads));
    let DecoderSetup { decoder, hardware } = hardware::open_video_decoder(context, config.prefer_hardware)?;

    let video_codec = config.resolved_video_codec().ok_or_else(|| {
        ConvertError::OutputFormatUnsupported(format!("{} has no video codec", config.container))
    })?;
    let choice = hardware::select_encoder(video_codec.family(), config.prefer_hardware);
    let encoder_codec = codec::find_encoder(choice.name, video_codec.family())?;

    let (source_width, source_height) = match &config.crop {
        Some(crop) => (crop.width, crop.height),
        None => (details.width, details.height),
    };
    let (width, height) = config.resolve_dimensions(source_width, source_height, true);

    let preferred = match config.pixel_format.as_deref() {
        Some(name) => Some(parse_pixel_format(name)?),
        None if choice.is_hardware => None,
        None => Some(Pixel::YUV420P),
    };
    let pixel_format = codec::choose_pixel_format(&encoder_codec, preferred, details.pixel_format);

    let source_rate = stream_frame_rate(&stream);
    let target_rate = config.frame_rate.map(timestamp::frame_rate_to_rational).or(source_rate);
    let encoder_time_base = target_rate
        .map(|rate| Rational(rate.denominator(), rate.numerator()))
        .unwrap_or_else(|| stream.time_base());

    let settings = VideoEncoderSettings {
        width,
        height,
        pixel_format,
        time_base: encoder_time_base,
        frame_rate: target_rate,
        bit_rate: config.video_bit_rate,
        crf: config.crf,
        global_header: needs_global_header(output),
        threads: options.threads,
    };
    let encoder = codec::open_video_encoder(encoder_codec, &settings)?;
    let output_index = codec::add_encoded_stream(output, encoder_codec, &encoder, encoder_time_base)?;

    log::debug!(
        "Video stream {} ({}) -> {} {width}x{height} {pixel_format:?}{}",
        descriptor.index,
        descriptor.codec,
        choice.name,
        if hardware { " (hardware decode)" } else { "" }
    );

    let transform = VideoTransform {
        crop: config.crop,
        frame_rate: config.frame_rate,
        scale: Some((width, height)),
        pixel_format: Some(crate::lane::pixel_name(pixel_format)),
    };

    Ok(VideoEncodeLane::new(VideoLaneParts {
        input_index: descriptor.index,
        output_index,
        input_time_base: stream.time_base(),
        source_frame_rate: source_rate,
        decoder,
        hardware_decode: hardware,
        encoder,
        encoder_time_base,
        filter: VideoFilterPlan::Transform {
            transform,
            extra: config.filters.clone(),
        },
        pts_mode: PtsMode::Source,
        progress: ProgressPoint::Encoded,
    }))
}

fn audio_lane(
    config: &TranscodingConfig,
    options: &JobOptions,
    input: &Input,
    output: &mut Output,
    descriptor: &StreamDescriptor,
    drives_progress: bool,
) -> Result<AudioEncodeLane, ConvertError> {
    let stream = input_stream(input, descriptor)?;
    let details = descriptor.audio.as_ref().ok_or(ConvertError::NoAudioStream)?;
    let decoder = codec::open_audio_decoder(&stream, options.threads)?;

    let audio_codec = config.resolved_audio_codec().ok_or_else(|| {
        ConvertError::OutputFormatUnsupported(format!("{} has no audio codec", config.container))
    })?;
    let choice = hardware::select_encoder(audio_codec.family(), false);
    let encoder_codec = codec::find_encoder(choice.name, audio_codec.family())?;

    let wanted_rate = config.sample_rate.unwrap_or(details.sample_rate);
    let sample_rate = codec::choose_sample_rate(&encoder_codec, wanted_rate);
    let channels = config.channels.unwrap_or(details.channels).max(1);
    let sample_format = codec::choose_sample_format(&encoder_codec, details.sample_format);
    let bit_rate = if audio_codec.is_lossless() {
        None
    } else {
        config.audio_bit_rate.or(audio_codec.default_bit_rate())
    };

    let settings = AudioEncoderSettings {
        sample_rate,
        channels,
        sample_format,
        bit_rate,
        global_header: needs_global_header(output),
        threads: options.threads,
    };
    let encoder = codec::open_audio_encoder(encoder_codec, &settings)?;
    let output_index =
        codec::add_encoded_stream(output, encoder_codec, &encoder, Rational(1, sample_rate as i32))?;

    log::debug!(
        "Audio stream {} ({}) -> {} {sample_rate} Hz x{channels} {sample_format:?}",
        descriptor.index,
        descriptor.codec,
        choice.name
    );

    // Rate and layout changes the encoder needs are left to the resampler;
    // the graph only carries what the user asked for.
    let transform = AudioTransform {
        sample_rate: config.sample_rate,
        channels: config.channels,
        gain_db: config.audio_gain_db,
    };

    AudioEncodeLane::new(AudioLaneParts {
        input_index: descriptor.index,
        output_index,
        input_time_base: stream.time_base(),
        decoder,
        encoder,
        encoder_rate: sample_rate,
        encoder_format: sample_format,
        encoder_channels: channels,
        transform,
        drives_progress,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_duration_follows_trim_window() {
        let total = Duration::from_secs(10);
        assert_eq!(expected_duration(total, None, None), total);
        assert_eq!(expected_duration(total, Some(2.0), Some(7.0)), Duration::from_secs(5));
        assert_eq!(expected_duration(total, None, Some(30.0)), total);
        assert_eq!(expected_duration(total, Some(4.0), None), Duration::from_secs(6));
        assert_eq!(expected_duration(Duration::ZERO, Some(1.0), Some(3.0)), Duration::from_secs(2));
    }

    #[test]
    fn terminal_states() {
        assert!(PipelineState::Completed.is_terminal());
        assert!(PipelineState::Cancelled.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Processing.is_terminal());
        assert!(!PipelineState::Idle.is_terminal());
    }

    #[test]
    fn second_run_is_rejected() {
        let config = TranscodingConfig::new("in.mp4", "out.mkv").unwrap();
        let mut pipeline = Pipeline::new(config);
        pipeline.state = PipelineState::Failed;
        let error = pipeline.transcode(&crate::progress::NoOpProgress).unwrap_err();
        assert!(matches!(error, ConvertError::InvalidConfiguration(_)));
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn invalid_config_fails_before_touching_files() {
        let config = TranscodingConfig::new("in.mp4", "out.mp4")
            .unwrap()
            .with_trim(Some(5.0), Some(2.0));
        let mut pipeline = Pipeline::new(config);
        let error = pipeline.transcode(&crate::progress::NoOpProgress).unwrap_err();
        assert!(matches!(error, ConvertError::InvalidConfiguration(_)));
        assert_eq!(pipeline.state(), PipelineState::Failed);
    }

    #[test]
    fn gif_palette_follows_config() {
        let config = TranscodingConfig::new("in.mp4", "out.gif")
            .unwrap()
            .with_resolution(Some(160), None)
            .with_frame_rate(10.0);
        let palette = gif_palette_options(&config, 640, 360, Some(Rational(30, 1)));
        assert_eq!((palette.width, palette.height), (160, 90));
        assert_eq!(palette.fps, 10.0);
        assert_eq!(palette.bayer_scale, gif::BAYER_SCALE);

        let chain = crate::filter::palette_chain(&palette).unwrap();
        assert!(chain.contains("palettegen"), "{chain}");
        assert!(chain.contains("paletteuse"), "{chain}");
    }

    #[test]
    fn gif_palette_rate_falls_back() {
        let config = TranscodingConfig::new("in.mp4", "out.gif").unwrap();
        let palette = gif_palette_options(&config, 321, 241, Some(Rational(25, 1)));
        assert_eq!((palette.width, palette.height), (321, 241));
        assert_eq!(palette.fps, 25.0);

        let palette = gif_palette_options(&config, 320, 240, None);
        assert_eq!(palette.fps, DEFAULT_GIF_FPS);

        let config = config.with_crop(crate::filter::CropRect::new(0, 0, 200, 100));
        let palette = gif_palette_options(&config, 640, 360, None);
        assert_eq!((palette.width, palette.height), (200, 100));
    }

    #[test]
    fn untouched_output_survives_discard() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("existing.mp4");
        std::fs::write(&path, b"keep me").unwrap();

        PartialOutput::new(&path).discard();
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn created_output_is_discarded() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("partial.mp4");
        std::fs::write(&path, b"half a file").unwrap();

        let mut partial = PartialOutput::new(&path);
        partial.mark_created();
        partial.discard();
        assert!(!path.exists());

        // Already gone is fine.
        let mut partial = PartialOutput::new(&path);
        partial.mark_created();
        partial.discard();
    }
}
