//! Animated GIF output.
//!
//! [`GifTranscoder`] turns the video stream of any input into an animated
//! GIF. Frames go through a two-pass palette graph (one palette for the whole
//! clip, Bayer-dithered against it) and are numbered 0, 1, 2, ... at the
//! target frame rate, since a GIF has no timestamps of its own beyond
//! per-frame delays.
//!
//! A [`TranscodingConfig`](crate::TranscodingConfig) whose output is `.gif`
//! goes through the same palette lane, sized and paced from the config.
//!
//! # Example
//!
//! ```no_run
//! use convertify::{GifTranscoder, NoOpProgress};
//!
//! GifTranscoder::new("clip.mp4", "clip.gif", 10.0, 320, None, Some(1.0), Some(6.0))
//!     .with_repeat(None)
//!     .run(&NoOpProgress)?;
//! # Ok::<(), convertify::ConvertError>(())
//! ```

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Rational,
    format::{
        Pixel,
        context::{Input, Output},
    },
};

use crate::codec::{self, VideoEncoderSettings};
use crate::config::{JobOptions, resolve_dimensions, round_to_even};
use crate::error::ConvertError;
use crate::filter::{CropRect, PaletteOptions, PaletteStatsMode, palette_chain};
use crate::hardware::{self, CodecFamily, DecoderSetup};
use crate::lane::{Lane, ProgressPoint, PtsMode, VideoEncodeLane, VideoFilterPlan, VideoLaneParts};
use crate::pipeline::{Job, PipelineState, needs_global_header, stream_frame_rate};
use crate::probe::{MediaInfo, StreamDescriptor};
use crate::progress::ProgressCallback;
use crate::timestamp;

/// Default Bayer dither scale; 5 gives the least visible pattern.
pub(crate) const BAYER_SCALE: u8 = 5;

/// Converts a video clip into an animated GIF.
pub struct GifTranscoder {
    input: PathBuf,
    output: PathBuf,
    fps: f64,
    width: u32,
    crop: Option<CropRect>,
    start: Option<f64>,
    end: Option<f64>,
    repeat: Option<u16>,
    stats_mode: PaletteStatsMode,
    options: JobOptions,
    state: PipelineState,
}

impl GifTranscoder {
    /// Describe a GIF job.
    ///
    /// The output height follows the aspect ratio of the (cropped) source,
    /// rounded to an even number.
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(
        input: P1,
        output: P2,
        fps: f64,
        width: u32,
        crop: Option<CropRect>,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            fps,
            width,
            crop,
            start,
            end,
            repeat: None,
            stats_mode: PaletteStatsMode::default(),
            options: JobOptions::default(),
            state: PipelineState::Idle,
        }
    }

    /// How many extra times the animation plays. `None` (the default) loops
    /// forever; `Some(0)` plays once.
    #[must_use]
    pub fn with_repeat(mut self, repeat: Option<u16>) -> Self {
        self.repeat = repeat;
        self
    }

    /// How the palette statistics are gathered.
    #[must_use]
    pub fn with_stats_mode(mut self, mode: PaletteStatsMode) -> Self {
        self.stats_mode = mode;
        self
    }

    /// Replace the job options.
    #[must_use]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.options.cancellation.cancel();
    }

    fn validate(&self) -> Result<(), ConvertError> {
        let invalid = |reason: String| Err(ConvertError::InvalidConfiguration(reason));

        if self.input == self.output {
            return invalid("input and output must be different files".to_string());
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return invalid(format!("GIF frame rate must be positive, got {}", self.fps));
        }
        if self.width == 0 {
            return invalid("GIF width must be greater than zero".to_string());
        }
        for value in [self.start, self.end].into_iter().flatten() {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("trim times must be non-negative, got {value}"));
            }
        }
        if let (Some(start), Some(end)) = (self.start, self.end)
            && start >= end
        {
            return invalid(format!("start time ({start}s) must be before end time ({end}s)"));
        }
        Ok(())
    }

    /// Value of the GIF muxer's `loop` option.
    fn loop_option(&self) -> i32 {
        match self.repeat {
            None => 0,
            Some(0) => -1,
            Some(count) => i32::from(count),
        }
    }

    /// Run the job.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::InvalidConfiguration`] for a bad frame rate, width,
    ///   or trim window, or if this transcoder already ran.
    /// - [`ConvertError::NoVideoStream`] if the input has no video.
    /// - [`ConvertError::Cancelled`] on cancellation.
    /// - Any setup or processing error, see [`ConvertError`].
    pub fn run(&mut self, progress: &dyn ProgressCallback) -> Result<(), ConvertError> {
        if self.state != PipelineState::Idle {
            return Err(ConvertError::InvalidConfiguration(
                "GIF transcoder already ran; create a new one".to_string(),
            ));
        }
        if let Err(error) = self.validate() {
            self.state = PipelineState::Failed;
            return Err(error);
        }

        log::info!(
            "Making GIF {} -> {} ({} fps, {} px wide)",
            self.input.display(),
            self.output.display(),
            self.fps,
            self.width
        );

        let job = Job {
            input: &self.input,
            output: &self.output,
            muxer: "gif",
            muxer_options: vec![("loop", self.loop_option().to_string())],
            start: self.start,
            end: self.end,
            options: &self.options,
        };
        let settings = GifSettings {
            fps: self.fps,
            width: self.width,
            crop: self.crop,
            stats_mode: self.stats_mode,
            threads: self.options.threads,
        };
        job.run(&mut self.state, progress, |input, info, output| {
            settings.build_lane(input, info, output)
        })
    }
}

struct GifSettings {
    fps: f64,
    width: u32,
    crop: Option<CropRect>,
    stats_mode: PaletteStatsMode,
    threads: usize,
}

impl GifSettings {
    fn build_lane(
        &self,
        input: &Input,
        info: &MediaInfo,
        output: &mut Output,
    ) -> Result<Vec<Box<dyn Lane>>, ConvertError> {
        let descriptor = info.video().ok_or(ConvertError::NoVideoStream)?;
        let details = descriptor.video.as_ref().ok_or(ConvertError::NoVideoStream)?;

        let (source_width, source_height) = match self.crop {
            Some(crop) => (crop.width, crop.height),
            None => (details.width, details.height),
        };
        let palette = PaletteOptions {
            crop: self.crop,
            fps: self.fps,
            width: self.width,
            height: gif_height(self.width, source_width, source_height),
            stats_mode: self.stats_mode,
            bayer_scale: BAYER_SCALE,
        };

        let lane = palette_lane(input, output, descriptor, &palette, self.threads)?;
        Ok(vec![Box::new(lane)])
    }
}

/// A lane that encodes one video stream as palette-dithered GIF frames.
///
/// Progress is counted on decoded frames, since palette generation holds
/// every frame back until the end of the clip.
pub(crate) fn palette_lane(
    input: &Input,
    output: &mut Output,
    descriptor: &StreamDescriptor,
    palette: &PaletteOptions,
    threads: usize,
) -> Result<VideoEncodeLane, ConvertError> {
    let details = descriptor.video.as_ref().ok_or(ConvertError::NoVideoStream)?;
    let stream = input.stream(descriptor.index).ok_or(ConvertError::NoVideoStream)?;

    if let Some(crop) = palette.crop
        && !crop.fits_within(details.width, details.height)
    {
        return Err(ConvertError::InvalidConfiguration(format!(
            "crop {}x{}+{}+{} does not fit a {}x{} frame",
            crop.width, crop.height, crop.x, crop.y, details.width, details.height
        )));
    }
    let chain = palette_chain(palette)?;

    let mut context = codec::decoder_context(&stream)?;
    context.set_threading(codec::threading(threads));
    let DecoderSetup { decoder, hardware } = hardware::open_video_decoder(context, false)?;

    let encoder_codec = codec::find_encoder(CodecFamily::Gif.software_encoder(), CodecFamily::Gif)?;
    let frame_rate = timestamp::frame_rate_to_rational(palette.fps);
    let time_base = Rational(frame_rate.denominator(), frame_rate.numerator());
    let settings = VideoEncoderSettings {
        width: palette.width,
        height: palette.height,
        pixel_format: Pixel::PAL8,
        time_base,
        frame_rate: Some(frame_rate),
        bit_rate: None,
        crf: None,
        global_header: needs_global_header(output),
        threads,
    };
    let encoder = codec::open_video_encoder(encoder_codec, &settings)?;
    let output_index = codec::add_encoded_stream(output, encoder_codec, &encoder, time_base)?;

    log::debug!("GIF palette chain: {chain}");

    Ok(VideoEncodeLane::new(VideoLaneParts {
        input_index: descriptor.index,
        output_index,
        input_time_base: stream.time_base(),
        source_frame_rate: stream_frame_rate(&stream),
        decoder,
        hardware_decode: hardware,
        encoder,
        encoder_time_base: time_base,
        filter: VideoFilterPlan::Fixed(chain),
        pts_mode: PtsMode::FrameIndex,
        progress: ProgressPoint::Decoded,
    }))
}

/// Output height for a GIF `width` pixels wide, keeping the source aspect
/// ratio.
pub(crate) fn gif_height(width: u32, source_width: u32, source_height: u32) -> u32 {
    let (_, height) = resolve_dimensions(Some(width), None, source_width, source_height);
    round_to_even(height)
}
