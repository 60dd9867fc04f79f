//! Decoder and encoder setup, and the audio sample FIFO.
//!
//! Helpers here own no job state. They open codecs with the right
//! parameters, translate FFmpeg failures into [`ConvertError`] variants, and
//! pick formats a given encoder accepts.

use std::ptr;

use ffmpeg_next::{
    ChannelLayout, Codec, Dictionary, Rational,
    codec::{
        context::Context as CodecContext,
        threading::{Config as ThreadingConfig, Type as ThreadingType},
    },
    decoder::Audio as AudioDecoder,
    encoder::{Audio as AudioEncoder, Video as VideoEncoder},
    format::{Pixel, Sample, context::Output, stream::Stream},
    frame::Audio as AudioFrame,
};
use ffmpeg_sys_next::{AVAudioFifo, AVSampleFormat};

use crate::error::ConvertError;
use crate::hardware::CodecFamily;

/// Whether an FFmpeg error is the "need more input / output not ready"
/// signal rather than a failure.
pub(crate) fn is_again(error: &ffmpeg_next::Error) -> bool {
    matches!(error, ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN)
}

/// Whether an FFmpeg error is a normal end-of-stream signal.
pub(crate) fn is_end(error: &ffmpeg_next::Error) -> bool {
    matches!(error, ffmpeg_next::Error::Eof)
}

pub(crate) fn threading(threads: usize) -> ThreadingConfig {
    ThreadingConfig {
        kind: ThreadingType::Frame,
        count: threads,
        ..Default::default()
    }
}

/// Open an audio decoder for an input stream.
pub(crate) fn open_audio_decoder(stream: &Stream, threads: usize) -> Result<AudioDecoder, ConvertError> {
    let mut context = decoder_context(stream)?;
    context.set_threading(threading(threads));
    context
        .decoder()
        .audio()
        .map_err(|error| ConvertError::CodecOpenFailed {
            codec: stream.parameters().id().name().to_string(),
            reason: error.to_string(),
        })
}

/// Build a decoder context for an input stream, checking that FFmpeg has a
/// decoder for its codec.
pub(crate) fn decoder_context(stream: &Stream) -> Result<CodecContext, ConvertError> {
    let parameters = stream.parameters();
    let id = parameters.id();
    if ffmpeg_next::decoder::find(id).is_none() {
        return Err(ConvertError::CodecNotFound(format!("no decoder for {}", id.name())));
    }

    let mut context = CodecContext::from_parameters(parameters)?;
    // Keep the stream's time base so decoded timestamps stay in it.
    unsafe {
        (*context.as_mut_ptr()).pkt_timebase = stream.time_base().into();
    }
    Ok(context)
}

/// Find an encoder by name, falling back to any encoder for the family's
/// codec when the named one is not compiled in.
pub(crate) fn find_encoder(name: &str, family: CodecFamily) -> Result<Codec, ConvertError> {
    if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
        return Ok(codec);
    }

    match ffmpeg_next::encoder::find(family.codec_id()) {
        Some(codec) => {
            log::info!("Encoder {name} is not available; using {} instead", codec.name());
            Ok(codec)
        }
        None => Err(ConvertError::CodecNotFound(name.to_string())),
    }
}

/// Private options for a video encoder.
///
/// A bit rate always wins over a quality value. Each encoder family spells
/// its constant-quality knob differently.
pub(crate) fn video_encoder_options(
    encoder: &str,
    crf: Option<u32>,
    bit_rate: Option<u64>,
) -> Vec<(&'static str, String)> {
    let mut options = Vec::new();

    if encoder == "libx264" || encoder == "libx265" {
        options.push(("preset", "medium".to_string()));
    }
    if encoder.starts_with("libvpx") {
        options.push(("deadline", "good".to_string()));
        options.push(("row-mt", "1".to_string()));
    }

    let Some(crf) = crf.filter(|_| bit_rate.is_none()) else {
        return options;
    };

    if encoder == "libx264"
        || encoder == "libx265"
        || encoder.starts_with("libvpx")
        || encoder == "libsvtav1"
        || encoder == "libaom-av1"
    {
        options.push(("crf", crf.to_string()));
        if encoder.starts_with("libvpx") {
            // Constant quality mode needs an explicit zero bit rate.
            options.push(("b", "0".to_string()));
        }
    } else if encoder.ends_with("_nvenc") {
        options.push(("rc", "vbr".to_string()));
        options.push(("cq", crf.to_string()));
    } else if encoder.ends_with("_qsv") {
        options.push(("global_quality", crf.to_string()));
    } else if encoder.ends_with("_amf") {
        options.push(("rc", "cqp".to_string()));
        options.push(("qp_i", crf.to_string()));
        options.push(("qp_p", crf.to_string()));
    }

    options
}

pub(crate) fn dictionary(options: &[(&str, String)]) -> Dictionary<'static> {
    let mut dictionary = Dictionary::new();
    for (key, value) in options {
        dictionary.set(key, value);
    }
    dictionary
}

/// Parameters of a video encoder.
#[derive(Debug, Clone)]
pub(crate) struct VideoEncoderSettings {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pixel_format: Pixel,
    pub(crate) time_base: Rational,
    pub(crate) frame_rate: Option<Rational>,
    pub(crate) bit_rate: Option<u64>,
    pub(crate) crf: Option<u32>,
    pub(crate) global_header: bool,
    pub(crate) threads: usize,
}

/// Open a video encoder.
pub(crate) fn open_video_encoder(
    codec: Codec,
    settings: &VideoEncoderSettings,
) -> Result<VideoEncoder, ConvertError> {
    let name = codec.name().to_string();
    let open_failed = |reason: String| ConvertError::CodecOpenFailed {
        codec: name.clone(),
        reason,
    };

    let mut context = CodecContext::new_with_codec(codec);
    context.set_threading(threading(settings.threads));
    let mut encoder = context
        .encoder()
        .video()
        .map_err(|error| open_failed(error.to_string()))?;

    encoder.set_width(settings.width);
    encoder.set_height(settings.height);
    encoder.set_format(settings.pixel_format);
    encoder.set_time_base(settings.time_base);
    encoder.set_frame_rate(settings.frame_rate);
    if let Some(bit_rate) = settings.bit_rate {
        encoder.set_bit_rate(bit_rate as usize);
    }
    if settings.global_header {
        unsafe {
            (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }

    let options = video_encoder_options(&name, settings.crf, settings.bit_rate);
    log::debug!(
        "Opening {name} at {}x{} {:?} (options {:?})",
        settings.width,
        settings.height,
        settings.pixel_format,
        options
    );

    encoder
        .open_as_with(codec, dictionary(&options))
        .map_err(|error| open_failed(error.to_string()))
}

/// Parameters of an audio encoder.
#[derive(Debug, Clone)]
pub(crate) struct AudioEncoderSettings {
    pub(crate) sample_rate: u32,
    pub(crate) channels: u16,
    pub(crate) sample_format: Sample,
    pub(crate) bit_rate: Option<u64>,
    pub(crate) global_header: bool,
    pub(crate) threads: usize,
}

/// Open an audio encoder. The encoder time base is one tick per sample.
pub(crate) fn open_audio_encoder(
    codec: Codec,
    settings: &AudioEncoderSettings,
) -> Result<AudioEncoder, ConvertError> {
    let name = codec.name().to_string();
    let open_failed = |reason: String| ConvertError::CodecOpenFailed {
        codec: name.clone(),
        reason,
    };

    let mut context = CodecContext::new_with_codec(codec);
    context.set_threading(threading(settings.threads));
    let mut encoder = context
        .encoder()
        .audio()
        .map_err(|error| open_failed(error.to_string()))?;

    encoder.set_rate(settings.sample_rate as i32);
    encoder.set_channel_layout(ChannelLayout::default(i32::from(settings.channels)));
    encoder.set_format(settings.sample_format);
    encoder.set_time_base(Rational(1, settings.sample_rate as i32));
    if let Some(bit_rate) = settings.bit_rate {
        encoder.set_bit_rate(bit_rate as usize);
    }
    if settings.global_header {
        unsafe {
            (*encoder.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
        }
    }

    log::debug!(
        "Opening {name} at {} Hz, {} channels, {:?}",
        settings.sample_rate,
        settings.channels,
        settings.sample_format
    );

    encoder
        .open_as_with(codec, Dictionary::new())
        .map_err(|error| open_failed(error.to_string()))
}

/// Pick a pixel format the encoder accepts: `preferred`, else `source`, else
/// the encoder's first supported format.
pub(crate) fn choose_pixel_format(codec: &Codec, preferred: Option<Pixel>, source: Pixel) -> Pixel {
    let supported: Vec<Pixel> = codec
        .video()
        .ok()
        .and_then(|video| video.formats())
        .map(Iterator::collect)
        .unwrap_or_default();

    if supported.is_empty() {
        return preferred.unwrap_or(source);
    }

    preferred
        .into_iter()
        .chain(std::iter::once(source))
        .find(|format| supported.contains(format))
        .unwrap_or(supported[0])
}

/// Pick a sample format the encoder accepts, keeping the source's when
/// possible.
pub(crate) fn choose_sample_format(codec: &Codec, source: Sample) -> Sample {
    let supported: Vec<Sample> = codec
        .audio()
        .ok()
        .and_then(|audio| audio.formats())
        .map(Iterator::collect)
        .unwrap_or_default();

    if supported.is_empty() || supported.contains(&source) {
        source
    } else {
        supported[0]
    }
}

/// Pick a sample rate the encoder accepts: `wanted` when allowed, else the
/// closest supported rate.
pub(crate) fn choose_sample_rate(codec: &Codec, wanted: u32) -> u32 {
    let supported: Vec<i32> = codec
        .audio()
        .ok()
        .and_then(|audio| audio.rates())
        .map(Iterator::collect)
        .unwrap_or_default();

    closest_rate(&supported, wanted)
}

fn closest_rate(supported: &[i32], wanted: u32) -> u32 {
    supported
        .iter()
        .filter(|rate| **rate > 0)
        .map(|rate| *rate as u32)
        .min_by_key(|rate| rate.abs_diff(wanted))
        .unwrap_or(wanted)
}

/// Add an output stream that carries an input stream's packets unchanged.
///
/// Returns the new stream's index.
pub(crate) fn add_copy_stream(output: &mut Output, input: &Stream) -> Result<usize, ConvertError> {
    let mut stream = output
        .add_stream(ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::None))
        .map_err(|error| ConvertError::MuxingFailed(format!("cannot add stream: {error}")))?;
    stream.set_parameters(input.parameters());
    // Let the muxer pick its own codec tag.
    unsafe {
        (*stream.parameters().as_mut_ptr()).codec_tag = 0;
    }
    stream.set_time_base(input.time_base());
    Ok(stream.index())
}

/// Add an output stream for an opened encoder. Returns the stream's index.
pub(crate) fn add_encoded_stream<P: Into<ffmpeg_next::codec::Parameters>>(
    output: &mut Output,
    codec: Codec,
    parameters: P,
    time_base: Rational,
) -> Result<usize, ConvertError> {
    let mut stream = output
        .add_stream(codec)
        .map_err(|error| ConvertError::MuxingFailed(format!("cannot add stream: {error}")))?;
    stream.set_parameters(parameters);
    stream.set_time_base(time_base);
    Ok(stream.index())
}

/// First-in first-out buffer of audio samples in one format.
///
/// Used to cut resampled audio into the fixed frame size most encoders
/// demand.
pub(crate) struct SampleFifo {
    fifo: *mut AVAudioFifo,
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
}

impl SampleFifo {
    pub(crate) fn new(format: Sample, channels: u16, rate: u32, capacity: usize) -> Result<Self, ConvertError> {
        let fifo = unsafe {
            ffmpeg_sys_next::av_audio_fifo_alloc(
                AVSampleFormat::from(format),
                i32::from(channels),
                capacity.max(1) as i32,
            )
        };
        if fifo.is_null() {
            return Err(ConvertError::EncodingFailed(
                "could not allocate audio sample buffer".to_string(),
            ));
        }

        Ok(Self {
            fifo,
            format,
            layout: ChannelLayout::default(i32::from(channels)),
            rate,
        })
    }

    /// Buffered samples per channel.
    pub(crate) fn len(&self) -> usize {
        unsafe { ffmpeg_sys_next::av_audio_fifo_size(self.fifo).max(0) as usize }
    }

    pub(crate) fn push(&mut self, frame: &AudioFrame) -> Result<(), ConvertError> {
        let samples = frame.samples();
        if samples == 0 {
            return Ok(());
        }

        let written = unsafe {
            ffmpeg_sys_next::av_audio_fifo_write(
                self.fifo,
                (*frame.as_ptr()).extended_data as _,
                samples as i32,
            )
        };
        if written < samples as i32 {
            return Err(ConvertError::EncodingFailed(format!(
                "audio sample buffer accepted {written} of {samples} samples"
            )));
        }
        Ok(())
    }

    /// Take up to `samples` samples as a new frame.
    pub(crate) fn pop(&mut self, samples: usize) -> Result<AudioFrame, ConvertError> {
        let count = samples.min(self.len());
        let mut frame = AudioFrame::new(self.format, count, self.layout);
        frame.set_rate(self.rate);

        let read = unsafe {
            ffmpeg_sys_next::av_audio_fifo_read(
                self.fifo,
                (*frame.as_mut_ptr()).extended_data as _,
                count as i32,
            )
        };
        if read < count as i32 {
            return Err(ConvertError::EncodingFailed(format!(
                "audio sample buffer returned {read} of {count} samples"
            )));
        }
        Ok(frame)
    }
}

impl Drop for SampleFifo {
    fn drop(&mut self) {
        unsafe { ffmpeg_sys_next::av_audio_fifo_free(self.fifo) };
        self.fifo = ptr::null_mut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option<'a>(options: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        options
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn software_encoders_use_crf() {
        let options = video_encoder_options("libx264", Some(23), None);
        assert_eq!(option(&options, "crf"), Some("23"));
        assert_eq!(option(&options, "preset"), Some("medium"));

        let options = video_encoder_options("libvpx-vp9", Some(32), None);
        assert_eq!(option(&options, "crf"), Some("32"));
        assert_eq!(option(&options, "b"), Some("0"));
    }

    #[test]
    fn hardware_encoders_use_their_own_knob() {
        assert_eq!(option(&video_encoder_options("h264_nvenc", Some(20), None), "cq"), Some("20"));
        assert_eq!(
            option(&video_encoder_options("hevc_qsv", Some(25), None), "global_quality"),
            Some("25")
        );
        assert_eq!(option(&video_encoder_options("h264_amf", Some(22), None), "qp_p"), Some("22"));
        assert!(video_encoder_options("h264_videotoolbox", Some(22), None).is_empty());
    }

    #[test]
    fn bit_rate_suppresses_quality_options() {
        let options = video_encoder_options("libx264", Some(23), Some(2_000_000));
        assert_eq!(option(&options, "crf"), None);
    }

    #[test]
    fn closest_supported_rate() {
        assert_eq!(closest_rate(&[8_000, 16_000, 24_000, 48_000], 44_100), 48_000);
        assert_eq!(closest_rate(&[], 44_100), 44_100);
        assert_eq!(closest_rate(&[44_100, 48_000], 44_100), 44_100);
    }
}
