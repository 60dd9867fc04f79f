//! Still image output.
//!
//! [`ImageTranscoder`] decodes the first video frame of an input (a photo,
//! a single-image file, or a video), optionally resizes it, and writes it as
//! one image. The job is atomic, so there is no progress reporting.
//!
//! Quality is a number in `0.0..=1.0` and is mapped to each encoder's own
//! scale. For JPEG the quantizer runs the other way (lower is better), so
//! `1.0` becomes quantizer 2 and `0.0` becomes 31.
//!
//! # Example
//!
//! ```no_run
//! use convertify::ImageTranscoder;
//!
//! ImageTranscoder::new("photo.heic", "photo.jpg")
//!     .with_width(1024)
//!     .with_quality(0.8)
//!     .run()?;
//! # Ok::<(), convertify::ConvertError>(())
//! ```

use std::{
    fs::File,
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

use ffmpeg_next::{
    Codec, Packet, Rational,
    codec::context::Context as CodecContext,
    format::{Pixel, context::Output},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::{DynamicImage, RgbaImage};

use crate::codec::{self, is_again, is_end};
use crate::config::resolve_dimensions;
use crate::error::ConvertError;
use crate::hardware::{self, CodecFamily};
use crate::pipeline::{PartialOutput, needs_global_header};
use crate::probe;

/// Largest edge an ICO image can have.
const ICO_MAX_EDGE: u32 = 256;

/// `FF_QP2LAMBDA`: converts a quantizer to FFmpeg's lambda scale.
const QP2LAMBDA: i32 = 118;

/// Output image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// JPEG.
    Jpeg,
    /// PNG.
    Png,
    /// WebP.
    Webp,
    /// HEIC (an HEVC still).
    Heic,
    /// TIFF.
    Tiff,
    /// Windows bitmap.
    Bmp,
    /// Windows icon.
    Ico,
}

impl ImageFormat {
    /// Every image format.
    pub const ALL: [ImageFormat; 7] = [
        ImageFormat::Jpeg,
        ImageFormat::Png,
        ImageFormat::Webp,
        ImageFormat::Heic,
        ImageFormat::Tiff,
        ImageFormat::Bmp,
        ImageFormat::Ico,
    ];

    /// Format for a file extension (case-insensitive).
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::Webp),
            "heic" | "heif" => Some(ImageFormat::Heic),
            "tif" | "tiff" => Some(ImageFormat::Tiff),
            "bmp" => Some(ImageFormat::Bmp),
            "ico" => Some(ImageFormat::Ico),
            _ => None,
        }
    }

    /// Format implied by a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical file extension.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
            ImageFormat::Heic => "heic",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Ico => "ico",
        }
    }

    /// Muxer that writes a single image of this format. FFmpeg has no HEIF
    /// muxer, so HEIC stills go into an ISOBMFF (`mp4`) file.
    fn muxer(self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Heic => "mp4",
            _ => "image2",
        }
    }

    /// Encoder names to try, in order.
    fn encoders(self) -> &'static [&'static str] {
        match self {
            ImageFormat::Jpeg => &["mjpeg"],
            ImageFormat::Png => &["png"],
            ImageFormat::Webp => &["libwebp", "libwebp_anim"],
            ImageFormat::Heic => &["libx265", "hevc"],
            ImageFormat::Tiff => &["tiff"],
            ImageFormat::Bmp => &["bmp"],
            ImageFormat::Ico => &[],
        }
    }

    fn preferred_pixel_format(self) -> Pixel {
        match self {
            ImageFormat::Jpeg => Pixel::YUVJ420P,
            ImageFormat::Png | ImageFormat::Tiff => Pixel::RGB24,
            ImageFormat::Bmp => Pixel::BGR24,
            ImageFormat::Webp | ImageFormat::Heic => Pixel::YUV420P,
            ImageFormat::Ico => Pixel::RGBA,
        }
    }

    /// Whether an even width and height are required.
    fn needs_even_dimensions(self) -> bool {
        matches!(self, ImageFormat::Heic | ImageFormat::Webp)
    }
}

/// JPEG quantizer (2 best, 31 worst) for a quality in `0.0..=1.0`.
pub(crate) fn jpeg_qscale(quality: f32) -> i32 {
    let quality = quality.clamp(0.0, 1.0);
    (2.0 + (1.0 - quality) * 29.0).round() as i32
}

/// Encoder options and JPEG lambda for a format at a quality.
pub(crate) fn quality_options(format: ImageFormat, quality: f32) -> (Vec<(&'static str, String)>, Option<i32>) {
    let quality = quality.clamp(0.0, 1.0);
    match format {
        ImageFormat::Jpeg => (Vec::new(), Some(jpeg_qscale(quality) * QP2LAMBDA)),
        ImageFormat::Webp => (
            vec![
                ("quality", format!("{}", (quality * 100.0).round() as u32)),
                ("lossless", "0".to_string()),
            ],
            None,
        ),
        ImageFormat::Heic => (
            vec![
                ("crf", format!("{}", ((1.0 - quality) * 51.0).round() as u32)),
                ("preset", "medium".to_string()),
            ],
            None,
        ),
        ImageFormat::Png | ImageFormat::Tiff | ImageFormat::Bmp | ImageFormat::Ico => (Vec::new(), None),
    }
}

/// Size that fits inside `max` x `max`, keeping the aspect ratio.
pub(crate) fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    if width >= height {
        let scaled = (height as f64 * max as f64 / width as f64).round() as u32;
        (max, scaled.max(1))
    } else {
        let scaled = (width as f64 * max as f64 / height as f64).round() as u32;
        (scaled.max(1), max)
    }
}

/// Converts the first frame of an input into a still image.
#[derive(Debug, Clone)]
#[must_use]
pub struct ImageTranscoder {
    input: PathBuf,
    output: PathBuf,
    width: Option<u32>,
    height: Option<u32>,
    quality: f32,
    format: Option<ImageFormat>,
}

impl ImageTranscoder {
    /// Describe an image job. The format follows the output extension
    /// unless set with [`with_format`](ImageTranscoder::with_format).
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(input: P1, output: P2) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            width: None,
            height: None,
            quality: 0.85,
            format: None,
        }
    }

    /// Target width; the height follows the aspect ratio unless also set.
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    /// Target height; the width follows the aspect ratio unless also set.
    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    /// Quality in `0.0..=1.0` (default 0.85). Ignored by lossless formats.
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    /// Force an output format.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    fn validate(&self) -> Result<ImageFormat, ConvertError> {
        if self.input == self.output {
            return Err(ConvertError::InvalidConfiguration(
                "input and output must be different files".to_string(),
            ));
        }
        if !self.quality.is_finite() || !(0.0..=1.0).contains(&self.quality) {
            return Err(ConvertError::InvalidConfiguration(format!(
                "quality must be between 0.0 and 1.0, got {}",
                self.quality
            )));
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(ConvertError::InvalidConfiguration(
                "output dimensions must be greater than zero".to_string(),
            ));
        }

        self.format
            .or_else(|| ImageFormat::from_path(&self.output))
            .ok_or_else(|| ConvertError::OutputFormatUnsupported(self.output.display().to_string()))
    }

    /// Decode, resize, encode, and write the image.
    ///
    /// # Errors
    ///
    /// - [`ConvertError::InvalidConfiguration`] for bad quality or size.
    /// - [`ConvertError::OutputFormatUnsupported`] if the format cannot be
    ///   inferred or the linked FFmpeg cannot write it.
    /// - [`ConvertError::NoVideoStream`] if the input has no picture.
    /// - Any open, decode, or encode error, see [`ConvertError`].
    pub fn run(&self) -> Result<(), ConvertError> {
        let format = self.validate()?;
        log::info!(
            "Converting {} -> {} ({format:?})",
            self.input.display(),
            self.output.display()
        );

        let frame = self.decode_first_frame()?;
        let (mut width, mut height) = resolve_dimensions(self.width, self.height, frame.width(), frame.height());
        if format == ImageFormat::Ico {
            (width, height) = fit_within(width, height, ICO_MAX_EDGE);
        }
        if format.needs_even_dimensions() {
            width = crate::config::round_to_even(width);
            height = crate::config::round_to_even(height);
        }

        self.write(&frame, format, width, height)
    }

    // Only a file this job opened is removed on failure.
    fn write(&self, frame: &VideoFrame, format: ImageFormat, width: u32, height: u32) -> Result<(), ConvertError> {
        let mut partial = PartialOutput::new(&self.output);
        let result = match format {
            ImageFormat::Ico => self.write_icon(frame, width, height, &mut partial),
            _ => self.write_encoded(frame, format, width, height, &mut partial),
        };
        if result.is_err() {
            partial.discard();
        }
        result
    }

    fn decode_first_frame(&self) -> Result<VideoFrame, ConvertError> {
        let mut input = probe::open_input(&self.input)?;
        let stream = input.streams().best(Type::Video).ok_or(ConvertError::NoVideoStream)?;
        let index = stream.index();
        let context = codec::decoder_context(&stream)?;
        let mut decoder = hardware::open_video_decoder(context, false)?.decoder;

        let mut frame = VideoFrame::empty();
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut input) {
                Ok(()) if packet.stream() == index => match decoder.send_packet(&packet) {
                    Ok(()) => {}
                    Err(error) if is_again(&error) => {}
                    Err(error) => return Err(ConvertError::DecodingFailed(error.to_string())),
                },
                Ok(()) => continue,
                Err(ffmpeg_next::Error::Eof) => {
                    decoder
                        .send_eof()
                        .map_err(|error| ConvertError::DecodingFailed(error.to_string()))?;
                    return match decoder.receive_frame(&mut frame) {
                        Ok(()) => Ok(frame),
                        Err(_) => Err(ConvertError::DecodingFailed("no picture could be decoded".to_string())),
                    };
                }
                Err(error) => return Err(ConvertError::DecodingFailed(error.to_string())),
            }

            match decoder.receive_frame(&mut frame) {
                Ok(()) => {
                    log::debug!(
                        "Decoded first frame: {}x{} {:?}",
                        frame.width(),
                        frame.height(),
                        frame.format()
                    );
                    return Ok(frame);
                }
                Err(error) if is_again(&error) || is_end(&error) => {}
                Err(error) => return Err(ConvertError::DecodingFailed(error.to_string())),
            }
        }
    }

    fn scale(frame: &VideoFrame, format: Pixel, width: u32, height: u32) -> Result<VideoFrame, ConvertError> {
        let mut scaler = ScalingContext::get(
            frame.format(),
            frame.width(),
            frame.height(),
            format,
            width,
            height,
            ScalingFlags::LANCZOS,
        )
        .map_err(|error| ConvertError::EncodingFailed(format!("cannot create scaler: {error}")))?;

        let mut scaled = VideoFrame::empty();
        scaler
            .run(frame, &mut scaled)
            .map_err(|error| ConvertError::EncodingFailed(format!("scaling failed: {error}")))?;
        Ok(scaled)
    }

    fn write_icon(
        &self,
        frame: &VideoFrame,
        width: u32,
        height: u32,
        partial: &mut PartialOutput<'_>,
    ) -> Result<(), ConvertError> {
        let rgba = Self::scale(frame, Pixel::RGBA, width, height)?;
        let stride = rgba.stride(0);
        let row = width as usize * 4;
        let data = rgba.data(0);

        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            pixels.extend_from_slice(&data[y * stride..y * stride + row]);
        }
        let icon = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| ConvertError::EncodingFailed("icon buffer has the wrong size".to_string()))?;

        let mut encoded = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(icon).write_to(&mut encoded, image::ImageFormat::Ico)?;

        let mut file = File::create(&self.output).map_err(|error| ConvertError::OutputOpenFailed {
            path: self.output.clone(),
            reason: error.to_string(),
        })?;
        partial.mark_created();
        file.write_all(encoded.get_ref())?;
        log::debug!("Wrote {width}x{height} icon to {}", self.output.display());
        Ok(())
    }

    fn find_encoder(format: ImageFormat) -> Result<Codec, ConvertError> {
        let found = format
            .encoders()
            .iter()
            .find_map(|name| ffmpeg_next::encoder::find_by_name(name));
        match (found, format) {
            (Some(codec), _) => Ok(codec),
            (None, ImageFormat::Heic) => codec::find_encoder(CodecFamily::Hevc.software_encoder(), CodecFamily::Hevc)
                .map_err(|_| ConvertError::OutputFormatUnsupported("no HEVC encoder for HEIC output".to_string())),
            (None, _) => Err(ConvertError::CodecNotFound(format.encoders().join(" / "))),
        }
    }

    fn write_encoded(
        &self,
        frame: &VideoFrame,
        format: ImageFormat,
        width: u32,
        height: u32,
        partial: &mut PartialOutput<'_>,
    ) -> Result<(), ConvertError> {
        let encoder_codec = Self::find_encoder(format)?;
        let pixel_format =
            codec::choose_pixel_format(&encoder_codec, Some(format.preferred_pixel_format()), frame.format());
        let mut scaled = Self::scale(frame, pixel_format, width, height)?;

        let mut output = ffmpeg_next::format::output_as(&self.output, format.muxer()).map_err(|error| {
            if format == ImageFormat::Heic {
                ConvertError::OutputFormatUnsupported(format!("HEIC output is not available: {error}"))
            } else {
                ConvertError::OutputOpenFailed {
                    path: self.output.clone(),
                    reason: error.to_string(),
                }
            }
        })?;
        partial.mark_created();

        let (options, lambda) = quality_options(format, self.quality);
        let encoder_name = encoder_codec.name().to_string();
        let open_failed = |reason: String| ConvertError::CodecOpenFailed {
            codec: encoder_name.clone(),
            reason,
        };

        let mut encoder = CodecContext::new_with_codec(encoder_codec)
            .encoder()
            .video()
            .map_err(|error| open_failed(error.to_string()))?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(pixel_format);
        encoder.set_time_base(Rational(1, 1));
        unsafe {
            let raw = encoder.as_mut_ptr();
            if let Some(lambda) = lambda {
                (*raw).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_QSCALE as i32;
                (*raw).global_quality = lambda;
            }
            if needs_global_header(&output) {
                (*raw).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }
        let mut encoder = encoder
            .open_as_with(encoder_codec, codec::dictionary(&options))
            .map_err(|error| open_failed(error.to_string()))?;

        let stream_index = codec::add_encoded_stream(&mut output, encoder_codec, &encoder, Rational(1, 1))?;
        let mut header_options = ffmpeg_next::Dictionary::new();
        if format.muxer() == "image2" {
            header_options.set("update", "1");
        }
        output
            .write_header_with(header_options)
            .map_err(|error| ConvertError::HeaderWriteFailed(error.to_string()))?;

        scaled.set_pts(Some(0));
        if let Some(lambda) = lambda {
            unsafe {
                (*scaled.as_mut_ptr()).quality = lambda;
            }
        }

        encoder
            .send_frame(&scaled)
            .map_err(|error| ConvertError::EncodingFailed(error.to_string()))?;
        encoder
            .send_eof()
            .map_err(|error| ConvertError::EncodingFailed(error.to_string()))?;
        write_packets(&mut encoder, &mut output, stream_index)?;

        output
            .write_trailer()
            .map_err(|error| ConvertError::MuxingFailed(format!("cannot write trailer: {error}")))?;
        log::debug!(
            "Wrote {width}x{height} {format:?} ({encoder_name}, {pixel_format:?}) to {}",
            self.output.display()
        );
        Ok(())
    }
}

fn write_packets(
    encoder: &mut ffmpeg_next::encoder::Video,
    output: &mut Output,
    stream_index: usize,
) -> Result<(), ConvertError> {
    let time_base = output
        .stream(stream_index)
        .map(|stream| stream.time_base())
        .unwrap_or(Rational(1, 1));
    loop {
        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                packet.set_stream(stream_index);
                if packet.duration() == 0 {
                    packet.set_duration(1);
                }
                packet.rescale_ts(Rational(1, 1), time_base);
                packet
                    .write_interleaved(output)
                    .map_err(|error| ConvertError::MuxingFailed(error.to_string()))?;
            }
            Err(error) if is_again(&error) || is_end(&error) => return Ok(()),
            Err(error) => return Err(ConvertError::EncodingFailed(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_quantizer_runs_backwards() {
        assert_eq!(jpeg_qscale(1.0), 2);
        assert_eq!(jpeg_qscale(0.0), 31);
        assert_eq!(jpeg_qscale(0.5), 17);
        assert!(jpeg_qscale(0.9) < jpeg_qscale(0.3));
    }

    #[test]
    fn webp_quality_is_a_percentage() {
        let (options, lambda) = quality_options(ImageFormat::Webp, 0.8);
        assert!(options.contains(&("quality", "80".to_string())));
        assert_eq!(lambda, None);

        let (options, lambda) = quality_options(ImageFormat::Jpeg, 1.0);
        assert!(options.is_empty());
        assert_eq!(lambda, Some(2 * QP2LAMBDA));
    }

    #[test]
    fn lossless_formats_take_no_quality() {
        for format in [ImageFormat::Png, ImageFormat::Tiff, ImageFormat::Bmp] {
            assert_eq!(quality_options(format, 0.2), (Vec::new(), None));
        }
    }

    #[test]
    fn extensions() {
        assert_eq!(ImageFormat::from_extension("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("heif"), Some(ImageFormat::Heic));
        assert_eq!(ImageFormat::from_path(Path::new("a/b.tif")), Some(ImageFormat::Tiff));
        assert_eq!(ImageFormat::from_extension("mp4"), None);
        for format in ImageFormat::ALL {
            assert_eq!(ImageFormat::from_extension(format.extension()), Some(format));
        }
    }

    #[test]
    fn icons_fit_in_256() {
        assert_eq!(fit_within(1920, 1080, 256), (256, 144));
        assert_eq!(fit_within(1080, 1920, 256), (144, 256));
        assert_eq!(fit_within(64, 64, 256), (64, 64));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let error = ImageTranscoder::new("in.png", "out.xyz").run().unwrap_err();
        assert!(matches!(error, ConvertError::OutputFormatUnsupported(_)));
    }

    #[test]
    fn heic_goes_into_an_isobmff_file() {
        assert_eq!(ImageFormat::Heic.muxer(), "mp4");
        assert_eq!(ImageFormat::Webp.muxer(), "webp");
        assert_eq!(ImageFormat::Png.muxer(), "image2");
    }

    // A zero-sized target makes the scaler fail before anything is opened.
    #[test]
    fn failed_write_leaves_existing_file_alone() {
        ffmpeg_next::init().unwrap();
        let directory = tempfile::tempdir().unwrap();
        let frame = VideoFrame::new(Pixel::RGB24, 64, 48);

        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Ico] {
            let output = directory.path().join(format!("keep.{}", format.extension()));
            std::fs::write(&output, b"previous image").unwrap();

            let result = ImageTranscoder::new("in.png", &output).write(&frame, format, 0, 0);
            assert!(result.is_err(), "{format:?}");
            assert_eq!(std::fs::read(&output).unwrap(), b"previous image", "{format:?}");
        }
    }

    #[test]
    fn icon_replaces_existing_file() {
        ffmpeg_next::init().unwrap();
        let directory = tempfile::tempdir().unwrap();
        let output = directory.path().join("icon.ico");
        std::fs::write(&output, b"previous image").unwrap();

        let frame = VideoFrame::new(Pixel::RGB24, 64, 48);
        ImageTranscoder::new("in.png", &output)
            .write(&frame, ImageFormat::Ico, 32, 24)
            .unwrap();
        assert_eq!(image::image_dimensions(&output).unwrap(), (32, 24));
    }

    #[test]
    fn quality_out_of_range_is_rejected() {
        let error = ImageTranscoder::new("in.png", "out.jpg")
            .with_quality(1.5)
            .run()
            .unwrap_err();
        assert!(matches!(error, ConvertError::InvalidConfiguration(_)));
    }
}
