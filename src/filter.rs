//! Filter-chain text generation.
//!
//! Everything here is pure string building; nothing touches FFmpeg. The
//! chains are handed to [`graph`](crate::graph) which wires them between a
//! buffer source and a buffer sink.
//!
//! Video stages always appear in the same order (crop, fps, scale, format)
//! and a stage that would not change anything is left out.

use crate::error::ConvertError;

/// A crop rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width of the kept area.
    pub width: u32,
    /// Height of the kept area.
    pub height: u32,
}

impl CropRect {
    /// Create a crop rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether the rectangle fits inside a `width` x `height` picture.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }

    /// Whether the rectangle covers the whole `width` x `height` picture.
    pub fn is_full_frame(&self, width: u32, height: u32) -> bool {
        self.x == 0 && self.y == 0 && self.width == width && self.height == height
    }

    fn check(&self, width: u32, height: u32) -> Result<(), ConvertError> {
        if self.fits_within(width, height) {
            Ok(())
        } else {
            Err(ConvertError::FilterGraphInvalid(format!(
                "crop {}x{}+{}+{} does not fit a {width}x{height} picture",
                self.width, self.height, self.x, self.y
            )))
        }
    }
}

/// Properties of the decoded video entering a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSource {
    /// Decoded width.
    pub width: u32,
    /// Decoded height.
    pub height: u32,
    /// Source frame rate, when known.
    pub frame_rate: Option<f64>,
    /// Decoded pixel format name.
    pub pixel_format: String,
}

/// What a video chain should do to its source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoTransform {
    /// Crop first.
    pub crop: Option<CropRect>,
    /// Resample to this frame rate.
    pub frame_rate: Option<f64>,
    /// Scale to this size (after cropping).
    pub scale: Option<(u32, u32)>,
    /// Convert to this pixel format last.
    pub pixel_format: Option<String>,
}

/// Build a video filter chain, or `None` when no stage is needed.
///
/// `extra` fragments are appended verbatim after the built-in stages.
///
/// # Errors
///
/// Returns [`ConvertError::FilterGraphInvalid`] if the crop does not fit the
/// source, a target dimension is zero, the frame rate is not positive, or an
/// extra fragment is blank.
pub fn video_chain(
    source: &VideoSource,
    transform: &VideoTransform,
    extra: &[String],
) -> Result<Option<String>, ConvertError> {
    let mut stages = Vec::new();

    let (mut width, mut height) = (source.width, source.height);
    if let Some(crop) = transform.crop {
        crop.check(source.width, source.height)?;
        if !crop.is_full_frame(source.width, source.height) {
            stages.push(format!("crop={}:{}:{}:{}", crop.width, crop.height, crop.x, crop.y));
        }
        width = crop.width;
        height = crop.height;
    }

    if let Some(fps) = transform.frame_rate {
        check_fps(fps)?;
        let unchanged = source
            .frame_rate
            .is_some_and(|current| (current - fps).abs() < 1e-3);
        if !unchanged {
            stages.push(format!("fps={}", format_rate(fps)));
        }
    }

    if let Some((target_width, target_height)) = transform.scale {
        if target_width == 0 || target_height == 0 {
            return Err(ConvertError::FilterGraphInvalid(format!(
                "cannot scale to {target_width}x{target_height}"
            )));
        }
        if (target_width, target_height) != (width, height) {
            stages.push(format!("scale={target_width}:{target_height}:flags=lanczos"));
        }
    }

    if let Some(pixel_format) = &transform.pixel_format
        && pixel_format != &source.pixel_format
    {
        stages.push(format!("format={pixel_format}"));
    }

    for fragment in extra {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(ConvertError::FilterGraphInvalid(
                "empty filter fragment".to_string(),
            ));
        }
        stages.push(fragment.to_string());
    }

    Ok((!stages.is_empty()).then(|| stages.join(",")))
}

/// How `palettegen` gathers colour statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaletteStatsMode {
    /// One palette for the whole clip.
    Full,
    /// Favour moving areas; better for clips with a static background.
    #[default]
    Diff,
}

impl PaletteStatsMode {
    fn as_str(self) -> &'static str {
        match self {
            PaletteStatsMode::Full => "full",
            PaletteStatsMode::Diff => "diff",
        }
    }
}

/// Parameters of the two-pass palette chain used for GIF output.
#[derive(Debug, Clone, PartialEq)]
pub struct PaletteOptions {
    /// Optional crop applied before everything else.
    pub crop: Option<CropRect>,
    /// Output frame rate.
    pub fps: f64,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
    /// Palette statistics mode.
    pub stats_mode: PaletteStatsMode,
    /// Bayer dither scale (0 to 5).
    pub bayer_scale: u8,
}

/// Build the palette chain: crop, fps, scale, then split into
/// `palettegen` and `paletteuse`.
///
/// # Errors
///
/// Returns [`ConvertError::FilterGraphInvalid`] for a non-positive frame
/// rate, a zero dimension, or a bayer scale above 5.
pub fn palette_chain(options: &PaletteOptions) -> Result<String, ConvertError> {
    check_fps(options.fps)?;
    if options.width == 0 || options.height == 0 {
        return Err(ConvertError::FilterGraphInvalid(format!(
            "cannot scale to {}x{}",
            options.width, options.height
        )));
    }
    if options.bayer_scale > 5 {
        return Err(ConvertError::FilterGraphInvalid(format!(
            "bayer scale must be between 0 and 5, got {}",
            options.bayer_scale
        )));
    }

    let mut chain = String::new();
    if let Some(crop) = options.crop {
        chain.push_str(&format!(
            "crop={}:{}:{}:{},",
            crop.width, crop.height, crop.x, crop.y
        ));
    }
    chain.push_str(&format!(
        "fps={},scale={}:{}:flags=lanczos,split[a][b];\
         [a]palettegen=stats_mode={}[p];\
         [b][p]paletteuse=dither=bayer:bayer_scale={}",
        format_rate(options.fps),
        options.width,
        options.height,
        options.stats_mode.as_str(),
        options.bayer_scale,
    ));
    Ok(chain)
}

/// Properties of the decoded audio entering a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSource {
    /// Decoded sample rate.
    pub sample_rate: u32,
    /// Decoded channel count.
    pub channels: u16,
}

/// What an audio chain should do to its source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioTransform {
    /// Resample to this rate.
    pub sample_rate: Option<u32>,
    /// Remix to this many channels.
    pub channels: Option<u16>,
    /// Gain in decibels.
    pub gain_db: Option<f64>,
}

/// Build an audio filter chain, or `None` when no stage is needed.
///
/// # Errors
///
/// Returns [`ConvertError::FilterGraphInvalid`] for a zero rate or channel
/// count, or a non-finite gain.
pub fn audio_chain(
    source: &AudioSource,
    transform: &AudioTransform,
) -> Result<Option<String>, ConvertError> {
    let mut stages = Vec::new();

    if let Some(rate) = transform.sample_rate {
        if rate == 0 {
            return Err(ConvertError::FilterGraphInvalid("sample rate of 0".to_string()));
        }
        if rate != source.sample_rate {
            stages.push(format!("aresample={rate}"));
        }
    }

    if let Some(channels) = transform.channels {
        if channels == 0 {
            return Err(ConvertError::FilterGraphInvalid("channel count of 0".to_string()));
        }
        if channels != source.channels {
            stages.push(format!("aformat=channel_layouts={}", layout_name(channels)));
        }
    }

    if let Some(gain) = transform.gain_db {
        if !gain.is_finite() {
            return Err(ConvertError::FilterGraphInvalid(format!("gain of {gain} dB")));
        }
        if gain != 0.0 {
            stages.push(format!("volume={gain}dB"));
        }
    }

    Ok((!stages.is_empty()).then(|| stages.join(",")))
}

/// FFmpeg channel layout name for a channel count.
pub(crate) fn layout_name(channels: u16) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        6 => "5.1".to_string(),
        8 => "7.1".to_string(),
        n => format!("{n}c"),
    }
}

fn check_fps(fps: f64) -> Result<(), ConvertError> {
    if fps.is_finite() && fps > 0.0 {
        Ok(())
    } else {
        Err(ConvertError::FilterGraphInvalid(format!(
            "frame rate must be positive, got {fps}"
        )))
    }
}

// `fps=30` rather than `fps=30.0`; fractional rates keep their digits.
fn format_rate(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{fps}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> VideoSource {
        VideoSource {
            width: 1920,
            height: 1080,
            frame_rate: Some(30.0),
            pixel_format: "yuv420p".to_string(),
        }
    }

    #[test]
    fn stages_keep_their_order() {
        let transform = VideoTransform {
            crop: Some(CropRect::new(10, 20, 1280, 720)),
            frame_rate: Some(15.0),
            scale: Some((640, 360)),
            pixel_format: Some("yuv444p".to_string()),
        };
        let chain = video_chain(&source(), &transform, &[]).unwrap();
        assert_eq!(
            chain.as_deref(),
            Some("crop=1280:720:10:20,fps=15,scale=640:360:flags=lanczos,format=yuv444p")
        );
    }

    #[test]
    fn no_op_stages_are_left_out() {
        let transform = VideoTransform {
            crop: Some(CropRect::new(0, 0, 1920, 1080)),
            frame_rate: Some(30.0),
            scale: Some((1920, 1080)),
            pixel_format: Some("yuv420p".to_string()),
        };
        assert_eq!(video_chain(&source(), &transform, &[]).unwrap(), None);
    }

    #[test]
    fn scale_compares_against_cropped_size() {
        let transform = VideoTransform {
            crop: Some(CropRect::new(0, 0, 640, 360)),
            scale: Some((640, 360)),
            ..VideoTransform::default()
        };
        assert_eq!(
            video_chain(&source(), &transform, &[]).unwrap().as_deref(),
            Some("crop=640:360:0:0")
        );
    }

    #[test]
    fn oversized_crop_is_rejected() {
        let transform = VideoTransform {
            crop: Some(CropRect::new(1000, 0, 1000, 1080)),
            ..VideoTransform::default()
        };
        assert!(matches!(
            video_chain(&source(), &transform, &[]),
            Err(ConvertError::FilterGraphInvalid(_))
        ));
    }

    #[test]
    fn extra_fragments_follow_builtin_stages() {
        let transform = VideoTransform {
            scale: Some((640, 360)),
            ..VideoTransform::default()
        };
        let chain = video_chain(&source(), &transform, &["hflip".to_string()]).unwrap();
        assert_eq!(chain.as_deref(), Some("scale=640:360:flags=lanczos,hflip"));
    }

    #[test]
    fn palette_chain_splits_into_two_passes() {
        let chain = palette_chain(&PaletteOptions {
            crop: None,
            fps: 10.0,
            width: 320,
            height: 180,
            stats_mode: PaletteStatsMode::Diff,
            bayer_scale: 5,
        })
        .unwrap();
        assert_eq!(
            chain,
            "fps=10,scale=320:180:flags=lanczos,split[a][b];\
             [a]palettegen=stats_mode=diff[p];\
             [b][p]paletteuse=dither=bayer:bayer_scale=5"
        );
    }

    #[test]
    fn audio_stages() {
        let source = AudioSource { sample_rate: 44_100, channels: 6 };
        let transform = AudioTransform {
            sample_rate: Some(48_000),
            channels: Some(2),
            gain_db: Some(-3.5),
        };
        assert_eq!(
            audio_chain(&source, &transform).unwrap().as_deref(),
            Some("aresample=48000,aformat=channel_layouts=stereo,volume=-3.5dB")
        );

        let unchanged = AudioTransform {
            sample_rate: Some(44_100),
            channels: Some(6),
            gain_db: Some(0.0),
        };
        assert_eq!(audio_chain(&source, &unchanged).unwrap(), None);
    }
}
