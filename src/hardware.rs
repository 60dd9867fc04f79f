//! Hardware encoder selection and hardware-accelerated decoding.
//!
//! Capability detection asks the linked FFmpeg build which encoders and
//! decoders exist and which hardware device types it was compiled with. The
//! answer never changes while the process runs, so it is computed once and
//! cached; concurrent jobs read the cache without locking.
//!
//! Only H.264 and HEVC have hardware encode paths. Every other codec family
//! resolves to its software encoder, and selection never fails: missing
//! hardware is the normal case on most machines.
//!
//! # Example
//!
//! ```no_run
//! use convertify::{CodecFamily, select_encoder};
//!
//! let choice = select_encoder(CodecFamily::H264, true);
//! println!("encoding with {} (hardware: {})", choice.name, choice.is_hardware);
//! ```

use std::collections::BTreeSet;
use std::ptr;
use std::sync::OnceLock;

use ffmpeg_next::{
    codec::{Id as CodecId, context::Context as CodecContext},
    decoder::Video as VideoDecoder,
    frame::Video as VideoFrame,
};
use ffmpeg_sys_next::{
    AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX, AVBufferRef, AVCodecContext, AVCodecHWConfig,
    AVHWDeviceType,
};

use crate::error::ConvertError;

/// A codec family, independent of which encoder implements it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodecFamily {
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    Hevc,
    /// VP9.
    Vp9,
    /// VP8.
    Vp8,
    /// AV1.
    Av1,
    /// MPEG-4 Part 2.
    Mpeg4,
    /// Apple ProRes.
    ProRes,
    /// GIF.
    Gif,
    /// AAC.
    Aac,
    /// MP3.
    Mp3,
    /// Opus.
    Opus,
    /// Vorbis.
    Vorbis,
    /// FLAC.
    Flac,
    /// 16-bit PCM.
    Pcm,
    /// Apple Lossless.
    Alac,
}

impl CodecFamily {
    /// Hardware encoders for this family, most preferred first.
    pub fn hardware_encoders(self) -> &'static [&'static str] {
        match self {
            CodecFamily::H264 => &["h264_videotoolbox", "h264_nvenc", "h264_qsv", "h264_amf"],
            CodecFamily::Hevc => &["hevc_videotoolbox", "hevc_nvenc", "hevc_qsv", "hevc_amf"],
            _ => &[],
        }
    }

    /// The software encoder used when no hardware encoder is chosen.
    pub fn software_encoder(self) -> &'static str {
        match self {
            CodecFamily::H264 => "libx264",
            CodecFamily::Hevc => "libx265",
            CodecFamily::Vp9 => "libvpx-vp9",
            CodecFamily::Vp8 => "libvpx",
            CodecFamily::Av1 => "libsvtav1",
            CodecFamily::Mpeg4 => "mpeg4",
            CodecFamily::ProRes => "prores_ks",
            CodecFamily::Gif => "gif",
            CodecFamily::Aac => "aac",
            CodecFamily::Mp3 => "libmp3lame",
            CodecFamily::Opus => "libopus",
            CodecFamily::Vorbis => "libvorbis",
            CodecFamily::Flac => "flac",
            CodecFamily::Pcm => "pcm_s16le",
            CodecFamily::Alac => "alac",
        }
    }

    /// FFmpeg codec id, used when the preferred encoder is missing from the
    /// build and any encoder for the codec will do.
    pub(crate) fn codec_id(self) -> CodecId {
        match self {
            CodecFamily::H264 => CodecId::H264,
            CodecFamily::Hevc => CodecId::HEVC,
            CodecFamily::Vp9 => CodecId::VP9,
            CodecFamily::Vp8 => CodecId::VP8,
            CodecFamily::Av1 => CodecId::AV1,
            CodecFamily::Mpeg4 => CodecId::MPEG4,
            CodecFamily::ProRes => CodecId::PRORES,
            CodecFamily::Gif => CodecId::GIF,
            CodecFamily::Aac => CodecId::AAC,
            CodecFamily::Mp3 => CodecId::MP3,
            CodecFamily::Opus => CodecId::OPUS,
            CodecFamily::Vorbis => CodecId::VORBIS,
            CodecFamily::Flac => CodecId::FLAC,
            CodecFamily::Pcm => CodecId::PCM_S16LE,
            CodecFamily::Alac => CodecId::ALAC,
        }
    }
}

/// What the linked FFmpeg build can do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareCapabilities {
    /// Whether any hardware encoder or device type is present.
    pub available: bool,
    /// Names of every known encoder that is present (hardware and software).
    pub encoders: BTreeSet<String>,
    /// Names of hardware device types compiled in (e.g. `"cuda"`).
    pub decoders: BTreeSet<String>,
}

impl HardwareCapabilities {
    /// A capability set with nothing in it.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build a capability set from explicit encoder names.
    pub fn from_encoders<I, S>(encoders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let encoders: BTreeSet<String> = encoders.into_iter().map(Into::into).collect();
        let available = encoders.iter().any(|name| is_hardware_encoder(name));
        Self {
            available,
            encoders,
            decoders: BTreeSet::new(),
        }
    }

    /// Whether the named encoder is present.
    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.contains(name)
    }

    fn detect() -> Self {
        if let Err(error) = ffmpeg_next::init() {
            log::warn!("FFmpeg initialisation failed during capability detection: {error}");
            return Self::none();
        }

        let families = [
            CodecFamily::H264,
            CodecFamily::Hevc,
            CodecFamily::Vp9,
            CodecFamily::Vp8,
            CodecFamily::Av1,
            CodecFamily::Mpeg4,
            CodecFamily::ProRes,
            CodecFamily::Gif,
            CodecFamily::Aac,
            CodecFamily::Mp3,
            CodecFamily::Opus,
            CodecFamily::Vorbis,
            CodecFamily::Flac,
            CodecFamily::Pcm,
            CodecFamily::Alac,
        ];

        let encoders: BTreeSet<String> = families
            .iter()
            .flat_map(|family| {
                family
                    .hardware_encoders()
                    .iter()
                    .copied()
                    .chain(std::iter::once(family.software_encoder()))
            })
            .filter(|name| ffmpeg_next::encoder::find_by_name(name).is_some())
            .map(str::to_string)
            .collect();

        let decoders: BTreeSet<String> = available_hardware_devices()
            .into_iter()
            .map(|device| device.name().to_string())
            .collect();

        let available = !decoders.is_empty() || encoders.iter().any(|name| is_hardware_encoder(name));
        log::debug!(
            "Detected capabilities: {} encoders, hardware devices {:?}",
            encoders.len(),
            decoders
        );

        Self {
            available,
            encoders,
            decoders,
        }
    }
}

fn is_hardware_encoder(name: &str) -> bool {
    [CodecFamily::H264, CodecFamily::Hevc]
        .iter()
        .any(|family| family.hardware_encoders().contains(&name))
}

/// Capabilities of the linked FFmpeg build, detected on first call.
pub fn detect_capabilities() -> &'static HardwareCapabilities {
    static CAPABILITIES: OnceLock<HardwareCapabilities> = OnceLock::new();
    CAPABILITIES.get_or_init(HardwareCapabilities::detect)
}

/// The encoder picked for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderChoice {
    /// FFmpeg encoder name.
    pub name: &'static str,
    /// Whether the encoder runs on dedicated hardware.
    pub is_hardware: bool,
}

/// Pick an encoder for `family` from an explicit capability set.
///
/// Returns the first present hardware encoder when `prefer_hardware` is set,
/// otherwise the family's software encoder. Never fails.
pub fn select_encoder_with(
    capabilities: &HardwareCapabilities,
    family: CodecFamily,
    prefer_hardware: bool,
) -> EncoderChoice {
    if prefer_hardware
        && let Some(name) = family
            .hardware_encoders()
            .iter()
            .find(|name| capabilities.has_encoder(name))
    {
        return EncoderChoice {
            name,
            is_hardware: true,
        };
    }

    EncoderChoice {
        name: family.software_encoder(),
        is_hardware: false,
    }
}

/// Pick an encoder for `family` using the cached process capabilities.
pub fn select_encoder(family: CodecFamily, prefer_hardware: bool) -> EncoderChoice {
    select_encoder_with(detect_capabilities(), family, prefer_hardware)
}

/// Hardware device types for accelerated decoding.
///
/// Not every type exists on every platform; see
/// [`available_hardware_devices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareDeviceType {
    /// NVIDIA CUDA (Linux, Windows).
    Cuda,
    /// Video Acceleration API (Linux).
    Vaapi,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 Video Acceleration (Windows).
    D3d11va,
    /// Apple VideoToolbox (macOS, iOS).
    VideoToolbox,
    /// Intel Quick Sync Video.
    Qsv,
}

impl HardwareDeviceType {
    /// FFmpeg's name for the device type.
    pub fn name(self) -> &'static str {
        match self {
            HardwareDeviceType::Cuda => "cuda",
            HardwareDeviceType::Vaapi => "vaapi",
            HardwareDeviceType::Dxva2 => "dxva2",
            HardwareDeviceType::D3d11va => "d3d11va",
            HardwareDeviceType::VideoToolbox => "videotoolbox",
            HardwareDeviceType::Qsv => "qsv",
        }
    }

    fn from_av(device_type: AVHWDeviceType) -> Option<Self> {
        match device_type {
            AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA => Some(HardwareDeviceType::Cuda),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI => Some(HardwareDeviceType::Vaapi),
            AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2 => Some(HardwareDeviceType::Dxva2),
            AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA => Some(HardwareDeviceType::D3d11va),
            AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX => Some(HardwareDeviceType::VideoToolbox),
            AVHWDeviceType::AV_HWDEVICE_TYPE_QSV => Some(HardwareDeviceType::Qsv),
            _ => None,
        }
    }
}

/// List the hardware device types compiled into the FFmpeg build.
pub fn available_hardware_devices() -> Vec<HardwareDeviceType> {
    let mut devices = Vec::new();
    let mut device_type = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;

    loop {
        device_type = unsafe { ffmpeg_sys_next::av_hwdevice_iterate_types(device_type) };
        if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        if let Some(device) = HardwareDeviceType::from_av(device_type) {
            devices.push(device);
        }
    }

    devices
}

/// Owned reference to an FFmpeg hardware device context.
struct HardwareDevice {
    buffer: *mut AVBufferRef,
}

impl HardwareDevice {
    fn create(device_type: AVHWDeviceType) -> Result<Self, ConvertError> {
        let mut buffer: *mut AVBufferRef = ptr::null_mut();
        let result = unsafe {
            ffmpeg_sys_next::av_hwdevice_ctx_create(
                &mut buffer,
                device_type,
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        };

        if result < 0 || buffer.is_null() {
            Err(ConvertError::HardwareAccelerationUnavailable(format!(
                "could not create {device_type:?} device (code {result})"
            )))
        } else {
            Ok(Self { buffer })
        }
    }
}

impl Drop for HardwareDevice {
    fn drop(&mut self) {
        unsafe { ffmpeg_sys_next::av_buffer_unref(&mut self.buffer) };
    }
}

/// A decoder, and whether it decodes on hardware.
pub(crate) struct DecoderSetup {
    pub(crate) decoder: VideoDecoder,
    pub(crate) hardware: bool,
}

/// Open a video decoder, attaching a hardware device when asked and possible.
///
/// Any hardware failure falls back to software decoding with a log message.
pub(crate) fn open_video_decoder(
    context: CodecContext,
    prefer_hardware: bool,
) -> Result<DecoderSetup, ConvertError> {
    let open_software = |context: CodecContext| -> Result<DecoderSetup, ConvertError> {
        let decoder = context
            .decoder()
            .video()
            .map_err(|error| ConvertError::CodecOpenFailed {
                codec: "video decoder".to_string(),
                reason: error.to_string(),
            })?;
        Ok(DecoderSetup {
            decoder,
            hardware: false,
        })
    };

    if !prefer_hardware {
        return open_software(context);
    }

    let Some(device_type) = hardware_device_for(&context) else {
        log::debug!("No hardware decode path for this codec; decoding in software");
        return open_software(context);
    };

    match HardwareDevice::create(device_type) {
        Ok(device) => {
            unsafe {
                let raw = context.as_ptr() as *mut AVCodecContext;
                (*raw).hw_device_ctx = ffmpeg_sys_next::av_buffer_ref(device.buffer);
            }
            let mut setup = open_software(context)?;
            setup.hardware = true;
            log::debug!("Decoding on {device_type:?}");
            Ok(setup)
        }
        Err(error) => {
            log::info!("{error}; decoding in software");
            open_software(context)
        }
    }
}

/// Copy a frame out of GPU memory when it lives there.
///
/// Returns `None` for frames already in system memory.
pub(crate) fn download_frame(frame: &VideoFrame) -> Result<Option<VideoFrame>, ConvertError> {
    let on_device = unsafe { !(*frame.as_ptr()).hw_frames_ctx.is_null() };
    if !on_device {
        return Ok(None);
    }

    let mut software = VideoFrame::empty();
    let result =
        unsafe { ffmpeg_sys_next::av_hwframe_transfer_data(software.as_mut_ptr(), frame.as_ptr(), 0) };
    if result < 0 {
        return Err(ConvertError::DecodingFailed(format!(
            "hardware frame download failed (code {result})"
        )));
    }
    unsafe {
        (*software.as_mut_ptr()).pts = (*frame.as_ptr()).pts;
        (*software.as_mut_ptr()).best_effort_timestamp = (*frame.as_ptr()).best_effort_timestamp;
    }
    Ok(Some(software))
}

// First device type the decoder for this codec can use through a device
// context.
fn hardware_device_for(context: &CodecContext) -> Option<AVHWDeviceType> {
    let codec = unsafe { ffmpeg_sys_next::avcodec_find_decoder((*context.as_ptr()).codec_id) };
    if codec.is_null() {
        return None;
    }

    let mut index = 0;
    loop {
        let config: *const AVCodecHWConfig = unsafe { ffmpeg_sys_next::avcodec_get_hw_config(codec, index) };
        if config.is_null() {
            return None;
        }

        let (methods, device_type) = unsafe { ((*config).methods, (*config).device_type) };
        if methods & (AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as i32) != 0
            && device_type != AVHWDeviceType::AV_HWDEVICE_TYPE_NONE
        {
            return Some(device_type);
        }
        index += 1;
    }
}
