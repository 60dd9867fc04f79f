//! Encoder selection tests.
//!
//! Selection is checked against explicit capability sets, so these run the
//! same on every machine. The detection tests only assert invariants.

use convertify::{CodecFamily, HardwareCapabilities, select_encoder, select_encoder_with};

#[test]
fn no_hardware_falls_back_to_software() {
    let capabilities = HardwareCapabilities::none();

    let choice = select_encoder_with(&capabilities, CodecFamily::H264, true);
    assert_eq!(choice.name, "libx264");
    assert!(!choice.is_hardware);

    let choice = select_encoder_with(&capabilities, CodecFamily::Hevc, true);
    assert_eq!(choice.name, "libx265");
    assert!(!choice.is_hardware);
}

#[test]
fn present_hardware_encoder_is_preferred() {
    let capabilities = HardwareCapabilities::from_encoders(["libx264", "h264_nvenc", "h264_qsv"]);
    assert!(capabilities.available);

    let choice = select_encoder_with(&capabilities, CodecFamily::H264, true);
    assert_eq!(choice.name, "h264_nvenc");
    assert!(choice.is_hardware);
}

#[test]
fn hardware_is_ignored_unless_preferred() {
    let capabilities = HardwareCapabilities::from_encoders(["h264_videotoolbox"]);

    let choice = select_encoder_with(&capabilities, CodecFamily::H264, false);
    assert_eq!(choice.name, "libx264");
    assert!(!choice.is_hardware);
}

#[test]
fn other_families_are_always_software() {
    let capabilities =
        HardwareCapabilities::from_encoders(["h264_nvenc", "hevc_nvenc", "libvpx-vp9", "aac"]);

    for family in [
        CodecFamily::Vp9,
        CodecFamily::Av1,
        CodecFamily::ProRes,
        CodecFamily::Gif,
        CodecFamily::Aac,
        CodecFamily::Opus,
    ] {
        let choice = select_encoder_with(&capabilities, family, true);
        assert!(!choice.is_hardware, "{family:?} picked {}", choice.name);
        assert_eq!(choice.name, family.software_encoder());
    }
}

#[test]
fn software_only_set_is_not_available() {
    let capabilities = HardwareCapabilities::from_encoders(["libx264", "aac"]);
    assert!(!capabilities.available);
    assert!(capabilities.has_encoder("libx264"));
    assert!(!capabilities.has_encoder("h264_nvenc"));
}

#[test]
fn detection_is_cached() {
    let first = convertify::detect_capabilities();
    let second = convertify::detect_capabilities();
    assert!(std::ptr::eq(first, second));
}

#[test]
fn detected_selection_never_fails() {
    let choice = select_encoder(CodecFamily::H264, true);
    assert!(!choice.name.is_empty());
    if !choice.is_hardware {
        assert_eq!(choice.name, "libx264");
    }
}

#[test]
fn device_names_are_unique() {
    let devices = convertify::available_hardware_devices();
    let mut names: Vec<&str> = devices.iter().map(|device| device.name()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), devices.len());
}
