//! Stream probing integration tests.

mod common;

use std::path::Path;

use convertify::{ConvertError, MediaKind, MediaProbe};

#[test]
fn probe_lists_video_and_audio() {
    let path = common::sample_video();

    let streams = MediaProbe::probe(path).expect("probe");
    assert_eq!(streams.len(), 2);

    let video = streams
        .iter()
        .find(|stream| stream.kind == MediaKind::Video)
        .expect("video stream");
    // libx264 when the local FFmpeg has it, otherwise the built-in MPEG-4 encoder.
    assert!(matches!(video.codec.as_str(), "h264" | "mpeg4"), "codec {}", video.codec);
    let details = video.video.as_ref().expect("video details");
    assert_eq!((details.width, details.height), (640, 360));
    let fps = details.frames_per_second().expect("frame rate");
    assert!((fps - 30.0).abs() < 0.01, "fps {fps}");
    assert!(video.audio.is_none());

    let audio = streams
        .iter()
        .find(|stream| stream.kind == MediaKind::Audio)
        .expect("audio stream");
    assert_eq!(audio.codec, "aac");
    let details = audio.audio.as_ref().expect("audio details");
    assert_eq!(details.sample_rate, 44_100);
    assert_eq!(details.channels, 2);
}

#[test]
fn inspect_reports_container_details() {
    let path = common::sample_video();

    let info = MediaProbe::inspect(path).expect("inspect");
    assert!(info.format_name.contains("mp4"), "format {}", info.format_name);
    let seconds = info.duration.as_secs_f64();
    assert!((seconds - 10.0).abs() < 0.2, "duration {seconds}");
    assert!(info.bit_rate > 0);
    assert_eq!(info.video().map(|stream| stream.kind), Some(MediaKind::Video));
    assert_eq!(info.audio().map(|stream| stream.kind), Some(MediaKind::Audio));
}

#[test]
fn audio_only_file_has_no_video() {
    let path = common::sample_audio();

    let info = MediaProbe::inspect(path).expect("inspect");
    assert!(info.video().is_none());
    assert_eq!(info.streams.len(), 1);
    assert!(info.duration.as_secs_f64() > 9.5);
}

#[test]
fn probe_many_reports_per_file() {
    let path = common::sample_video();

    let results = MediaProbe::probe_many(&[path.to_path_buf(), common::missing_file()]);
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(ConvertError::OpenInputFailed { .. })));
}

#[test]
fn missing_file_is_open_failure() {
    let result = MediaProbe::probe("does/not/exist.mp4");
    match result {
        Err(ConvertError::OpenInputFailed { path, .. }) => {
            assert_eq!(path, Path::new("does/not/exist.mp4"));
        }
        other => panic!("expected OpenInputFailed, got {other:?}"),
    }
}

#[test]
fn garbage_file_is_open_failure() {
    let directory = tempfile::tempdir().expect("tempdir");
    let path = directory.path().join("garbage.mp4");
    std::fs::write(&path, b"definitely not a media container").expect("write");

    assert!(matches!(
        MediaProbe::probe(&path),
        Err(ConvertError::OpenInputFailed { .. })
    ));
}
