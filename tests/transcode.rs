//! Transcoding pipeline integration tests.

mod common;

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use convertify::{
    AudioCodec, ConvertError, JobOptions, MediaInfo, MediaKind, MediaProbe, Pipeline,
    PipelineState, TranscodingConfig, TranscodingProgress, VideoCodec, transcode,
};

fn probe(path: &Path) -> MediaInfo {
    MediaProbe::inspect(path).expect("probe output")
}

fn codec_of(info: &MediaInfo, kind: MediaKind) -> Option<String> {
    info.streams
        .iter()
        .find(|stream| stream.kind == kind)
        .map(|stream| stream.codec.clone())
}

fn output_path(directory: &tempfile::TempDir, name: &str) -> PathBuf {
    directory.path().join(name)
}

#[test]
fn trim_to_mp4_defaults() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "trimmed.mp4");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .with_trim(Some(2.0), Some(7.0));
    transcode(config, &convertify::NoOpProgress).expect("transcode");

    let info = probe(&output);
    let seconds = info.duration.as_secs_f64();
    assert!((4.8..=6.1).contains(&seconds), "duration {seconds}");
    assert_eq!(codec_of(&info, MediaKind::Video).as_deref(), Some("h264"));
    assert_eq!(codec_of(&info, MediaKind::Audio).as_deref(), Some("aac"));
}

#[test]
fn full_length_stays_within_five_percent() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "full.mkv");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .with_resolution(Some(320), None);
    transcode(config, &convertify::NoOpProgress).expect("transcode");

    let input = probe(path).duration.as_secs_f64();
    let info = probe(&output);
    let seconds = info.duration.as_secs_f64();
    assert!((seconds - input).abs() <= input * 0.05, "{seconds} vs {input}");

    let video = info.video().and_then(|stream| stream.video.clone()).expect("video");
    assert_eq!((video.width, video.height), (320, 180));
}

#[test]
fn copy_video_reencode_audio() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "copied.mp4");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .copy_video()
        .with_audio_codec(AudioCodec::Aac)
        .with_sample_rate(22_050);
    transcode(config, &convertify::NoOpProgress).expect("transcode");

    let source = probe(path);
    let copied = probe(&output);

    let source_video = source.video().expect("source video");
    let copied_video = copied.video().expect("copied video");
    assert_eq!(copied_video.codec, source_video.codec);
    let (source_details, copied_details) = (
        source_video.video.as_ref().expect("source details"),
        copied_video.video.as_ref().expect("copied details"),
    );
    assert_eq!(copied_details.width, source_details.width);
    assert_eq!(copied_details.height, source_details.height);
    assert_eq!(copied_details.pixel_format, source_details.pixel_format);

    let audio = copied.audio().and_then(|stream| stream.audio.clone()).expect("audio");
    assert_eq!(copied.audio().map(|stream| stream.codec.as_str()), Some("aac"));
    assert_eq!(audio.sample_rate, 22_050);
}

#[test]
fn audio_only_outputs() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    for (name, codec) in [("tone.wav", "pcm_s16le"), ("tone.flac", "flac"), ("tone.m4a", "aac")] {
        let output = output_path(&directory, name);
        let config = TranscodingConfig::new(path, &output)
            .expect("config")
            .with_trim(None, Some(3.0));
        transcode(config, &convertify::NoOpProgress).expect(name);

        let info = probe(&output);
        assert!(info.video().is_none(), "{name} has video");
        assert_eq!(codec_of(&info, MediaKind::Audio).as_deref(), Some(codec));
        let seconds = info.duration.as_secs_f64();
        assert!((2.9..=3.2).contains(&seconds), "{name} lasted {seconds}");
    }
}

#[test]
fn audio_remix_and_gain() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "mono.m4a");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .with_channels(1)
        .with_sample_rate(48_000)
        .with_audio_gain(-6.0)
        .with_audio_bit_rate(64_000);
    transcode(config, &convertify::NoOpProgress).expect("transcode");

    let audio = probe(&output).audio().and_then(|stream| stream.audio.clone()).expect("audio");
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.sample_rate, 48_000);
}

#[test]
fn strip_audio_and_change_rate() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "silent.mp4");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .strip_audio()
        .with_frame_rate(15.0)
        .with_trim(None, Some(2.0))
        .with_video_codec(VideoCodec::H264)
        .with_crf(30);
    transcode(config, &convertify::NoOpProgress).expect("transcode");

    let info = probe(&output);
    assert!(info.audio().is_none());
    let fps = info
        .video()
        .and_then(|stream| stream.video.as_ref())
        .and_then(|video| video.frames_per_second())
        .expect("fps");
    assert!((fps - 15.0).abs() < 0.5, "fps {fps}");
}

#[test]
fn same_config_twice_is_stable() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let mut results = Vec::new();
    for name in ["first.mp4", "second.mp4"] {
        let output = output_path(&directory, name);
        let config = TranscodingConfig::new(path, &output)
            .expect("config")
            .with_trim(Some(1.0), Some(4.0))
            .with_resolution(Some(320), None);
        transcode(config, &convertify::NoOpProgress).expect("transcode");

        let size = std::fs::metadata(&output).expect("metadata").len();
        results.push((probe(&output).duration.as_secs_f64(), size));
    }

    let (first_duration, first_size) = results[0];
    let (second_duration, second_size) = results[1];
    assert!((first_duration - second_duration).abs() < 0.05);
    let drift = (first_size as f64 - second_size as f64).abs() / first_size as f64;
    assert!(drift < 0.02, "sizes {first_size} vs {second_size}");
}

#[test]
fn cancel_mid_job_removes_output() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "cancelled.mp4");
    let config = TranscodingConfig::new(path, &output).expect("config");
    let mut pipeline = Pipeline::new(config).with_options(JobOptions::new().with_progress_interval(1));
    let token = pipeline.cancellation_token();

    let frames = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&frames);
    let callback = move |progress: &TranscodingProgress| {
        seen.store(progress.frame_count, Ordering::Relaxed);
        if progress.frame_count >= 20 {
            token.cancel();
        }
    };

    let result = pipeline.transcode(&callback);
    assert!(matches!(result, Err(ConvertError::Cancelled)));
    assert_eq!(pipeline.state(), PipelineState::Cancelled);
    assert!(!output.exists(), "partial output left behind");
    // Cancellation is observed within one packet of the request.
    assert!(frames.load(Ordering::Relaxed) < 40);
}

#[test]
fn completed_pipeline_cannot_rerun() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "once.m4a");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .with_trim(None, Some(1.0));
    let mut pipeline = Pipeline::new(config);
    pipeline.transcode(&convertify::NoOpProgress).expect("first run");
    assert_eq!(pipeline.state(), PipelineState::Completed);

    assert!(matches!(
        pipeline.transcode(&convertify::NoOpProgress),
        Err(ConvertError::InvalidConfiguration(_))
    ));
}

#[test]
fn missing_video_stream_is_reported() {
    let path = common::sample_audio();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = output_path(&directory, "video.mp4");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .copy_video();
    let result = transcode(config, &convertify::NoOpProgress);
    assert!(matches!(result, Err(ConvertError::NoVideoStream)));
    assert!(!output.exists());

    // Without an explicit video request the audio is simply carried over.
    let config = TranscodingConfig::new(path, &output).expect("config");
    transcode(config, &convertify::NoOpProgress).expect("audio-only mp4");
    assert!(probe(&output).video().is_none());
}
