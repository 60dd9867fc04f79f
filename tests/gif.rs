//! Animated GIF integration tests.
//!
//! The written GIFs are decoded back with the `image` crate.

mod common;

use std::{fs::File, io::BufReader, path::Path, sync::Mutex};

use convertify::{
    ConvertError, CropRect, GifTranscoder, JobOptions, LatestProgress, NoOpProgress,
    PaletteStatsMode, PipelineState, TranscodingConfig, TranscodingProgress, transcode,
};
use image::{AnimationDecoder, ImageDecoder, codecs::gif::GifDecoder};

fn decode(path: &Path) -> ((u32, u32), usize) {
    let reader = BufReader::new(File::open(path).expect("open gif"));
    let decoder = GifDecoder::new(reader).expect("gif decoder");
    let dimensions = decoder.dimensions();
    let frames = decoder.into_frames().collect_frames().expect("frames");
    (dimensions, frames.len())
}

#[test]
fn five_seconds_at_ten_fps() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("clip.gif");
    let progress = LatestProgress::new();
    let mut gif = GifTranscoder::new(path, &output, 10.0, 320, None, Some(0.0), Some(5.0));
    gif.run(&progress).expect("gif");
    assert_eq!(gif.state(), PipelineState::Completed);

    let ((width, height), frames) = decode(&output);
    assert_eq!(width, 320);
    assert_eq!(height, 180);
    assert!((48..=52).contains(&frames), "{frames} frames");
    assert_eq!(progress.get().map(|p| p.percentage), Some(1.0));
}

#[test]
fn progress_moves_while_palette_is_gathered() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("steady.gif");
    let seen = Mutex::new(Vec::new());
    let callback = |progress: &TranscodingProgress| {
        seen.lock().expect("lock").push(progress.percentage);
    };
    GifTranscoder::new(path, &output, 10.0, 160, None, Some(0.0), Some(4.0))
        .with_options(JobOptions::new().with_progress_interval(10))
        .run(&callback)
        .expect("gif");

    let seen = seen.into_inner().expect("lock");
    assert_eq!(seen.last(), Some(&1.0));
    let midway = seen.iter().filter(|percentage| **percentage > 0.0 && **percentage < 1.0).count();
    assert!(midway >= 2, "{seen:?}");
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{seen:?}");
}

#[test]
fn gif_container_goes_through_the_palette() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("config.gif");
    let config = TranscodingConfig::new(path, &output)
        .expect("config")
        .with_trim(None, Some(2.0))
        .with_resolution(Some(160), None)
        .with_frame_rate(10.0);
    transcode(config, &NoOpProgress).expect("gif");

    let ((width, height), frames) = decode(&output);
    assert_eq!((width, height), (160, 90));
    assert!((18..=22).contains(&frames), "{frames} frames");
}

#[test]
fn trimmed_from_the_middle() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("middle.gif");
    GifTranscoder::new(path, &output, 5.0, 160, None, Some(3.0), Some(5.0))
        .with_repeat(Some(0))
        .with_stats_mode(PaletteStatsMode::Full)
        .run(&NoOpProgress)
        .expect("gif");

    let ((width, _), frames) = decode(&output);
    assert_eq!(width, 160);
    assert!((8..=12).contains(&frames), "{frames} frames");
}

#[test]
fn cropped_gif_follows_crop_aspect() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("square.gif");
    GifTranscoder::new(
        path,
        &output,
        10.0,
        200,
        Some(CropRect::new(140, 0, 360, 360)),
        None,
        Some(1.0),
    )
    .run(&NoOpProgress)
    .expect("gif");

    let ((width, height), _) = decode(&output);
    assert_eq!((width, height), (200, 200));
}

#[test]
fn oversized_crop_is_rejected() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("bad.gif");
    let mut gif = GifTranscoder::new(
        path,
        &output,
        10.0,
        200,
        Some(CropRect::new(400, 0, 360, 360)),
        None,
        None,
    );
    let result = gif.run(&NoOpProgress);
    assert!(matches!(result, Err(ConvertError::InvalidConfiguration(_))));
    assert_eq!(gif.state(), PipelineState::Failed);
    assert!(!output.exists());
}

#[test]
fn audio_only_input_has_no_video() {
    let path = common::sample_audio();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("none.gif");
    let result = GifTranscoder::new(path, &output, 10.0, 320, None, None, None).run(&NoOpProgress);
    assert!(matches!(result, Err(ConvertError::NoVideoStream)));
}

#[test]
fn cancelled_gif_leaves_nothing() {
    let path = common::sample_video();

    let directory = tempfile::tempdir().expect("tempdir");
    let output = directory.path().join("cancelled.gif");
    let mut gif = GifTranscoder::new(path, &output, 10.0, 320, None, None, None);
    gif.cancel();

    let result = gif.run(&NoOpProgress);
    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(gif.state(), PipelineState::Cancelled);
    assert!(!output.exists());
}
