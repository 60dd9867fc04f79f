//! Filter chain builder tests.
//!
//! These build chain strings only and need no fixtures.

use convertify::{
    AudioSource, AudioTransform, ConvertError, CropRect, PaletteOptions, PaletteStatsMode,
    VideoSource, VideoTransform, audio_chain, palette_chain, video_chain,
};

fn hd_source() -> VideoSource {
    VideoSource {
        width: 1920,
        height: 1080,
        frame_rate: Some(30.0),
        pixel_format: "yuv420p".to_string(),
    }
}

#[test]
fn full_chain_keeps_stage_order() {
    let transform = VideoTransform {
        crop: Some(CropRect::new(0, 140, 1920, 800)),
        frame_rate: Some(24.0),
        scale: Some((960, 400)),
        pixel_format: Some("yuv444p".to_string()),
    };

    let chain = video_chain(&hd_source(), &transform, &[]).unwrap().unwrap();
    assert_eq!(
        chain,
        "crop=1920:800:0:140,fps=24,scale=960:400:flags=lanczos,format=yuv444p"
    );
}

#[test]
fn no_op_stages_are_omitted() {
    let transform = VideoTransform {
        crop: Some(CropRect::new(0, 0, 1920, 1080)),
        frame_rate: Some(30.0),
        scale: Some((1920, 1080)),
        pixel_format: Some("yuv420p".to_string()),
    };

    assert_eq!(video_chain(&hd_source(), &transform, &[]).unwrap(), None);
    assert_eq!(
        video_chain(&hd_source(), &VideoTransform::default(), &[]).unwrap(),
        None
    );
}

#[test]
fn scale_compares_against_cropped_size() {
    let transform = VideoTransform {
        crop: Some(CropRect::new(100, 100, 640, 360)),
        scale: Some((640, 360)),
        ..VideoTransform::default()
    };

    let chain = video_chain(&hd_source(), &transform, &[]).unwrap().unwrap();
    assert_eq!(chain, "crop=640:360:100:100");
}

#[test]
fn unknown_source_rate_always_gets_fps_stage() {
    let source = VideoSource {
        frame_rate: None,
        ..hd_source()
    };
    let transform = VideoTransform {
        frame_rate: Some(29.97),
        ..VideoTransform::default()
    };

    let chain = video_chain(&source, &transform, &[]).unwrap().unwrap();
    assert_eq!(chain, "fps=29.97");
}

#[test]
fn extra_fragments_follow_builtin_stages() {
    let transform = VideoTransform {
        scale: Some((1280, 720)),
        ..VideoTransform::default()
    };
    let extra = vec!["hflip".to_string(), " eq=brightness=0.1 ".to_string()];

    let chain = video_chain(&hd_source(), &transform, &extra).unwrap().unwrap();
    assert_eq!(chain, "scale=1280:720:flags=lanczos,hflip,eq=brightness=0.1");
}

#[test]
fn invalid_video_chains_are_rejected() {
    let outside = VideoTransform {
        crop: Some(CropRect::new(1800, 0, 640, 360)),
        ..VideoTransform::default()
    };
    assert!(matches!(
        video_chain(&hd_source(), &outside, &[]),
        Err(ConvertError::FilterGraphInvalid(_))
    ));

    let zero = VideoTransform {
        scale: Some((0, 720)),
        ..VideoTransform::default()
    };
    assert!(matches!(
        video_chain(&hd_source(), &zero, &[]),
        Err(ConvertError::FilterGraphInvalid(_))
    ));

    let negative_rate = VideoTransform {
        frame_rate: Some(-1.0),
        ..VideoTransform::default()
    };
    assert!(video_chain(&hd_source(), &negative_rate, &[]).is_err());

    assert!(video_chain(&hd_source(), &VideoTransform::default(), &["  ".to_string()]).is_err());
}

#[test]
fn palette_chain_splits_into_two_passes() {
    let options = PaletteOptions {
        crop: None,
        fps: 10.0,
        width: 320,
        height: 180,
        stats_mode: PaletteStatsMode::Diff,
        bayer_scale: 5,
    };

    let chain = palette_chain(&options).unwrap();
    assert_eq!(
        chain,
        "fps=10,scale=320:180:flags=lanczos,split[a][b];\
         [a]palettegen=stats_mode=diff[p];\
         [b][p]paletteuse=dither=bayer:bayer_scale=5"
    );
}

#[test]
fn palette_chain_crops_first() {
    let options = PaletteOptions {
        crop: Some(CropRect::new(10, 20, 300, 200)),
        fps: 12.5,
        width: 150,
        height: 100,
        stats_mode: PaletteStatsMode::Full,
        bayer_scale: 3,
    };

    let chain = palette_chain(&options).unwrap();
    assert!(chain.starts_with("crop=300:200:10:20,fps=12.5,scale=150:100"));
    assert!(chain.contains("stats_mode=full"));
    assert!(chain.ends_with("bayer_scale=3"));
}

#[test]
fn palette_chain_rejects_bad_options() {
    let base = PaletteOptions {
        crop: None,
        fps: 10.0,
        width: 320,
        height: 180,
        stats_mode: PaletteStatsMode::Diff,
        bayer_scale: 5,
    };

    assert!(palette_chain(&PaletteOptions { fps: 0.0, ..base.clone() }).is_err());
    assert!(palette_chain(&PaletteOptions { height: 0, ..base.clone() }).is_err());
    assert!(palette_chain(&PaletteOptions { bayer_scale: 6, ..base }).is_err());
}

#[test]
fn audio_chain_stages() {
    let source = AudioSource {
        sample_rate: 44_100,
        channels: 6,
    };
    let transform = AudioTransform {
        sample_rate: Some(48_000),
        channels: Some(2),
        gain_db: Some(-3.0),
    };

    let chain = audio_chain(&source, &transform).unwrap().unwrap();
    assert_eq!(chain, "aresample=48000,aformat=channel_layouts=stereo,volume=-3dB");
}

#[test]
fn audio_chain_skips_no_ops() {
    let source = AudioSource {
        sample_rate: 48_000,
        channels: 2,
    };
    let transform = AudioTransform {
        sample_rate: Some(48_000),
        channels: Some(2),
        gain_db: Some(0.0),
    };

    assert_eq!(audio_chain(&source, &transform).unwrap(), None);
    assert!(
        audio_chain(
            &source,
            &AudioTransform {
                channels: Some(0),
                ..AudioTransform::default()
            }
        )
        .is_err()
    );
}
