//! Media fixtures shared by the integration tests.
//!
//! Fixtures are synthesised with FFmpeg the first time a test asks for one
//! and cached under Cargo's per-target temp directory. A fixture that cannot
//! be generated fails the test instead of skipping it.

#![allow(dead_code)]

use std::{
    f64::consts::PI,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use ffmpeg_next::{
    ChannelLayout, Dictionary, Packet, Rational,
    codec::{self, context::Context as CodecContext},
    encoder,
    format::{self, Pixel, Sample, context::Output, sample::Type as SampleType},
    frame,
};

pub const VIDEO_WIDTH: u32 = 640;
pub const VIDEO_HEIGHT: u32 = 360;
pub const VIDEO_FPS: i32 = 30;
pub const DURATION_SECONDS: i32 = 10;
pub const SAMPLE_RATE: i32 = 44_100;
pub const IMAGE_WIDTH: u32 = 320;
pub const IMAGE_HEIGHT: u32 = 240;

/// 10 s, 640x360 @ 30 fps with B-frames and a keyframe every second, plus a
/// 440 Hz stereo AAC tone at 44.1 kHz.
pub fn sample_video() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| cached("sample_video.mp4", |path| write_media(path, true)))
}

/// The tone of [`sample_video`] on its own, in an m4a container.
pub fn sample_audio() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| cached("sample_audio.m4a", |path| write_media(path, false)))
}

/// A 320x240 RGB gradient.
pub fn sample_image() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| cached("sample_image.png", write_image))
}

/// A path next to the fixtures that never exists.
pub fn missing_file() -> PathBuf {
    fixture_directory().join("missing.mp4")
}

fn fixture_directory() -> PathBuf {
    Path::new(env!("CARGO_TARGET_TMPDIR")).join("convertify-fixtures")
}

// Test binaries may run side by side, so each writes a private file and
// renames it into place.
fn cached(name: &str, generate: impl FnOnce(&Path)) -> PathBuf {
    let directory = fixture_directory();
    let path = directory.join(name);
    if path.exists() {
        return path;
    }

    std::fs::create_dir_all(&directory).expect("fixture directory");
    let partial = directory.join(format!("{}-{name}", std::process::id()));
    generate(&partial);
    std::fs::rename(&partial, &path).expect("move fixture into place");
    path
}

fn write_image(path: &Path) {
    image::RgbImage::from_fn(IMAGE_WIDTH, IMAGE_HEIGHT, |x, y| {
        image::Rgb([(x * 255 / IMAGE_WIDTH) as u8, (y * 255 / IMAGE_HEIGHT) as u8, 96])
    })
    .save(path)
    .expect("write sample image");
}

fn write_media(path: &Path, with_video: bool) {
    ffmpeg_next::init().expect("FFmpeg init");

    let mut output = format::output(&path).expect("open fixture output");
    let global_header = output.format().flags().contains(format::Flags::GLOBAL_HEADER);

    let mut video = with_video.then(|| VideoTrack::open(&mut output, global_header));
    let mut audio = AudioTrack::open(&mut output, global_header);
    output.write_header().expect("fixture header");

    let total_frames = i64::from(VIDEO_FPS * DURATION_SECONDS);
    let total_samples = i64::from(SAMPLE_RATE * DURATION_SECONDS);
    let mut frame_index = 0;
    loop {
        let video_left = video.is_some() && frame_index < total_frames;
        let audio_left = audio.next_sample < total_samples;
        if !video_left && !audio_left {
            break;
        }

        let video_time = frame_index as f64 / f64::from(VIDEO_FPS);
        let audio_time = audio.next_sample as f64 / f64::from(SAMPLE_RATE);
        match video.as_mut() {
            Some(track) if video_left && (!audio_left || video_time <= audio_time) => {
                track.write_frame(&mut output, frame_index);
                frame_index += 1;
            }
            _ => audio.write_frame(&mut output, total_samples),
        }
    }

    if let Some(track) = video.as_mut() {
        track.finish(&mut output);
    }
    audio.finish(&mut output);
    output.write_trailer().expect("fixture trailer");
}

fn set_global_header(context: &mut CodecContext) {
    unsafe {
        (*context.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
    }
}

fn drain(encoder: &mut encoder::Encoder, output: &mut Output, stream_index: usize, time_base: Rational) {
    let stream_time_base = output.stream(stream_index).expect("fixture stream").time_base();
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(time_base, stream_time_base);
        packet.write_interleaved(output).expect("write fixture packet");
    }
}

struct VideoTrack {
    encoder: encoder::Video,
    stream_index: usize,
}

impl VideoTrack {
    fn time_base() -> Rational {
        Rational(1, VIDEO_FPS)
    }

    fn open(output: &mut Output, global_header: bool) -> Self {
        let codec = encoder::find_by_name("libx264")
            .or_else(|| encoder::find(codec::Id::MPEG4))
            .expect("an H.264 or MPEG-4 encoder");

        let mut context = CodecContext::new_with_codec(codec);
        if global_header {
            set_global_header(&mut context);
        }
        let mut video = context.encoder().video().expect("video encoder context");
        video.set_width(VIDEO_WIDTH);
        video.set_height(VIDEO_HEIGHT);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(Self::time_base());
        video.set_frame_rate(Some(Rational(VIDEO_FPS, 1)));
        video.set_gop(VIDEO_FPS as u32);
        video.set_max_b_frames(2);

        let mut options = Dictionary::new();
        options.set("preset", "veryfast");
        let encoder = video.open_as_with(codec, options).expect("open video encoder");

        let mut stream = output.add_stream(codec).expect("video stream");
        stream.set_parameters(&encoder);
        stream.set_time_base(Self::time_base());
        let stream_index = stream.index();

        Self { encoder, stream_index }
    }

    fn write_frame(&mut self, output: &mut Output, index: i64) {
        let mut picture = frame::Video::new(Pixel::YUV420P, VIDEO_WIDTH, VIDEO_HEIGHT);
        paint(&mut picture, index);
        picture.set_pts(Some(index));
        self.encoder.send_frame(&picture).expect("send video frame");
        drain(&mut self.encoder, output, self.stream_index, Self::time_base());
    }

    fn finish(&mut self, output: &mut Output) {
        self.encoder.send_eof().expect("flush video encoder");
        drain(&mut self.encoder, output, self.stream_index, Self::time_base());
    }
}

// A pattern that moves every frame so the encoder has real motion to code.
fn paint(picture: &mut frame::Video, index: i64) {
    let shift = index as usize * 4;
    for plane in 0..3 {
        let (width, height) = if plane == 0 {
            (VIDEO_WIDTH as usize, VIDEO_HEIGHT as usize)
        } else {
            (VIDEO_WIDTH as usize / 2, VIDEO_HEIGHT as usize / 2)
        };
        let stride = picture.stride(plane);
        let data = picture.data_mut(plane);
        for y in 0..height {
            for x in 0..width {
                data[y * stride + x] = match plane {
                    0 => ((x + shift) ^ y) as u8,
                    1 => (128 + (x + shift) / 8) as u8,
                    _ => (y * 255 / height) as u8,
                };
            }
        }
    }
}

struct AudioTrack {
    encoder: encoder::Audio,
    stream_index: usize,
    frame_size: usize,
    next_sample: i64,
}

impl AudioTrack {
    fn time_base() -> Rational {
        Rational(1, SAMPLE_RATE)
    }

    fn open(output: &mut Output, global_header: bool) -> Self {
        let codec = encoder::find(codec::Id::AAC).expect("an AAC encoder");

        let mut context = CodecContext::new_with_codec(codec);
        if global_header {
            set_global_header(&mut context);
        }
        let mut audio = context.encoder().audio().expect("audio encoder context");
        audio.set_rate(SAMPLE_RATE);
        audio.set_channel_layout(ChannelLayout::STEREO);
        audio.set_format(Sample::F32(SampleType::Planar));
        audio.set_bit_rate(128_000);
        audio.set_time_base(Self::time_base());
        let encoder = audio.open_as(codec).expect("open AAC encoder");

        let frame_size = match encoder.frame_size() {
            0 => 1024,
            size => size as usize,
        };

        let mut stream = output.add_stream(codec).expect("audio stream");
        stream.set_parameters(&encoder);
        stream.set_time_base(Self::time_base());
        let stream_index = stream.index();

        Self {
            encoder,
            stream_index,
            frame_size,
            next_sample: 0,
        }
    }

    fn write_frame(&mut self, output: &mut Output, total_samples: i64) {
        let samples = self.frame_size.min((total_samples - self.next_sample) as usize);
        let mut chunk = frame::Audio::new(Sample::F32(SampleType::Planar), samples, ChannelLayout::STEREO);
        chunk.set_rate(SAMPLE_RATE as u32);

        for channel in 0..2 {
            let bytes = chunk.data_mut(channel);
            for (offset, sample) in bytes.chunks_exact_mut(4).take(samples).enumerate() {
                let time = (self.next_sample + offset as i64) as f64 / f64::from(SAMPLE_RATE);
                let value = (0.4 * (2.0 * PI * 440.0 * time).sin()) as f32;
                sample.copy_from_slice(&value.to_ne_bytes());
            }
        }

        chunk.set_pts(Some(self.next_sample));
        self.next_sample += samples as i64;
        self.encoder.send_frame(&chunk).expect("send audio frame");
        drain(&mut self.encoder, output, self.stream_index, Self::time_base());
    }

    fn finish(&mut self, output: &mut Output) {
        self.encoder.send_eof().expect("flush audio encoder");
        drain(&mut self.encoder, output, self.stream_index, Self::time_base());
    }
}
