use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use convertify::{
    AudioCodec, ContainerFormat, ConversionRequest, ConvertError, CropRect, FfmpegLogLevel,
    GifTranscoder, ImageFormat, ImageTranscoder, JobOptions, MediaInfo, MediaKind, MediaProbe,
    Pipeline, ProgressCallback, QualityPreset, TranscodingProgress, VideoCodec,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

const CLI_AFTER_HELP: &str = "Examples:\n  convertify probe input.mp4 --json\n  convertify transcode input.mov output.mp4 --quality high --progress\n  convertify transcode input.mp4 clip.webm --start 0:00:02 --end 0:00:07 --width 640\n  convertify gif input.mp4 clip.gif --fps 10 --width 320\n  convertify image photo.png photo.jpg --quality 0.8\n  convertify completions zsh > _convertify";

#[derive(Debug, Parser)]
#[command(
    name = "convertify",
    version,
    about = "Convert, trim, compress, and re-encode audio, video, and image files",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional logging output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long)]
    log_level: Option<String>,

    /// Codec worker thread count (0 lets FFmpeg decide).
    #[arg(long)]
    threads: Option<usize>,

    /// Prefer hardware video encoders when the FFmpeg build has them.
    #[arg(long)]
    hardware: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print stream information for a media file.
    #[command(
        about = "Print stream information",
        visible_alias = "info",
        after_help = "Examples:\n  convertify probe input.mp4\n  convertify probe input.mp4 --json"
    )]
    Probe {
        /// Input media path.
        input: PathBuf,

        /// Output stream information as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Convert a media file to another container or encoding.
    #[command(
        about = "Convert, trim, or re-encode a media file",
        visible_alias = "convert",
        after_help = "Examples:\n  convertify transcode input.mov output.mp4\n  convertify transcode input.mp4 audio.m4a --no-video\n  convertify transcode input.mkv output.mp4 --copy-video --audio-codec aac\n  convertify transcode input.mp4 small.mp4 --crf 30 --width 1280 --crop 0:140:1920:800"
    )]
    Transcode {
        /// Input media path.
        input: PathBuf,
        /// Output media path; its extension picks the container unless --format is given.
        output: PathBuf,
        /// Output container (mp4, mov, mkv, webm, avi, m4a, flac, wav, mp3, ogg).
        #[arg(long)]
        format: Option<String>,
        /// Quality preset (low, medium, high, lossless).
        #[arg(long, default_value = "medium")]
        quality: String,
        /// Start time in seconds or [hh:]mm:ss[.fff].
        #[arg(long)]
        start: Option<String>,
        /// End time in seconds or [hh:]mm:ss[.fff].
        #[arg(long)]
        end: Option<String>,
        /// Output width; height follows the aspect ratio unless given.
        #[arg(long)]
        width: Option<u32>,
        /// Output height; width follows the aspect ratio unless given.
        #[arg(long)]
        height: Option<u32>,
        /// Output frame rate.
        #[arg(long)]
        fps: Option<f64>,
        /// Video codec (h264, hevc, vp9, av1, mpeg4, prores).
        #[arg(long)]
        video_codec: Option<String>,
        /// Audio codec (aac, mp3, opus, vorbis, flac, pcm, alac).
        #[arg(long)]
        audio_codec: Option<String>,
        /// Constant rate factor; overrides the quality preset.
        #[arg(long)]
        crf: Option<u32>,
        /// Video bit rate in bits per second; overrides the quality preset.
        #[arg(long)]
        bitrate: Option<u64>,
        /// Audio bit rate in bits per second.
        #[arg(long)]
        audio_bitrate: Option<u64>,
        /// Crop rectangle as x:y:width:height in source pixels.
        #[arg(long)]
        crop: Option<String>,
        /// Copy the video stream without re-encoding.
        #[arg(long, conflicts_with = "no_video")]
        copy_video: bool,
        /// Copy the audio stream without re-encoding.
        #[arg(long, conflicts_with = "no_audio")]
        copy_audio: bool,
        /// Drop the video stream.
        #[arg(long)]
        no_video: bool,
        /// Drop the audio stream.
        #[arg(long)]
        no_audio: bool,
    },

    /// Turn a video clip into an animated GIF.
    #[command(
        about = "Make an animated GIF",
        after_help = "Examples:\n  convertify gif input.mp4 clip.gif\n  convertify gif input.mp4 clip.gif --fps 15 --width 480 --start 3 --end 8 --repeat 0"
    )]
    Gif {
        /// Input video path.
        input: PathBuf,
        /// Output GIF path.
        output: PathBuf,
        /// Output frame rate.
        #[arg(long, default_value_t = 10.0)]
        fps: f64,
        /// Output width; height follows the aspect ratio.
        #[arg(long, default_value_t = 320)]
        width: u32,
        /// Start time in seconds or [hh:]mm:ss[.fff].
        #[arg(long)]
        start: Option<String>,
        /// End time in seconds or [hh:]mm:ss[.fff].
        #[arg(long)]
        end: Option<String>,
        /// Crop rectangle as x:y:width:height in source pixels.
        #[arg(long)]
        crop: Option<String>,
        /// Extra plays after the first; loops forever when omitted.
        #[arg(long)]
        repeat: Option<u16>,
    },

    /// Convert a still image.
    #[command(
        about = "Convert a still image",
        after_help = "Examples:\n  convertify image photo.png photo.jpg\n  convertify image photo.heic photo.webp --width 1200 --quality 0.75\n  convertify image logo.png favicon.ico"
    )]
    Image {
        /// Input image path.
        input: PathBuf,
        /// Output image path; its extension picks the format.
        output: PathBuf,
        /// Output width.
        #[arg(long)]
        width: Option<u32>,
        /// Output height.
        #[arg(long)]
        height: Option<u32>,
        /// Quality between 0.0 and 1.0 for lossy formats.
        #[arg(long, default_value_t = 0.85)]
        quality: f32,
    },

    /// List the encoders and hardware devices of the linked FFmpeg build.
    #[command(about = "Show encoder and hardware support")]
    Encoders {
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions.
    #[command(
        about = "Generate shell completion scripts",
        after_help = "Examples:\n  convertify completions bash > convertify.bash\n  convertify completions zsh > _convertify"
    )]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_timecode(value: &str) -> Result<f64, Box<dyn std::error::Error>> {
    if !value.contains(':') {
        let seconds = value.parse::<f64>()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(format!("invalid time: {value}").into());
        }
        return Ok(seconds);
    }

    let parts: Vec<&str> = value.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [minutes, seconds] => (0.0, minutes.parse::<f64>()?, seconds.parse::<f64>()?),
        [hours, minutes, seconds] => (
            hours.parse::<f64>()?,
            minutes.parse::<f64>()?,
            seconds.parse::<f64>()?,
        ),
        _ => return Err(format!("invalid timecode: {value}").into()),
    };
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return Err(format!("invalid timecode: {value}").into());
    }
    Ok(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_crop(value: &str) -> Result<CropRect, Box<dyn std::error::Error>> {
    let parts = value
        .split(':')
        .map(str::parse::<u32>)
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [x, y, width, height] => Ok(CropRect::new(*x, *y, *width, *height)),
        _ => Err(format!("invalid --crop (expected x:y:width:height): {value}").into()),
    }
}

fn parse_optional_time(value: Option<&str>) -> Result<Option<f64>, Box<dyn std::error::Error>> {
    value.map(parse_timecode).transpose()
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn job_options(global: &GlobalOptions) -> JobOptions {
    JobOptions::new().with_threads(global.threads.unwrap_or(0))
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(level) = &global.log_level {
        let parsed =
            FfmpegLogLevel::from_name(level).ok_or(format!("unsupported --log-level: {level}"))?;
        convertify::set_ffmpeg_log_level(parsed);
    } else if !global.verbose {
        convertify::set_ffmpeg_log_level(FfmpegLogLevel::Error);
    }

    if global.hardware && !convertify::detect_capabilities().available {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            "--hardware was given but no hardware encoder is available; using software".yellow()
        );
    }

    Ok(())
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(1000);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} [{bar:40.cyan/blue}] {percent:>3}% {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, progress: &TranscodingProgress) {
        self.bar.set_position((progress.percentage * 1000.0).round() as u64);
        self.bar.set_message(format!(
            "{:.1}s / {:.1}s  {:.2}x  {} frames",
            progress.current_time.as_secs_f64(),
            progress.total_duration.as_secs_f64(),
            progress.speed,
            progress.frame_count,
        ));
    }
}

/// Run a job with an optional terminal progress bar.
fn with_progress<F>(enabled: bool, job: F) -> Result<(), ConvertError>
where
    F: FnOnce(&dyn ProgressCallback) -> Result<(), ConvertError>,
{
    if enabled {
        let terminal = TerminalProgress::new();
        let result = job(&terminal);
        terminal.finish();
        result
    } else {
        job(&convertify::NoOpProgress)
    }
}

fn print_probe(info: &MediaInfo, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if as_json {
        let streams: Vec<_> = info
            .streams
            .iter()
            .map(|stream| {
                json!({
                    "index": stream.index,
                    "kind": match stream.kind {
                        MediaKind::Video => "video",
                        MediaKind::Audio => "audio",
                    },
                    "codec": stream.codec,
                    "duration_seconds": stream.duration.map(|duration| duration.as_secs_f64()),
                    "bit_rate": stream.bit_rate,
                    "width": stream.video.as_ref().map(|video| video.width),
                    "height": stream.video.as_ref().map(|video| video.height),
                    "fps": stream.video.as_ref().and_then(|video| video.frames_per_second()),
                    "frame_count": stream.video.as_ref().and_then(|video| video.frame_count),
                    "sample_rate": stream.audio.as_ref().map(|audio| audio.sample_rate),
                    "channels": stream.audio.as_ref().map(|audio| audio.channels),
                })
            })
            .collect();
        let payload = json!({
            "format": info.format_name,
            "duration_seconds": info.duration.as_secs_f64(),
            "bit_rate": info.bit_rate,
            "streams": streams,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("Format: {}", info.format_name);
    println!("Duration: {:.3}s", info.duration.as_secs_f64());
    if info.bit_rate > 0 {
        println!("Bit rate: {} kb/s", info.bit_rate / 1000);
    }
    for stream in &info.streams {
        if let Some(video) = &stream.video {
            let fps = video
                .frames_per_second()
                .map(|fps| format!("{fps:.2} fps"))
                .unwrap_or_else(|| "unknown fps".to_string());
            println!(
                "Stream #{}: Video {}x{} @ {} [{}]",
                stream.index, video.width, video.height, fps, stream.codec,
            );
        } else if let Some(audio) = &stream.audio {
            println!(
                "Stream #{}: Audio {} Hz, {} ch [{}]",
                stream.index, audio.sample_rate, audio.channels, stream.codec,
            );
        }
    }
    Ok(())
}

fn report_outcome(result: Result<(), ConvertError>, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(()) => {
            println!("{} {}", "saved".green().bold(), output.display());
            Ok(())
        }
        Err(error) if error.is_cancelled() => {
            eprintln!("{}", "cancelled".yellow().bold());
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Probe { input, json } => {
            let info = MediaProbe::inspect(&input)?;
            print_probe(&info, json)?;
        }
        Commands::Transcode {
            input,
            output,
            format,
            quality,
            start,
            end,
            width,
            height,
            fps,
            video_codec,
            audio_codec,
            crf,
            bitrate,
            audio_bitrate,
            crop,
            copy_video,
            copy_audio,
            no_video,
            no_audio,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;

            let quality = QualityPreset::from_name(&quality)
                .ok_or(format!("unsupported --quality: {quality}"))?;
            let mut request = ConversionRequest::new(&input, &output)
                .with_quality(quality)
                .with_trim(
                    parse_optional_time(start.as_deref())?,
                    parse_optional_time(end.as_deref())?,
                )
                .prefer_hardware(cli.global.hardware);

            if let Some(format) = format {
                let container = ContainerFormat::from_extension(&format)
                    .ok_or(format!("unsupported --format: {format}"))?;
                request = request.with_format(container);
            }
            if let Some(width) = width {
                request = request.with_target_width(width);
            }
            if let Some(height) = height {
                request = request.with_target_height(height);
            }
            if let Some(fps) = fps {
                request = request.with_frame_rate(fps);
            }
            if let Some(name) = video_codec {
                let codec = VideoCodec::from_name(&name)
                    .ok_or(format!("unsupported --video-codec: {name}"))?;
                request = request.with_video_codec(codec);
            }
            if let Some(name) = audio_codec {
                let codec = AudioCodec::from_name(&name)
                    .ok_or(format!("unsupported --audio-codec: {name}"))?;
                request = request.with_audio_codec(codec);
            }
            if let Some(crf) = crf {
                request = request.with_crf(crf);
            }
            if let Some(bitrate) = bitrate {
                request = request.with_video_bit_rate(bitrate);
            }
            if let Some(bitrate) = audio_bitrate {
                request = request.with_audio_bit_rate(bitrate);
            }
            if let Some(crop) = crop {
                request = request.with_crop(parse_crop(&crop)?);
            }
            if copy_video {
                request = request.keep_original_video();
            }
            if copy_audio {
                request = request.keep_original_audio();
            }
            if no_video {
                request = request.remove_video();
            }
            if no_audio {
                request = request.remove_audio();
            }

            let config = request.into_config()?;
            if cli.global.verbose {
                eprintln!(
                    "{} {} -> {} ({:?}, video {:?}, audio {:?})",
                    "transcode".cyan().bold(),
                    input.display(),
                    output.display(),
                    config.container,
                    config.video_plan(),
                    config.audio_plan(),
                );
            }

            let mut pipeline = Pipeline::new(config).with_options(job_options(&cli.global));
            let result = with_progress(cli.global.progress, |progress| pipeline.transcode(progress));
            report_outcome(result, &output)?;
        }
        Commands::Gif {
            input,
            output,
            fps,
            width,
            start,
            end,
            crop,
            repeat,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;

            let crop = crop.as_deref().map(parse_crop).transpose()?;
            let mut gif = GifTranscoder::new(
                &input,
                &output,
                fps,
                width,
                crop,
                parse_optional_time(start.as_deref())?,
                parse_optional_time(end.as_deref())?,
            )
            .with_repeat(repeat)
            .with_options(job_options(&cli.global));

            let result = with_progress(cli.global.progress, |progress| gif.run(progress));
            report_outcome(result, &output)?;
        }
        Commands::Image {
            input,
            output,
            width,
            height,
            quality,
        } => {
            ensure_writable_path(&output, cli.global.overwrite)?;

            let format = ImageFormat::from_path(&output).ok_or(format!(
                "unsupported image extension: {}",
                output.display()
            ))?;
            let mut transcoder = ImageTranscoder::new(&input, &output)
                .with_format(format)
                .with_quality(quality);
            if let Some(width) = width {
                transcoder = transcoder.with_width(width);
            }
            if let Some(height) = height {
                transcoder = transcoder.with_height(height);
            }
            report_outcome(transcoder.run(), &output)?;
        }
        Commands::Encoders { json } => {
            let capabilities = convertify::detect_capabilities();
            let devices: Vec<&str> = convertify::available_hardware_devices()
                .into_iter()
                .map(|device| device.name())
                .collect();
            if json {
                let payload = json!({
                    "hardware_available": capabilities.available,
                    "encoders": capabilities.encoders,
                    "hardware_devices": devices,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "Hardware: {}",
                    if capabilities.available {
                        "available".green()
                    } else {
                        "not available".yellow()
                    }
                );
                println!("Encoders: {}", capabilities.encoders.iter().cloned().collect::<Vec<_>>().join(", "));
                if devices.is_empty() {
                    println!("Devices: none");
                } else {
                    println!("Devices: {}", devices.join(", "));
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "convertify", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_crop, parse_timecode};

    #[test]
    fn parse_timecode_formats() {
        assert_eq!(parse_timecode("75").unwrap(), 75.0);
        assert_eq!(parse_timecode("2.5").unwrap(), 2.5);
        assert_eq!(parse_timecode("01:15").unwrap(), 75.0);
        assert_eq!(parse_timecode("00:01:15.5").unwrap(), 75.5);
        assert!(parse_timecode("-3").is_err());
        assert!(parse_timecode("1:2:3:4").is_err());
    }

    #[test]
    fn parse_crop_rectangles() {
        let crop = parse_crop("10:20:640:360").unwrap();
        assert_eq!((crop.x, crop.y, crop.width, crop.height), (10, 20, 640, 360));
        assert!(parse_crop("10:20:640").is_err());
        assert!(parse_crop("a:b:c:d").is_err());
    }
}
