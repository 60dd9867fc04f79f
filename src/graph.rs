//! Filter graph instances.
//!
//! Wraps an FFmpeg filter graph with one buffer source (`in`) and one buffer
//! sink (`out`) around a chain produced by [`filter`](crate::filter). Filter
//! names are checked before parsing so an unknown filter is reported by
//! name instead of as a generic parse failure.

use ffmpeg_next::{
    ChannelLayout, Rational,
    filter::Graph as FilterGraph,
    format::{Pixel, Sample},
    frame::{Audio as AudioFrame, Video as VideoFrame},
};
use ffmpeg_sys_next::AVPixelFormat;

use crate::codec::{is_again, is_end};
use crate::error::ConvertError;

fn invalid(context: &str, error: impl std::fmt::Display) -> ConvertError {
    ConvertError::FilterGraphInvalid(format!("{context}: {error}"))
}

/// Every filter name a chain refers to, labels stripped.
pub(crate) fn filter_names(chain: &str) -> Vec<String> {
    chain
        .split([';', ','])
        .filter_map(|stage| {
            let mut rest = stage.trim();
            while let Some(stripped) = rest.strip_prefix('[') {
                rest = stripped.split_once(']').map_or("", |(_, after)| after).trim_start();
            }
            let name: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

fn check_filters(chain: &str) -> Result<(), ConvertError> {
    for name in filter_names(chain) {
        if ffmpeg_next::filter::find(&name).is_none() {
            return Err(ConvertError::FilterGraphInvalid(format!(
                "unknown filter '{name}' in \"{chain}\""
            )));
        }
    }
    Ok(())
}

fn build(source: &str, source_args: &str, sink: &str, chain: &str) -> Result<FilterGraph, ConvertError> {
    check_filters(chain)?;

    let mut graph = FilterGraph::new();
    let source_filter = ffmpeg_next::filter::find(source)
        .ok_or_else(|| ConvertError::FilterGraphInvalid(format!("FFmpeg '{source}' filter not found")))?;
    let sink_filter = ffmpeg_next::filter::find(sink)
        .ok_or_else(|| ConvertError::FilterGraphInvalid(format!("FFmpeg '{sink}' filter not found")))?;

    graph
        .add(&source_filter, "in", source_args)
        .map_err(|error| invalid("failed to add source", error))?;
    graph
        .add(&sink_filter, "out", "")
        .map_err(|error| invalid("failed to add sink", error))?;

    graph
        .output("in", 0)
        .map_err(|error| invalid("graph output", error))?
        .input("out", 0)
        .map_err(|error| invalid("graph input", error))?
        .parse(chain)
        .map_err(|error| invalid(&format!("cannot parse \"{chain}\""), error))?;
    graph.validate().map_err(|error| invalid("graph validation", error))?;

    Ok(graph)
}

fn push_into(graph: &mut FilterGraph, frame: &ffmpeg_next::Frame) -> Result<(), ConvertError> {
    graph
        .get("in")
        .ok_or_else(|| ConvertError::FilterGraphInvalid("filter 'in' not found".to_string()))?
        .source()
        .add(frame)
        .map_err(|error| invalid("failed to feed filter", error))
}

fn flush_graph(graph: &mut FilterGraph) -> Result<(), ConvertError> {
    graph
        .get("in")
        .ok_or_else(|| ConvertError::FilterGraphInvalid("filter 'in' not found".to_string()))?
        .source()
        .flush()
        .map_err(|error| invalid("failed to flush filter", error))
}

fn pull_from(graph: &mut FilterGraph, frame: &mut ffmpeg_next::Frame) -> Result<bool, ConvertError> {
    let mut sink = graph
        .get("out")
        .ok_or_else(|| ConvertError::FilterGraphInvalid("filter 'out' not found".to_string()))?;
    match sink.sink().frame(frame) {
        Ok(()) => Ok(true),
        Err(error) if is_again(&error) || is_end(&error) => Ok(false),
        Err(error) => Err(invalid("filter failed", error)),
    }
}

fn sink_time_base(graph: &mut FilterGraph) -> Option<Rational> {
    let sink = graph.get("out")?;
    let time_base = unsafe { ffmpeg_sys_next::av_buffersink_get_time_base(sink.as_ptr()) };
    Some(Rational::from(time_base))
}

/// Properties of the frames fed into a video graph.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VideoInput {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pixel_format: Pixel,
    pub(crate) time_base: Rational,
    pub(crate) frame_rate: Option<Rational>,
}

/// A video filter graph.
pub(crate) struct VideoFilterGraph {
    graph: FilterGraph,
}

impl VideoFilterGraph {
    pub(crate) fn new(input: &VideoInput, chain: &str) -> Result<Self, ConvertError> {
        let mut args = format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
            input.width,
            input.height,
            AVPixelFormat::from(input.pixel_format) as i32,
            input.time_base.numerator(),
            input.time_base.denominator().max(1),
        );
        if let Some(rate) = input.frame_rate.filter(|rate| rate.numerator() > 0 && rate.denominator() > 0) {
            args.push_str(&format!(":frame_rate={}/{}", rate.numerator(), rate.denominator()));
        }

        log::debug!("Building video filter graph \"{chain}\" ({args})");
        let graph = build("buffer", &args, "buffersink", chain)?;
        Ok(Self { graph })
    }

    pub(crate) fn push(&mut self, frame: &VideoFrame) -> Result<(), ConvertError> {
        push_into(&mut self.graph, frame)
    }

    pub(crate) fn flush(&mut self) -> Result<(), ConvertError> {
        flush_graph(&mut self.graph)
    }

    /// Pull one filtered frame; `false` when none is ready.
    pub(crate) fn pull(&mut self, frame: &mut VideoFrame) -> Result<bool, ConvertError> {
        pull_from(&mut self.graph, frame)
    }

    /// Time base of the frames coming out of the sink.
    pub(crate) fn output_time_base(&mut self) -> Option<Rational> {
        sink_time_base(&mut self.graph)
    }
}

/// Properties of the frames fed into an audio graph.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AudioInput {
    pub(crate) sample_rate: u32,
    pub(crate) sample_format: Sample,
    pub(crate) channel_layout: ChannelLayout,
    pub(crate) channels: u16,
}

/// An audio filter graph. Frames are timed in samples (`1/sample_rate`).
pub(crate) struct AudioFilterGraph {
    graph: FilterGraph,
}

impl AudioFilterGraph {
    pub(crate) fn new(input: &AudioInput, chain: &str) -> Result<Self, ConvertError> {
        let mut layout = input.channel_layout.bits();
        if layout == 0 {
            layout = ChannelLayout::default(i32::from(input.channels)).bits();
        }
        let args = format!(
            "time_base=1/{rate}:sample_rate={rate}:sample_fmt={}:channel_layout=0x{layout:x}",
            input.sample_format.name(),
            rate = input.sample_rate,
        );

        log::debug!("Building audio filter graph \"{chain}\" ({args})");
        let graph = build("abuffer", &args, "abuffersink", chain)?;
        Ok(Self { graph })
    }

    pub(crate) fn push(&mut self, frame: &AudioFrame) -> Result<(), ConvertError> {
        push_into(&mut self.graph, frame)
    }

    pub(crate) fn flush(&mut self) -> Result<(), ConvertError> {
        flush_graph(&mut self.graph)
    }

    /// Pull one filtered frame; `false` when none is ready.
    pub(crate) fn pull(&mut self, frame: &mut AudioFrame) -> Result<bool, ConvertError> {
        pull_from(&mut self.graph, frame)
    }
}
