//! Per-stream packet processing.
//!
//! A job owns one [`Lane`] per output stream. The demux loop hands every
//! packet of a lane's input stream to [`Lane::process`]; once the loop ends
//! [`Lane::finish`] drains decoders, filter graphs, and encoders into the
//! muxer. Dropping a lane releases every native handle it owns.

use std::time::Duration;

use ffmpeg_next::{
    ChannelLayout, Packet, Rational,
    decoder::{Audio as AudioDecoder, Opened as OpenedDecoder, Video as VideoDecoder},
    encoder::{Audio as AudioEncoder, Encoder, Video as VideoEncoder},
    format::{Pixel, Sample, context::Output},
    frame::{Audio as AudioFrame, Video as VideoFrame},
    picture,
    software::resampling::Context as ResamplingContext,
};

use crate::codec::{SampleFifo, is_again, is_end};
use crate::error::ConvertError;
use crate::filter::{AudioSource, AudioTransform, VideoSource, VideoTransform, audio_chain, video_chain};
use crate::graph::{AudioFilterGraph, AudioInput, VideoFilterGraph, VideoInput};
use crate::hardware;
use crate::progress::ProgressTracker;
use crate::timestamp::{self, rescale};

/// Trim window and timestamp origin shared by every lane of a job.
///
/// With a start time, output timestamps are shifted so the first packet read
/// after the (keyframe-biased) seek lands near zero.
#[derive(Debug, Clone, Default)]
pub(crate) struct Timeline {
    start_us: Option<i64>,
    end_us: Option<i64>,
    origin_us: Option<i64>,
}

impl Timeline {
    pub(crate) fn new(start: Option<f64>, end: Option<f64>) -> Self {
        Self {
            start_us: start.map(timestamp::seconds_to_microseconds),
            end_us: end.map(timestamp::seconds_to_microseconds),
            origin_us: None,
        }
    }

    pub(crate) fn start_us(&self) -> Option<i64> {
        self.start_us
    }

    /// Record the first packet after the seek.
    pub(crate) fn observe(&mut self, packet: &Packet, time_base: Rational) {
        let Some(start) = self.start_us else {
            return;
        };
        if self.origin_us.is_some() {
            return;
        }
        if let Some(ts) = packet.dts().or(packet.pts()).filter(|ts| timestamp::is_set(*ts)) {
            let first = timestamp::to_microseconds(ts, time_base);
            self.origin_us = Some(first.min(start));
        }
    }

    /// The origin expressed in `time_base` ticks.
    pub(crate) fn origin_in(&self, time_base: Rational) -> i64 {
        let origin = self.origin_us.or(self.start_us).unwrap_or(0);
        timestamp::from_microseconds(origin, time_base)
    }

    pub(crate) fn is_past_end(&self, microseconds: i64) -> bool {
        self.end_us.is_some_and(|end| microseconds > end)
    }

    fn is_past_end_in(&self, value: i64, time_base: Rational) -> bool {
        timestamp::is_set(value) && self.is_past_end(timestamp::to_microseconds(value, time_base))
    }

    /// Whether `packet` is decoded after the window ends. Decode timestamps
    /// never run ahead of presentation timestamps, so every later packet is
    /// also shown after the end.
    pub(crate) fn is_closed_by(&self, packet: &Packet, time_base: Rational) -> bool {
        packet
            .dts()
            .or(packet.pts())
            .is_some_and(|reference| self.is_past_end_in(reference, time_base))
    }

    /// Whether `packet` is shown after the window ends, even though it may
    /// be decoded inside it.
    pub(crate) fn is_shown_after_end(&self, packet: &Packet, time_base: Rational) -> bool {
        packet.pts().is_some_and(|pts| self.is_past_end_in(pts, time_base))
    }
}

/// Muxer handle plus the job's progress accounting.
pub(crate) struct PacketSink<'o, 'p> {
    output: &'o mut Output,
    tracker: ProgressTracker<'p>,
    bytes_written: u64,
}

impl<'o, 'p> PacketSink<'o, 'p> {
    pub(crate) fn new(output: &'o mut Output, tracker: ProgressTracker<'p>) -> Self {
        Self {
            output,
            tracker,
            bytes_written: 0,
        }
    }

    /// Rescale `packet` from `time_base` to the output stream's time base and
    /// hand it to the interleaving muxer.
    pub(crate) fn write(
        &mut self,
        packet: &mut Packet,
        stream_index: usize,
        time_base: Rational,
    ) -> Result<(), ConvertError> {
        let output_time_base = self
            .output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| ConvertError::MuxingFailed(format!("no output stream {stream_index}")))?;

        packet.set_stream(stream_index);
        packet.rescale_ts(time_base, output_time_base);
        packet.set_position(-1);
        self.bytes_written += packet.size() as u64;

        packet
            .write_interleaved(self.output)
            .map_err(|error| ConvertError::MuxingFailed(error.to_string()))
    }

    pub(crate) fn frame_done(&mut self, time: Duration) {
        self.tracker.advance(time, self.bytes_written);
    }

    /// Release the muxer, keeping the tracker for the final report.
    pub(crate) fn into_tracker(self) -> (ProgressTracker<'p>, u64) {
        (self.tracker, self.bytes_written)
    }
}

/// One output stream's worth of work.
pub(crate) trait Lane {
    /// Index of the input stream this lane consumes.
    fn input_index(&self) -> usize;

    /// Whether the lane has seen the end of its trim window.
    fn is_finished(&self) -> bool;

    /// Handle one demuxed packet of this lane's input stream.
    fn process(
        &mut self,
        packet: &Packet,
        sink: &mut PacketSink<'_, '_>,
        timeline: &Timeline,
    ) -> Result<(), ConvertError>;

    /// Drain everything still buffered into the muxer.
    fn finish(&mut self, sink: &mut PacketSink<'_, '_>, timeline: &Timeline) -> Result<(), ConvertError>;
}

fn duration_of(value: i64, time_base: Rational) -> Duration {
    timestamp::seconds_to_duration(timestamp::to_seconds(value, time_base))
}

// Send one frame (or end of stream) and write whatever comes out.
fn encode(
    encoder: &mut Encoder,
    frame: Option<&ffmpeg_next::Frame>,
    sink: &mut PacketSink<'_, '_>,
    stream_index: usize,
    time_base: Rational,
) -> Result<(), ConvertError> {
    let send = |encoder: &mut Encoder| match frame {
        Some(frame) => encoder.send_frame(frame),
        None => encoder.send_eof(),
    };

    match send(encoder) {
        Ok(()) => {}
        Err(error) if is_again(&error) => {
            drain_encoder(encoder, sink, stream_index, time_base)?;
            send(encoder).map_err(|error| ConvertError::EncodingFailed(error.to_string()))?;
        }
        Err(error) if is_end(&error) => return Ok(()),
        Err(error) => return Err(ConvertError::EncodingFailed(error.to_string())),
    }

    drain_encoder(encoder, sink, stream_index, time_base)
}

fn drain_encoder(
    encoder: &mut Encoder,
    sink: &mut PacketSink<'_, '_>,
    stream_index: usize,
    time_base: Rational,
) -> Result<(), ConvertError> {
    loop {
        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => sink.write(&mut packet, stream_index, time_base)?,
            Err(error) if is_again(&error) || is_end(&error) => return Ok(()),
            Err(error) => return Err(ConvertError::EncodingFailed(error.to_string())),
        }
    }
}

// Feed a packet (or end of stream) to a decoder, retrying once after the
// caller drains frames if the decoder is full.
fn send_to_decoder(decoder: &mut OpenedDecoder, packet: Option<&Packet>) -> Result<bool, ConvertError> {
    let result = match packet {
        Some(packet) => decoder.send_packet(packet),
        None => decoder.send_eof(),
    };
    match result {
        Ok(()) => Ok(true),
        Err(error) if is_again(&error) => Ok(false),
        Err(error) if is_end(&error) => Ok(true),
        Err(error) => Err(ConvertError::DecodingFailed(error.to_string())),
    }
}

fn receive_from_decoder(decoder: &mut OpenedDecoder, frame: &mut ffmpeg_next::Frame) -> Result<bool, ConvertError> {
    match decoder.receive_frame(frame) {
        Ok(()) => Ok(true),
        Err(error) if is_again(&error) || is_end(&error) => Ok(false),
        Err(error) => Err(ConvertError::DecodingFailed(error.to_string())),
    }
}

/// Passes packets through without decoding.
pub(crate) struct CopyLane {
    input_index: usize,
    output_index: usize,
    input_time_base: Rational,
    drives_progress: bool,
    finished: bool,
}

impl CopyLane {
    pub(crate) fn new(input_index: usize, output_index: usize, input_time_base: Rational, drives_progress: bool) -> Self {
        Self {
            input_index,
            output_index,
            input_time_base,
            drives_progress,
            finished: false,
        }
    }
}

impl Lane for CopyLane {
    fn input_index(&self) -> usize {
        self.input_index
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn process(
        &mut self,
        packet: &Packet,
        sink: &mut PacketSink<'_, '_>,
        timeline: &Timeline,
    ) -> Result<(), ConvertError> {
        if self.finished {
            return Ok(());
        }

        let time_base = self.input_time_base;
        if timeline.is_closed_by(packet, time_base) {
            self.finished = true;
            return Ok(());
        }
        if timeline.is_shown_after_end(packet, time_base) {
            return Ok(());
        }

        let origin = timeline.origin_in(time_base);
        let mut packet = packet.clone();
        packet.set_pts(packet.pts().map(|pts| pts - origin));
        packet.set_dts(packet.dts().map(|dts| dts - origin));
        let time = packet.pts().map(|pts| duration_of(pts, time_base));

        sink.write(&mut packet, self.output_index, time_base)?;
        if self.drives_progress {
            sink.frame_done(time.unwrap_or_default());
        }
        Ok(())
    }

    fn finish(&mut self, _sink: &mut PacketSink<'_, '_>, _timeline: &Timeline) -> Result<(), ConvertError> {
        self.finished = true;
        Ok(())
    }
}

/// How the encoder's timestamps are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PtsMode {
    /// Rescale each frame's own timestamp.
    Source,
    /// Number frames 0, 1, 2, ... in the encoder time base.
    FrameIndex,
}

/// Where a video lane counts a frame towards progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressPoint {
    /// On every encoded frame.
    Encoded,
    /// On every decoded frame inside the trim window. For graphs that hold
    /// all frames back until end of stream, like palette generation.
    Decoded,
}

/// Which filter graph a video lane runs.
#[derive(Debug, Clone)]
pub(crate) enum VideoFilterPlan {
    /// Crop/fps/scale/format chain, omitted entirely when it would be a
    /// no-op for the decoded frames.
    Transform {
        transform: VideoTransform,
        extra: Vec<String>,
    },
    /// A fixed chain that always runs.
    Fixed(String),
}

/// Decode, filter, and re-encode one video stream.
pub(crate) struct VideoEncodeLane {
    pub(crate) input_index: usize,
    pub(crate) output_index: usize,
    pub(crate) input_time_base: Rational,
    pub(crate) source_frame_rate: Option<Rational>,
    pub(crate) decoder: VideoDecoder,
    pub(crate) hardware_decode: bool,
    pub(crate) encoder: VideoEncoder,
    pub(crate) encoder_time_base: Rational,
    pub(crate) filter: VideoFilterPlan,
    pub(crate) pts_mode: PtsMode,
    pub(crate) progress: ProgressPoint,
    graph: Option<VideoFilterGraph>,
    graph_decided: bool,
    last_source_pts: Option<i64>,
    last_pts: Option<i64>,
    next_index: i64,
    finished: bool,
}

/// Everything a [`VideoEncodeLane`] needs, gathered at setup time.
pub(crate) struct VideoLaneParts {
    pub(crate) input_index: usize,
    pub(crate) output_index: usize,
    pub(crate) input_time_base: Rational,
    pub(crate) source_frame_rate: Option<Rational>,
    pub(crate) decoder: VideoDecoder,
    pub(crate) hardware_decode: bool,
    pub(crate) encoder: VideoEncoder,
    pub(crate) encoder_time_base: Rational,
    pub(crate) filter: VideoFilterPlan,
    pub(crate) pts_mode: PtsMode,
    pub(crate) progress: ProgressPoint,
}

impl VideoEncodeLane {
    pub(crate) fn new(parts: VideoLaneParts) -> Self {
        Self {
            input_index: parts.input_index,
            output_index: parts.output_index,
            input_time_base: parts.input_time_base,
            source_frame_rate: parts.source_frame_rate,
            decoder: parts.decoder,
            hardware_decode: parts.hardware_decode,
            encoder: parts.encoder,
            encoder_time_base: parts.encoder_time_base,
            filter: parts.filter,
            pts_mode: parts.pts_mode,
            progress: parts.progress,
            graph: None,
            graph_decided: false,
            last_source_pts: None,
            last_pts: None,
            next_index: 0,
            finished: false,
        }
    }

    fn frame_ticks(&self) -> i64 {
        self.source_frame_rate
            .filter(|rate| rate.numerator() > 0 && rate.denominator() > 0)
            .map(|rate| rescale(1, Rational(rate.denominator(), rate.numerator()), self.input_time_base))
            .unwrap_or(1)
            .max(1)
    }

    fn build_graph(&self, frame: &VideoFrame) -> Result<Option<VideoFilterGraph>, ConvertError> {
        let chain = match &self.filter {
            VideoFilterPlan::Fixed(chain) => Some(chain.clone()),
            VideoFilterPlan::Transform { transform, extra } => {
                let source = VideoSource {
                    width: frame.width(),
                    height: frame.height(),
                    frame_rate: self.source_frame_rate.and_then(timestamp::frames_per_second),
                    pixel_format: pixel_name(frame.format()),
                };
                video_chain(&source, transform, extra)?
            }
        };

        let Some(chain) = chain else {
            log::debug!("Decoded frames already match the encoder; no video filter graph");
            return Ok(None);
        };

        let input = VideoInput {
            width: frame.width(),
            height: frame.height(),
            pixel_format: frame.format(),
            time_base: self.input_time_base,
            frame_rate: self.source_frame_rate,
        };
        VideoFilterGraph::new(&input, &chain).map(Some)
    }

    fn drain_decoder(&mut self, sink: &mut PacketSink<'_, '_>, timeline: &Timeline) -> Result<(), ConvertError> {
        loop {
            let mut frame = VideoFrame::empty();
            if !receive_from_decoder(&mut self.decoder, &mut frame)? {
                return Ok(());
            }
            self.handle_decoded(frame, sink, timeline)?;
        }
    }

    fn handle_decoded(
        &mut self,
        frame: VideoFrame,
        sink: &mut PacketSink<'_, '_>,
        timeline: &Timeline,
    ) -> Result<(), ConvertError> {
        let mut frame = if self.hardware_decode {
            hardware::download_frame(&frame)?.unwrap_or(frame)
        } else {
            frame
        };

        let pts = match frame.timestamp().or(frame.pts()).filter(|pts| timestamp::is_set(*pts)) {
            Some(pts) => pts,
            None => self.last_source_pts.map_or(0, |last| last + self.frame_ticks()),
        };
        if timeline.is_past_end_in(pts, self.input_time_base) {
            return Ok(());
        }
        self.last_source_pts = Some(pts);
        let shifted = pts - timeline.origin_in(self.input_time_base);
        frame.set_pts(Some(shifted));
        if self.progress == ProgressPoint::Decoded {
            sink.frame_done(duration_of(shifted, self.input_time_base));
        }

        if !self.graph_decided {
            self.graph = self.build_graph(&frame)?;
            self.graph_decided = true;
        }

        match self.graph.as_mut() {
            Some(graph) => {
                graph.push(&frame)?;
                self.drain_graph(sink)
            }
            None => {
                let time_base = self.input_time_base;
                self.encode_frame(&mut frame, time_base, sink)
            }
        }
    }

    fn drain_graph(&mut self, sink: &mut PacketSink<'_, '_>) -> Result<(), ConvertError> {
        loop {
            let (mut filtered, time_base) = {
                let Some(graph) = self.graph.as_mut() else {
                    return Ok(());
                };
                let mut filtered = VideoFrame::empty();
                if !graph.pull(&mut filtered)? {
                    return Ok(());
                }
                let time_base = graph.output_time_base().unwrap_or(self.input_time_base);
                (filtered, time_base)
            };
            self.encode_frame(&mut filtered, time_base, sink)?;
        }
    }

    fn encode_frame(
        &mut self,
        frame: &mut VideoFrame,
        time_base: Rational,
        sink: &mut PacketSink<'_, '_>,
    ) -> Result<(), ConvertError> {
        let pts = match self.pts_mode {
            PtsMode::FrameIndex => {
                let index = self.next_index;
                self.next_index += 1;
                index
            }
            PtsMode::Source => {
                let pts = match frame.pts() {
                    Some(pts) => rescale(pts, time_base, self.encoder_time_base),
                    None => self.last_pts.map_or(0, |last| last + 1),
                };
                if self.last_pts.is_some_and(|last| pts <= last) {
                    log::trace!("Dropping frame with non-increasing timestamp {pts}");
                    return Ok(());
                }
                pts
            }
        };
        self.last_pts = Some(pts);

        frame.set_pts(Some(pts));
        frame.set_kind(picture::Type::None);
        encode(&mut self.encoder, Some(&**frame), sink, self.output_index, self.encoder_time_base)?;

        if self.progress == ProgressPoint::Encoded {
            sink.frame_done(duration_of(pts, self.encoder_time_base));
        }
        Ok(())
    }
}

impl Lane for VideoEncodeLane {
    fn input_index(&self) -> usize {
        self.input_index
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn process(
        &mut self,
        packet: &Packet,
        sink: &mut PacketSink<'_, '_>,
        timeline: &Timeline,
    ) -> Result<(), ConvertError> {
        if self.finished {
            return Ok(());
        }
        if timeline.is_closed_by(packet, self.input_time_base) {
            self.finished = true;
            return Ok(());
        }

        if !send_to_decoder(&mut self.decoder, Some(packet))? {
            self.drain_decoder(sink, timeline)?;
            if !send_to_decoder(&mut self.decoder, Some(packet))? {
                return Err(ConvertError::DecodingFailed("video decoder refused input".to_string()));
            }
        }
        self.drain_decoder(sink, timeline)
    }

    fn finish(&mut self, sink: &mut PacketSink<'_, '_>, timeline: &Timeline) -> Result<(), ConvertError> {
        self.finished = true;

        send_to_decoder(&mut self.decoder, None)?;
        self.drain_decoder(sink, timeline)?;

        if let Some(graph) = self.graph.as_mut() {
            graph.flush()?;
            self.drain_graph(sink)?;
        }

        encode(&mut self.encoder, None, sink, self.output_index, self.encoder_time_base)
    }
}

/// Decode, filter, resample, and re-encode one audio stream.
pub(crate) struct AudioEncodeLane {
    input_index: usize,
    output_index: usize,
    input_time_base: Rational,
    decoder: AudioDecoder,
    encoder: AudioEncoder,
    encoder_rate: u32,
    encoder_format: Sample,
    encoder_channels: u16,
    transform: AudioTransform,
    drives_progress: bool,
    frame_size: usize,
    fifo: SampleFifo,
    graph: Option<AudioFilterGraph>,
    graph_decided: bool,
    graph_samples: i64,
    resampler: Option<ResamplingContext>,
    resampler_decided: bool,
    next_pts: Option<i64>,
    finished: bool,
}

/// Everything an [`AudioEncodeLane`] needs, gathered at setup time.
pub(crate) struct AudioLaneParts {
    pub(crate) input_index: usize,
    pub(crate) output_index: usize,
    pub(crate) input_time_base: Rational,
    pub(crate) decoder: AudioDecoder,
    pub(crate) encoder: AudioEncoder,
    pub(crate) encoder_rate: u32,
    pub(crate) encoder_format: Sample,
    pub(crate) encoder_channels: u16,
    pub(crate) transform: AudioTransform,
    pub(crate) drives_progress: bool,
}

impl AudioEncodeLane {
    pub(crate) fn new(parts: AudioLaneParts) -> Result<Self, ConvertError> {
        let frame_size = match parts.encoder.frame_size() {
            0 => 1024,
            size => size as usize,
        };
        let fifo = SampleFifo::new(
            parts.encoder_format,
            parts.encoder_channels,
            parts.encoder_rate,
            frame_size * 4,
        )?;

        Ok(Self {
            input_index: parts.input_index,
            output_index: parts.output_index,
            input_time_base: parts.input_time_base,
            decoder: parts.decoder,
            encoder: parts.encoder,
            encoder_rate: parts.encoder_rate,
            encoder_format: parts.encoder_format,
            encoder_channels: parts.encoder_channels,
            transform: parts.transform,
            drives_progress: parts.drives_progress,
            frame_size,
            fifo,
            graph: None,
            graph_decided: false,
            graph_samples: 0,
            resampler: None,
            resampler_decided: false,
            next_pts: None,
            finished: false,
        })
    }

    fn encoder_time_base(&self) -> Rational {
        Rational(1, self.encoder_rate as i32)
    }

    fn encoder_layout(&self) -> ChannelLayout {
        ChannelLayout::default(i32::from(self.encoder_channels))
    }

    fn drain_decoder(&mut self, sink: &mut PacketSink<'_, '_>, timeline: &Timeline) -> Result<(), ConvertError> {
        loop {
            let mut frame = AudioFrame::empty();
            if !receive_from_decoder(&mut self.decoder, &mut frame)? {
                return Ok(());
            }
            self.handle_decoded(frame, sink, timeline)?;
        }
    }

    fn handle_decoded(
        &mut self,
        mut frame: AudioFrame,
        sink: &mut PacketSink<'_, '_>,
        timeline: &Timeline,
    ) -> Result<(), ConvertError> {
        let pts = frame.timestamp().or(frame.pts()).filter(|pts| timestamp::is_set(*pts));
        if pts.is_some_and(|pts| timeline.is_past_end_in(pts, self.input_time_base)) {
            return Ok(());
        }

        if self.next_pts.is_none() {
            let shifted = pts.map_or(0, |pts| pts - timeline.origin_in(self.input_time_base));
            self.next_pts = Some(rescale(shifted, self.input_time_base, self.encoder_time_base()));
        }

        if !self.graph_decided {
            let source = AudioSource {
                sample_rate: frame.rate(),
                channels: frame.channels(),
            };
            self.graph = match audio_chain(&source, &self.transform)? {
                Some(chain) => {
                    let input = AudioInput {
                        sample_rate: frame.rate(),
                        sample_format: frame.format(),
                        channel_layout: frame.channel_layout(),
                        channels: frame.channels(),
                    };
                    Some(AudioFilterGraph::new(&input, &chain)?)
                }
                None => None,
            };
            self.graph_decided = true;
        }

        if self.graph.is_none() {
            return self.queue(&frame, sink);
        }

        frame.set_pts(Some(self.graph_samples));
        self.graph_samples += frame.samples() as i64;
        if let Some(graph) = self.graph.as_mut() {
            graph.push(&frame)?;
        }
        self.drain_graph(sink)
    }

    fn drain_graph(&mut self, sink: &mut PacketSink<'_, '_>) -> Result<(), ConvertError> {
        loop {
            let filtered = {
                let Some(graph) = self.graph.as_mut() else {
                    return Ok(());
                };
                let mut filtered = AudioFrame::empty();
                if !graph.pull(&mut filtered)? {
                    return Ok(());
                }
                filtered
            };
            self.queue(&filtered, sink)?;
        }
    }

    // Convert to the encoder's format if needed, buffer, and encode every
    // complete frame.
    fn queue(&mut self, frame: &AudioFrame, sink: &mut PacketSink<'_, '_>) -> Result<(), ConvertError> {
        if !self.resampler_decided {
            let matches = frame.format() == self.encoder_format
                && frame.rate() == self.encoder_rate
                && frame.channels() == self.encoder_channels;
            if !matches {
                let mut layout = frame.channel_layout();
                if layout.bits() == 0 {
                    layout = ChannelLayout::default(i32::from(frame.channels()));
                }
                let resampler = ResamplingContext::get(
                    frame.format(),
                    layout,
                    frame.rate(),
                    self.encoder_format,
                    self.encoder_layout(),
                    self.encoder_rate,
                )
                .map_err(|error| ConvertError::EncodingFailed(format!("cannot create resampler: {error}")))?;
                log::debug!(
                    "Resampling {:?}@{} Hz x{} to {:?}@{} Hz x{}",
                    frame.format(),
                    frame.rate(),
                    frame.channels(),
                    self.encoder_format,
                    self.encoder_rate,
                    self.encoder_channels
                );
                self.resampler = Some(resampler);
            }
            self.resampler_decided = true;
        }

        match self.resampler.as_mut() {
            Some(resampler) => {
                let capacity = resampled_capacity(frame.samples(), frame.rate(), self.encoder_rate);
                let mut converted = AudioFrame::new(self.encoder_format, capacity, self.encoder_layout());
                resampler
                    .run(frame, &mut converted)
                    .map_err(|error| ConvertError::EncodingFailed(format!("resampling failed: {error}")))?;
                self.fifo.push(&converted)?;
            }
            None => self.fifo.push(frame)?,
        }

        self.drain_fifo(false, sink)
    }

    fn drain_fifo(&mut self, flush: bool, sink: &mut PacketSink<'_, '_>) -> Result<(), ConvertError> {
        while self.fifo.len() >= self.frame_size || (flush && self.fifo.len() > 0) {
            let mut frame = self.fifo.pop(self.frame_size)?;
            let pts = self.next_pts.unwrap_or(0);
            self.next_pts = Some(pts + frame.samples() as i64);
            frame.set_pts(Some(pts));

            let time_base = self.encoder_time_base();
            encode(&mut self.encoder, Some(&*frame), sink, self.output_index, time_base)?;
            if self.drives_progress {
                sink.frame_done(duration_of(pts, time_base));
            }
        }
        Ok(())
    }

    fn flush_resampler(&mut self) -> Result<(), ConvertError> {
        let layout = self.encoder_layout();
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        loop {
            let mut converted = AudioFrame::new(self.encoder_format, self.frame_size.max(1024), layout);
            resampler
                .flush(&mut converted)
                .map_err(|error| ConvertError::EncodingFailed(format!("resampler flush failed: {error}")))?;
            if converted.samples() == 0 {
                return Ok(());
            }
            self.fifo.push(&converted)?;
        }
    }
}

impl Lane for AudioEncodeLane {
    fn input_index(&self) -> usize {
        self.input_index
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn process(
        &mut self,
        packet: &Packet,
        sink: &mut PacketSink<'_, '_>,
        timeline: &Timeline,
    ) -> Result<(), ConvertError> {
        if self.finished {
            return Ok(());
        }
        if timeline.is_closed_by(packet, self.input_time_base) {
            self.finished = true;
            return Ok(());
        }

        if !send_to_decoder(&mut self.decoder, Some(packet))? {
            self.drain_decoder(sink, timeline)?;
            if !send_to_decoder(&mut self.decoder, Some(packet))? {
                return Err(ConvertError::DecodingFailed("audio decoder refused input".to_string()));
            }
        }
        self.drain_decoder(sink, timeline)
    }

    fn finish(&mut self, sink: &mut PacketSink<'_, '_>, timeline: &Timeline) -> Result<(), ConvertError> {
        self.finished = true;

        send_to_decoder(&mut self.decoder, None)?;
        self.drain_decoder(sink, timeline)?;

        if let Some(graph) = self.graph.as_mut() {
            graph.flush()?;
            self.drain_graph(sink)?;
        }

        self.flush_resampler()?;
        self.drain_fifo(true, sink)?;

        let time_base = self.encoder_time_base();
        encode(&mut self.encoder, None, sink, self.output_index, time_base)
    }
}

/// Output buffer size for resampling `samples` from `from` Hz to `to` Hz,
/// with headroom for samples the resampler had buffered.
pub(crate) fn resampled_capacity(samples: usize, from: u32, to: u32) -> usize {
    if from == 0 {
        return samples + 256;
    }
    (samples as u64 * u64::from(to)).div_ceil(u64::from(from)) as usize + 256
}

/// FFmpeg name of a pixel format.
pub(crate) fn pixel_name(format: Pixel) -> String {
    format
        .descriptor()
        .map(|descriptor| descriptor.name().to_string())
        .unwrap_or_else(|| format!("{format:?}").to_lowercase())
}
