//! Audio output: time-stretch filtering, resampling and the device sink.
//!
//! Three concerns cooperate inside the device's pull callback:
//!
//! 1. A filter graph `abuffer → atempo → abuffersink` applies pitch-
//!    preserving speed change. Tempo is restricted to 0.5–1.0; changing it
//!    rebuilds the graph with the sink drained, never hot-patches it.
//! 2. The sink accepts one fixed format — interleaved signed 16-bit stereo
//!    at the stream's sample rate. The first filtered frame that disagrees
//!    lazily builds a resampler which then converts every subsequent frame;
//!    matching payloads are copied directly.
//! 3. The callback itself runs on a thread this crate does not own. All
//!    state it touches lives behind one mutex for which the callback is the
//!    only steady-state contender; the control side only takes it with the
//!    stream paused.
//!
//! At the end of every non-paused callback the most recent frame's
//! timestamp is written to the master clock. The jitter this accepts equals
//! one callback buffer, far below A/V-sync perception thresholds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::Rational;
use parking_lot::Mutex;

use crate::clock::MasterClock;
use crate::media::{AudioFrame, AudioParams, PlayerError};
use crate::queue::{BoundedQueue, PopResult};

/// Sink format: stereo, S16 interleaved, 512-sample pull buffer.
const SINK_CHANNELS: u16 = 2;
const SINK_BUFFER_SAMPLES: u32 = 512;

/// Bytes of silence emitted when no frame (or no filter output) is ready,
/// so the callback makes progress instead of spinning.
const SILENCE_CHUNK_BYTES: usize = 512;

/// Legal tempo range. The atempo filter itself supports up to 2.0 but this
/// player only slows down.
const MIN_SPEED: f32 = 0.5;
const MAX_SPEED: f32 = 1.0;

/// How long the callback waits for a decoded frame before emitting silence.
const FRAME_POP_TIMEOUT: Duration = Duration::from_millis(2);

const BYTES_PER_SAMPLE: usize = std::mem::size_of::<i16>();

/// Clamps a requested playback speed into the supported tempo range.
pub fn clamp_speed(speed: f32) -> f32 {
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

/// Rolling PCM cursor over the most recently rendered frame.
///
/// Invariant: `0 <= index <= size`. `data == None` with a non-zero size
/// means the region reads as silence.
#[derive(Default)]
struct PcmCursor {
    data: Option<Vec<u8>>,
    size: usize,
    index: usize,
}

impl PcmCursor {
    fn exhausted(&self) -> bool {
        self.index >= self.size
    }

    fn load(&mut self, bytes: Vec<u8>) {
        self.size = bytes.len();
        self.index = 0;
        self.data = Some(bytes);
    }

    fn fill_silence(&mut self) {
        self.data = None;
        self.size = SILENCE_CHUNK_BYTES;
        self.index = 0;
    }

    /// Invalidates any buffered samples, e.g. ones produced at a stale tempo.
    fn clear(&mut self) {
        self.data = None;
        self.size = 0;
        self.index = 0;
    }

    fn next_sample(&mut self) -> i16 {
        if self.exhausted() {
            return 0;
        }
        let sample = match &self.data {
            Some(bytes) => i16::from_ne_bytes([bytes[self.index], bytes[self.index + 1]]),
            None => 0,
        };
        self.index += BYTES_PER_SAMPLE;
        sample
    }
}

/// The `abuffer → atempo → abuffersink` graph.
struct TempoGraph {
    graph: ffmpeg::filter::Graph,
}

impl TempoGraph {
    fn new(params: &AudioParams, time_base: Rational, tempo: f32) -> Result<Self, ffmpeg::Error> {
        let mut graph = ffmpeg::filter::Graph::new();

        let args = format!(
            "time_base={}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
            time_base,
            params.rate,
            params.format.name(),
            params.channel_layout.bits(),
        );

        graph.add(
            &ffmpeg::filter::find("abuffer").ok_or(ffmpeg::Error::FilterNotFound)?,
            "in",
            &args,
        )?;
        graph.add(
            &ffmpeg::filter::find("abuffersink").ok_or(ffmpeg::Error::FilterNotFound)?,
            "out",
            "",
        )?;

        graph
            .output("in", 0)?
            .input("out", 0)?
            .parse(&format!("atempo={tempo}"))?;
        graph.validate()?;

        Ok(Self { graph })
    }

    fn push(&mut self, frame: &ffmpeg::frame::Audio) -> Result<(), ffmpeg::Error> {
        match self.graph.get("in") {
            Some(mut source) => source.source().add(frame),
            None => Err(ffmpeg::Error::FilterNotFound),
        }
    }

    fn pull(&mut self) -> Result<ffmpeg::frame::Audio, ffmpeg::Error> {
        let mut filtered = ffmpeg::frame::Audio::empty();
        match self.graph.get("out") {
            Some(mut sink) => sink.sink().frame(&mut filtered)?,
            None => return Err(ffmpeg::Error::FilterNotFound),
        }
        Ok(filtered)
    }
}

/// Callback-side state: everything the pull callback reads or writes.
struct PipelineState {
    graph: TempoGraph,
    resampler: Option<ffmpeg::software::resampling::Context>,
    cursor: PcmCursor,
    /// Timestamp (seconds) of the newest frame handed to the sink.
    last_pts: f64,
    /// Seconds per timestamp unit of the audio stream.
    time_base: f64,
    sink_rate: u32,
    sink_layout: ffmpeg::ChannelLayout,
    sink_format: ffmpeg::format::Sample,
}

// SAFETY: PipelineState lives inside an Arc<Mutex<..>>. The callback thread
// is its only steady-state user; the control thread takes the same mutex
// only while the stream is paused (speed change). The FFmpeg graph and
// resampler inside are therefore never accessed concurrently.
unsafe impl Send for PipelineState {}

impl PipelineState {
    /// Pops one frame, runs it through the filter graph and renders PCM for
    /// the cursor. Any miss (no frame, filter starving, conversion failure)
    /// degrades to a silence chunk; the next refill retries with new input.
    fn refill(&mut self, frames: &BoundedQueue<AudioFrame>) {
        let frame = match frames.pop(FRAME_POP_TIMEOUT) {
            PopResult::Item(frame) => frame,
            PopResult::TimedOut | PopResult::Aborted => {
                self.cursor.fill_silence();
                return;
            }
        };

        if let Err(e) = self.graph.push(frame.inner()) {
            tracing::trace!("filter graph rejected frame: {e}");
            self.cursor.fill_silence();
            return;
        }
        drop(frame);

        let filtered = match self.graph.pull() {
            Ok(filtered) => filtered,
            Err(_) => {
                // atempo buffers internally and may owe nothing yet.
                self.cursor.fill_silence();
                return;
            }
        };

        if let Some(pts) = filtered.pts() {
            self.last_pts = pts as f64 * self.time_base;
        }

        match self.render(&filtered) {
            Ok(bytes) => self.cursor.load(bytes),
            Err(e) => {
                tracing::trace!("pcm render failed: {e}");
                self.cursor.fill_silence();
            }
        }
    }

    /// Converts a filtered frame into interleaved S16 bytes for the sink,
    /// building the resampler on the first format mismatch.
    fn render(&mut self, filtered: &ffmpeg::frame::Audio) -> Result<Vec<u8>, ffmpeg::Error> {
        let matches_sink = filtered.format() == self.sink_format
            && filtered.rate() == self.sink_rate
            && filtered.channel_layout() == self.sink_layout;

        if !matches_sink && self.resampler.is_none() {
            tracing::debug!(
                "sink format mismatch ({} @ {} Hz), building resampler",
                filtered.format().name(),
                filtered.rate(),
            );
            self.resampler = Some(ffmpeg::software::resampling::Context::get(
                filtered.format(),
                filtered.channel_layout(),
                filtered.rate(),
                self.sink_format,
                self.sink_layout,
                self.sink_rate,
            )?);
        }

        if let Some(resampler) = self.resampler.as_mut() {
            let mut converted = ffmpeg::frame::Audio::empty();
            let _delay = resampler.run(filtered, &mut converted)?;
            let channels = self.sink_layout.channels() as usize;
            let bytes = converted.samples() * channels * BYTES_PER_SAMPLE;
            Ok(converted.data(0)[..bytes].to_vec())
        } else {
            let channels = filtered.channel_layout().channels() as usize;
            let bytes = filtered.samples() * channels * BYTES_PER_SAMPLE;
            Ok(filtered.data(0)[..bytes].to_vec())
        }
    }
}

/// Owns the device stream and the filtering/resampling state feeding it.
pub struct AudioOutput {
    stream: cpal::Stream,
    state: Arc<Mutex<PipelineState>>,
    paused: Arc<AtomicBool>,
    speed: f32,
    params: AudioParams,
    time_base: Rational,
}

impl AudioOutput {
    /// Opens the default output device at the stream's sample rate and
    /// starts pulling. Playback is audible as soon as frames arrive.
    pub fn new(
        clock: MasterClock,
        params: AudioParams,
        frames: Arc<BoundedQueue<AudioFrame>>,
        time_base: Rational,
    ) -> Result<Self, PlayerError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioSink("no output device available".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlayerError::AudioSink(format!("querying output config: {e}")))?;
        let sample_format = supported.sample_format();

        let config = cpal::StreamConfig {
            channels: SINK_CHANNELS,
            sample_rate: cpal::SampleRate(params.rate),
            buffer_size: cpal::BufferSize::Fixed(SINK_BUFFER_SAMPLES),
        };

        let graph = TempoGraph::new(&params, time_base, MAX_SPEED)
            .map_err(|e| PlayerError::AudioSink(format!("tempo filter graph: {e}")))?;

        let state = Arc::new(Mutex::new(PipelineState {
            graph,
            resampler: None,
            cursor: PcmCursor::default(),
            last_pts: 0.0,
            time_base: f64::from(time_base),
            sink_rate: params.rate,
            sink_layout: ffmpeg::ChannelLayout::STEREO,
            sink_format: ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed),
        }));
        let paused = Arc::new(AtomicBool::new(false));

        let stream = build_sink_stream(
            &device,
            &config,
            sample_format,
            frames,
            Arc::clone(&state),
            Arc::clone(&paused),
            clock,
        )?;
        stream
            .play()
            .map_err(|e| PlayerError::AudioSink(format!("starting stream: {e}")))?;

        tracing::info!(
            "audio sink open: {} Hz stereo s16, {} sample pull buffer, device format {:?}",
            params.rate,
            SINK_BUFFER_SAMPLES,
            sample_format,
        );

        Ok(Self {
            stream,
            state,
            paused,
            speed: MAX_SPEED,
            params,
            time_base,
        })
    }

    /// Silences the callback without tearing anything down. The clock is not
    /// ticked while paused, so video holds position too.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Changes the playback tempo, returning the effective (clamped) speed.
    ///
    /// The sink is drained to silence, the filter graph rebuilt with the new
    /// tempo literal and the PCM cursor invalidated so no sample produced at
    /// the old tempo survives. The resampler is untouched: the graph's
    /// output format does not depend on tempo.
    pub fn set_speed(&mut self, speed: f32) -> f32 {
        let clamped = clamp_speed(speed);
        if (clamped - self.speed).abs() < f32::EPSILON {
            return self.speed;
        }

        if let Err(e) = self.stream.pause() {
            tracing::warn!("pausing stream for speed change: {e}");
        }
        {
            let mut state = self.state.lock();
            match TempoGraph::new(&self.params, self.time_base, clamped) {
                Ok(graph) => {
                    state.graph = graph;
                    state.cursor.clear();
                    self.speed = clamped;
                    tracing::debug!("tempo graph rebuilt at {clamped}x");
                }
                Err(e) => {
                    // Keep playing at the old tempo rather than go silent.
                    tracing::error!("tempo graph rebuild failed: {e}");
                }
            }
        }
        if let Err(e) = self.stream.play() {
            tracing::warn!("resuming stream after speed change: {e}");
        }

        self.speed
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stream.pause();
    }
}

fn build_sink_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    frames: Arc<BoundedQueue<AudioFrame>>,
    state: Arc<Mutex<PipelineState>>,
    paused: Arc<AtomicBool>,
    clock: MasterClock,
) -> Result<cpal::Stream, PlayerError> {
    match sample_format {
        SampleFormat::I16 => build_typed::<i16>(device, config, frames, state, paused, clock),
        SampleFormat::I32 => build_typed::<i32>(device, config, frames, state, paused, clock),
        SampleFormat::U16 => build_typed::<u16>(device, config, frames, state, paused, clock),
        SampleFormat::F32 => build_typed::<f32>(device, config, frames, state, paused, clock),
        SampleFormat::F64 => build_typed::<f64>(device, config, frames, state, paused, clock),
        other => Err(PlayerError::AudioSink(format!(
            "unsupported device sample format: {other:?}"
        ))),
    }
}

/// Builds the pull callback for one device sample type.
///
/// The pipeline's internal contract stays S16 interleaved; a device whose
/// native format differs gets a per-sample conversion on the way out.
fn build_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: Arc<BoundedQueue<AudioFrame>>,
    state: Arc<Mutex<PipelineState>>,
    paused: Arc<AtomicBool>,
    clock: MasterClock,
) -> Result<cpal::Stream, PlayerError>
where
    T: SizedSample + FromSample<i16>,
{
    let err_fn = |e| tracing::warn!("audio stream error: {e}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if paused.load(Ordering::Acquire) {
                    data.fill(T::from_sample(0i16));
                    return;
                }

                let mut state = state.lock();
                for slot in data.iter_mut() {
                    if state.cursor.exhausted() {
                        state.refill(&frames);
                    }
                    *slot = T::from_sample(state.cursor.next_sample());
                }
                clock.set(state.last_pts);
            },
            err_fn,
            None,
        )
        .map_err(|e| PlayerError::AudioSink(format!("building output stream: {e}")))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_clamps_into_supported_range() {
        assert_eq!(clamp_speed(0.1), 0.5);
        assert_eq!(clamp_speed(0.5), 0.5);
        assert_eq!(clamp_speed(0.75), 0.75);
        assert_eq!(clamp_speed(1.0), 1.0);
        assert_eq!(clamp_speed(2.0), 1.0);
    }

    #[test]
    fn cursor_starts_exhausted() {
        let cursor = PcmCursor::default();
        assert!(cursor.exhausted());
    }

    #[test]
    fn cursor_yields_loaded_samples_in_order() {
        let mut cursor = PcmCursor::default();
        let samples: [i16; 3] = [100, -2000, 30000];
        let mut bytes = Vec::new();
        for s in samples {
            bytes.extend_from_slice(&s.to_ne_bytes());
        }
        cursor.load(bytes);

        for expected in samples {
            assert!(!cursor.exhausted());
            assert_eq!(cursor.next_sample(), expected);
        }
        assert!(cursor.exhausted());
    }

    #[test]
    fn silence_region_reads_as_zeros() {
        let mut cursor = PcmCursor::default();
        cursor.fill_silence();
        let mut produced = 0;
        while !cursor.exhausted() {
            assert_eq!(cursor.next_sample(), 0);
            produced += BYTES_PER_SAMPLE;
        }
        assert_eq!(produced, SILENCE_CHUNK_BYTES);
    }

    #[test]
    fn clear_discards_buffered_samples() {
        let mut cursor = PcmCursor::default();
        cursor.load(vec![1, 0, 2, 0, 3, 0, 4, 0]);
        assert_eq!(cursor.next_sample(), 1);

        cursor.clear();
        assert!(cursor.exhausted());
        assert_eq!(cursor.next_sample(), 0);
    }
}
