//! Duplex stream binding through cpal
//!
//! ```text
//! ┌────────────────┐   interleaved f32   ┌──────────────┐
//! │  Input Stream  │──────push()────────►│  rtrb ring   │
//! │  (turntables)  │                     │    (SPSC)    │
//! └────────────────┘                     └──────┬───────┘
//!                                               │ pop() one block
//!                                        ┌──────▼────────┐
//!                                        │ Output Stream │──► Rig::process
//!                                        │  (speakers)   │◄── deck outputs
//!                                        └───────────────┘
//! ```
//!
//! The output callback drives everything: it pulls a block of captured
//! frames, splits them into one stereo pair per deck, runs the rig and
//! interleaves the deck outputs back onto the device channels. When the
//! input side is late, the missing frames are fed to the decoders as
//! silence and counted.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, SampleRate, Stream, StreamConfig};

use super::config::{AudioConfig, Routing, MAX_BUFFER_SIZE};
use super::device::{resolve, Direction};
use super::error::{AudioError, AudioResult};
use crate::rig::{BlockBuffers, Rig};
use crate::types::StereoSample;

/// Rates tried when the configured one is not shared by both devices
const FALLBACK_RATES: [u32; 4] = [44100, 48000, 96000, 88200];

/// Input ring size, in blocks
const RING_BLOCKS: usize = 4;

/// Keeps both streams alive; drop to stop audio
pub struct CpalAudioHandle {
    _input: Stream,
    _output: Stream,
    sample_rate: u32,
    buffer_size: u32,
}

impl CpalAudioHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        self.buffer_size as f32 / self.sample_rate as f32 * 1000.0
    }
}

/// Devices and formats agreed on, ready to start
pub struct StreamPlan {
    input_device: cpal::Device,
    output_device: cpal::Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    sample_rate: u32,
    buffer_size: u32,
    separate: bool,
    decks: usize,
}

impl std::fmt::Debug for StreamPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPlan")
            .field("input", &self.input_device.name().ok())
            .field("output", &self.output_device.name().ok())
            .field("input_channels", &self.input_config.channels)
            .field("output_channels", &self.output_config.channels)
            .field("sample_rate", &self.sample_rate)
            .field("buffer_size", &self.buffer_size)
            .field("separate", &self.separate)
            .finish()
    }
}

fn f32_ranges(
    device: &cpal::Device,
    direction: Direction,
) -> AudioResult<Vec<cpal::SupportedStreamConfigRange>> {
    let ranges = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect::<Vec<_>>(),
        Direction::Output => device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect::<Vec<_>>(),
    };
    Ok(ranges
        .into_iter()
        .filter(|r| r.sample_format() == SampleFormat::F32)
        .collect())
}

/// Best range at `rate`: enough channels for every deck if possible,
/// otherwise the widest
fn pick(
    ranges: &[cpal::SupportedStreamConfigRange],
    rate: u32,
    min_channels: u16,
    want_channels: u16,
) -> Option<cpal::SupportedStreamConfig> {
    let usable = ranges.iter().filter(|r| {
        r.channels() >= min_channels
            && (r.min_sample_rate().0..=r.max_sample_rate().0).contains(&rate)
    });
    let best = usable
        .clone()
        .filter(|r| r.channels() >= want_channels)
        .min_by_key(|r| r.channels())
        .or_else(|| usable.max_by_key(|r| r.channels()))?;
    Some(best.clone().with_sample_rate(SampleRate(rate)))
}

fn describe_rates(ranges: &[cpal::SupportedStreamConfigRange]) -> String {
    let spans: Vec<String> = ranges
        .iter()
        .map(|r| format!("{}-{}Hz/{}ch", r.min_sample_rate().0, r.max_sample_rate().0, r.channels()))
        .collect();
    if spans.is_empty() {
        "no f32 formats".to_string()
    } else {
        spans.join(", ")
    }
}

/// Choose devices, a shared rate and a block size for `decks` decks
pub fn negotiate(config: &AudioConfig, decks: usize) -> AudioResult<StreamPlan> {
    let input_device = resolve(config.input_device.as_ref(), Direction::Input)?;
    let output_device = resolve(config.output_device.as_ref(), Direction::Output)?;
    log::info!(
        "Audio input: {}, output: {}",
        input_device.name().unwrap_or_else(|_| "unknown".to_string()),
        output_device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let inputs = f32_ranges(&input_device, Direction::Input)?;
    let outputs = f32_ranges(&output_device, Direction::Output)?;
    let wanted = config.target_sample_rate();
    let want_channels = (decks * 2).min(u16::MAX as usize) as u16;

    let chosen = std::iter::once(wanted)
        .chain(FALLBACK_RATES.into_iter().filter(|r| *r != wanted))
        .find_map(|rate| {
            let input = pick(&inputs, rate, 1, want_channels)?;
            let output = pick(&outputs, rate, 2, want_channels)?;
            Some((rate, input, output))
        });

    let Some((sample_rate, input, output)) = chosen else {
        return Err(AudioError::SampleRateMismatch {
            wanted,
            input: describe_rates(&inputs),
            output: describe_rates(&outputs),
        });
    };
    if sample_rate != wanted {
        log::warn!("Devices do not share {}Hz, using {}Hz", wanted, sample_rate);
    }

    let buffer_size = config.buffer_size.frames();
    let stream_config = |supported: &cpal::SupportedStreamConfig| StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };
    let input_config = stream_config(&input);
    let output_config = stream_config(&output);

    let separate = config.routing == Routing::Separate
        && output_config.channels as usize >= decks * 2;
    if config.routing == Routing::Separate && !separate {
        log::warn!(
            "Output has {} channels, not enough for {} separate decks; summing",
            output_config.channels,
            decks
        );
    }

    log::info!(
        "Audio config: {} in / {} out channels, {}Hz, {} frames (~{:.1}ms)",
        input_config.channels,
        output_config.channels,
        sample_rate,
        buffer_size,
        config.buffer_size.latency_ms(sample_rate)
    );

    Ok(StreamPlan {
        input_device,
        output_device,
        input_config,
        output_config,
        sample_rate,
        buffer_size,
        separate,
        decks,
    })
}

impl StreamPlan {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Build and start both streams feeding `rig`
    pub fn start(self, rig: Arc<Rig>) -> AudioResult<CpalAudioHandle> {
        if rig.sample_rate() != self.sample_rate {
            log::warn!(
                "Rig runs at {}Hz but the device at {}Hz",
                rig.sample_rate(),
                self.sample_rate
            );
        }
        let decks = self.decks.min(rig.deck_count());
        let in_channels = self.input_config.channels as usize;
        let out_channels = self.output_config.channels as usize;

        let block = (self.buffer_size as usize).min(MAX_BUFFER_SIZE);
        let (mut producer, consumer) = rtrb::RingBuffer::<f32>::new(block * in_channels * RING_BLOCKS);
        // One block of slack absorbs jitter between the two callbacks
        for _ in 0..block * in_channels {
            let _ = producer.push(0.0);
        }

        let mut callback = OutputCallback {
            rig,
            buffers: BlockBuffers::new(decks, MAX_BUFFER_SIZE),
            input: consumer,
            frame: vec![0.0; in_channels],
            out_channels,
            separate: self.separate,
        };

        let output = self
            .output_device
            .build_output_stream(
                &self.output_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| callback.render(data),
                |err| log::error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(format!("output: {}", e)))?;

        let input = self
            .input_device
            .build_input_stream(
                &self.input_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    for &sample in data {
                        // Full ring: the output side stalled, drop the rest
                        if producer.push(sample).is_err() {
                            break;
                        }
                    }
                },
                |err| log::error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(format!("input: {}", e)))?;

        output
            .play()
            .map_err(|e| AudioError::StreamPlayError(format!("output: {}", e)))?;
        input
            .play()
            .map_err(|e| AudioError::StreamPlayError(format!("input: {}", e)))?;
        log::info!("Audio streams started");

        Ok(CpalAudioHandle {
            _input: input,
            _output: output,
            sample_rate: self.sample_rate,
            buffer_size: self.buffer_size,
        })
    }
}

/// State owned by the output callback
struct OutputCallback {
    rig: Arc<Rig>,
    buffers: BlockBuffers,
    input: rtrb::Consumer<f32>,
    /// One captured frame
    frame: Vec<f32>,
    out_channels: usize,
    separate: bool,
}

impl OutputCallback {
    fn render(&mut self, data: &mut [f32]) {
        let channels = self.out_channels.max(1);
        let total = data.len() / channels;
        let max = self.buffers.max_frames().max(1);

        let mut done = 0;
        while done < total {
            let frames = (total - done).min(max);
            self.buffers.set_frames(frames);

            let missing = self.pull_input(frames);
            if missing > 0 {
                self.rig.note_underrun(missing as u64);
            }

            self.rig.process(&mut self.buffers);
            gather_output(
                &self.buffers,
                &mut data[done * channels..(done + frames) * channels],
                channels,
                self.separate,
            );
            done += frames;
        }
    }

    /// Fill deck inputs from the ring; returns frames that were missing
    fn pull_input(&mut self, frames: usize) -> usize {
        let channels = self.frame.len();
        let mut missing = 0;
        for i in 0..frames {
            if channels > 0 && self.input.slots() >= channels {
                for slot in self.frame.iter_mut() {
                    *slot = self.input.pop().unwrap_or(0.0);
                }
            } else {
                self.frame.fill(0.0);
                missing += 1;
            }
            scatter_input(&self.frame, i, &mut self.buffers);
        }
        missing
    }
}

/// Device channels carrying deck `deck`'s turntable
pub(crate) fn input_pair(deck: usize, channels: usize) -> (usize, usize) {
    if channels >= 2 * deck + 2 {
        (2 * deck, 2 * deck + 1)
    } else if channels >= 2 {
        (0, 1)
    } else {
        (0, 0)
    }
}

/// Split one captured frame into every deck's input at `index`
pub(crate) fn scatter_input(frame: &[f32], index: usize, buffers: &mut BlockBuffers) {
    for deck in 0..buffers.decks() {
        let sample = match input_pair(deck, frame.len()) {
            _ if frame.is_empty() => StereoSample::silence(),
            (l, r) => StereoSample::new(frame[l], frame[r]),
        };
        buffers.input_mut(deck)[index] = sample;
    }
}

/// Interleave deck outputs onto the device channels
///
/// Even channel counts are written as `StereoSample` pairs through a
/// bytemuck view of the device buffer.
pub(crate) fn gather_output(buffers: &BlockBuffers, out: &mut [f32], channels: usize, separate: bool) {
    out.fill(0.0);
    for (i, frame) in out.chunks_mut(channels).enumerate() {
        if frame.len() % 2 == 0 {
            let pairs: &mut [StereoSample] = bytemuck::cast_slice_mut(frame);
            if separate {
                for (deck, pair) in pairs.iter_mut().take(buffers.decks()).enumerate() {
                    *pair = buffers.output(deck)[i];
                }
            } else if let Some(pair) = pairs.first_mut() {
                *pair = mix_at(buffers, i);
            }
        } else {
            // Odd layouts (mono cards) only ever carry the mix
            let mix = mix_at(buffers, i);
            frame[0] = mix.left;
            if let Some(right) = frame.get_mut(1) {
                *right = mix.right;
            }
        }
    }
}

fn mix_at(buffers: &BlockBuffers, index: usize) -> StereoSample {
    let mut mix = StereoSample::silence();
    for deck in 0..buffers.decks() {
        mix += buffers.output(deck)[index];
    }
    mix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_pairs() {
        assert_eq!(input_pair(0, 4), (0, 1));
        assert_eq!(input_pair(1, 4), (2, 3));
        assert_eq!(input_pair(2, 4), (0, 1));
        assert_eq!(input_pair(1, 1), (0, 0));
    }

    #[test]
    fn test_scatter_input_per_deck() {
        let mut buffers = BlockBuffers::new(2, 4);
        scatter_input(&[0.1, 0.2, 0.3, 0.4], 1, &mut buffers);
        assert_eq!(buffers.input(0)[1], StereoSample::new(0.1, 0.2));
        assert_eq!(buffers.input(1)[1], StereoSample::new(0.3, 0.4));

        // Stereo card: both decks hear the same pair
        scatter_input(&[0.5, 0.6], 2, &mut buffers);
        assert_eq!(buffers.input(1)[2], StereoSample::new(0.5, 0.6));
    }

    fn outputs(frames: usize) -> BlockBuffers {
        let mut buffers = BlockBuffers::new(2, frames);
        for deck in 0..2 {
            for i in 0..frames {
                buffers.output_mut(deck)[i] = StereoSample::new(0.25 * (deck + 1) as f32, -0.25);
            }
        }
        buffers
    }

    #[test]
    fn test_gather_separate() {
        let buffers = outputs(2);
        let mut out = vec![9.0; 2 * 6];
        gather_output(&buffers, &mut out, 6, true);
        assert_eq!(&out[..6], &[0.25, -0.25, 0.5, -0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_gather_summed() {
        let buffers = outputs(2);
        let mut out = vec![9.0; 2 * 2];
        gather_output(&buffers, &mut out, 2, false);
        assert_eq!(out, vec![0.75, -0.5, 0.75, -0.5]);
    }

    #[test]
    fn test_gather_mono_and_wide_cards() {
        let buffers = outputs(2);

        let mut mono = vec![9.0; 2];
        gather_output(&buffers, &mut mono, 1, false);
        assert_eq!(mono, vec![0.75, 0.75]);

        // Summed mix lands on the first pair only
        let mut wide = vec![9.0; 2 * 4];
        gather_output(&buffers, &mut wide, 4, false);
        assert_eq!(&wide[..4], &[0.75, -0.5, 0.0, 0.0]);
        assert_eq!(&wide[4..], &[0.75, -0.5, 0.0, 0.0]);
    }
}
