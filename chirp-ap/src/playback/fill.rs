//! Fill engine
//!
//! Non-real-time producer, invoked once per scheduling tick. Each playing
//! stream with room in its ring gets a bounded amount of work:
//! - WAV: one chunk of at most `pcm_chunk_samples`, whole frames only
//! - MP3/AAC: at most `compressed_read_bytes` read, decoded one frame at a
//!   time while the ring has room for a whole frame
//! - M4A: at most `frames_per_tick` container frames
//!
//! End of data, storage errors and decode errors all mark the source
//! exhausted; the lifecycle step turns that into Draining and Inactive.

use crate::audio::ring_buffer::SampleRing;
use crate::codec::{DecoderPools, FrameInfo};
use crate::error::{Error, Result};
use crate::playback::source::StreamSource;
use crate::playback::stream::{AudioStream, SlotShared};
use crate::playback::types::StreamState;
use chirp_common::EngineConfig;
use serde::Serialize;
use tracing::{trace, warn};

/// Largest frame the container reader can emit
const FRAME_SCRATCH_BYTES: usize = crate::codec::adts::ADTS_MAX_FRAME_LEN;

/// Totals for one fill tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FillReport {
    pub samples_pushed: u64,
    pub samples_dropped: u64,
    /// Streams whose source ran out during this tick
    pub sources_exhausted: usize,
}

/// Per-stream result of one tick
#[derive(Debug, Default)]
struct StreamFill {
    pushed: u64,
    dropped: u64,
    exhausted: bool,
}

/// Buffers and per-tick limits for the producer context
pub struct FillEngine {
    byte_scratch: Vec<u8>,
    frame_scratch: Vec<u8>,
    tone_scratch: Vec<i16>,
    pcm_chunk_samples: usize,
    compressed_read_bytes: usize,
    frames_per_tick: usize,
}

impl FillEngine {
    /// Allocate all scratch space up front
    pub fn new(config: &EngineConfig) -> Self {
        let byte_len = (config.pcm_chunk_samples * 2).max(config.compressed_read_bytes);
        Self {
            byte_scratch: vec![0; byte_len],
            frame_scratch: vec![0; FRAME_SCRATCH_BYTES],
            tone_scratch: vec![0; config.pcm_chunk_samples],
            pcm_chunk_samples: config.pcm_chunk_samples,
            compressed_read_bytes: config.compressed_read_bytes,
            frames_per_tick: config.frames_per_tick,
        }
    }

    /// Run one tick over every stream
    pub fn fill(&mut self, streams: &mut [AudioStream], pools: &mut DecoderPools) -> FillReport {
        let mut report = FillReport::default();

        for stream in streams.iter_mut() {
            if stream.state() != StreamState::Playing || stream.source_exhausted {
                continue;
            }

            let outcome = match self.fill_stream(stream, pools) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Slot {} source failed, ending stream: {}", stream.index(), e);
                    StreamFill {
                        exhausted: true,
                        ..Default::default()
                    }
                }
            };

            stream.samples_produced += outcome.pushed;
            stream.overflow_samples += outcome.dropped;
            if outcome.exhausted {
                trace!("Slot {} source exhausted", stream.index());
                stream.source_exhausted = true;
                report.sources_exhausted += 1;
            }
            report.samples_pushed += outcome.pushed;
            report.samples_dropped += outcome.dropped;
        }

        report
    }

    fn fill_stream(&mut self, stream: &mut AudioStream, pools: &mut DecoderPools) -> Result<StreamFill> {
        let AudioStream {
            shared,
            source,
            lease,
            channels,
            sample_rate,
            ..
        } = stream;
        let ring = shared.ring();
        let Some(source) = source.as_mut() else {
            return Ok(StreamFill {
                exhausted: true,
                ..Default::default()
            });
        };

        match source {
            StreamSource::Pcm(pcm) => {
                let frame_samples = pcm.info.channels as usize;
                let budget = self.pcm_chunk_samples.min(ring.available_to_write());
                let budget = budget - budget % frame_samples;
                if budget == 0 {
                    return Ok(StreamFill::default());
                }

                let want = ((budget * 2) as u64).min(pcm.remaining) as usize;
                let buf = &mut self.byte_scratch[..want];
                let n = pcm.handle.read_chunk(buf)?;
                if n == 0 {
                    return Ok(StreamFill {
                        exhausted: true,
                        ..Default::default()
                    });
                }

                // Keep a partial frame for the next tick
                let frame_bytes = frame_samples * 2;
                let usable = n - n % frame_bytes;
                if usable < n {
                    let pos = pcm.handle.position();
                    pcm.handle.seek(pos - (n - usable) as u64)?;
                }

                let mut fill = StreamFill::default();
                for bytes in buf[..usable].chunks_exact(2) {
                    if ring.push(i16::from_le_bytes([bytes[0], bytes[1]])) {
                        fill.pushed += 1;
                    } else {
                        fill.dropped += 1;
                    }
                }
                pcm.remaining -= usable as u64;
                fill.exhausted = pcm.remaining == 0;
                Ok(fill)
            }

            StreamSource::Tone(chirp) => {
                let n = self.pcm_chunk_samples.min(ring.available_to_write());
                let written = chirp.render(&mut self.tone_scratch[..n]);
                let mut fill = StreamFill::default();
                for &sample in &self.tone_scratch[..written] {
                    if ring.push(sample) {
                        fill.pushed += 1;
                    } else {
                        fill.dropped += 1;
                    }
                }
                fill.exhausted = chirp.is_finished();
                Ok(fill)
            }

            StreamSource::Elementary(elementary) => {
                let lease = lease
                    .as_ref()
                    .ok_or_else(|| Error::Decode("Compressed stream without a decoder".to_string()))?;
                let decoder = pools
                    .decoder_mut(lease)
                    .ok_or_else(|| Error::Decode("Leased decoder unavailable".to_string()))?;
                let headroom = min_headroom(ring, decoder.kind().max_samples_per_frame());

                // Bytes are read only when no staged frame is left, and every
                // frame is decoded only once the ring can take all of it
                let mut sink = RingSink::new(shared, channels, sample_rate);
                let mut budget = self.compressed_read_bytes;
                let mut exhausted = false;
                while sink.ring.available_to_write() >= headroom {
                    if decoder.decode_next(&mut |info, pcm| sink.push_decoded(info, pcm))? {
                        continue;
                    }
                    if budget == 0 {
                        break;
                    }
                    let want = budget.min(decoder.staging_room());
                    let n = elementary.handle.read_chunk(&mut self.byte_scratch[..want])?;
                    if n == 0 {
                        exhausted = true;
                        break;
                    }
                    budget -= n;
                    decoder.stage(&self.byte_scratch[..n]);
                }
                Ok(sink.finish(exhausted))
            }

            StreamSource::Container(container) => {
                let lease = lease
                    .as_ref()
                    .ok_or_else(|| Error::Decode("Container stream without a decoder".to_string()))?;
                let decoder = pools
                    .decoder_mut(lease)
                    .ok_or_else(|| Error::Decode("Leased decoder unavailable".to_string()))?;
                let headroom = min_headroom(ring, decoder.kind().max_samples_per_frame());

                let mut sink = RingSink::new(shared, channels, sample_rate);
                let mut exhausted = false;
                for _ in 0..self.frames_per_tick {
                    if sink.ring.available_to_write() < headroom {
                        break;
                    }
                    let len = container
                        .parser
                        .read_next_frame(container.handle.as_mut(), &mut self.frame_scratch)?;
                    if len == 0 {
                        exhausted = true;
                        break;
                    }
                    decoder.write(&self.frame_scratch[..len], &mut |info, pcm| {
                        sink.push_decoded(info, pcm)
                    })?;
                }
                Ok(sink.finish(exhausted))
            }
        }
    }
}

/// Free space needed before decoding another frame
///
/// Rings smaller than one decoded frame only require an empty ring; the
/// excess of each frame is counted as overflow.
fn min_headroom(ring: &SampleRing, frame_samples: usize) -> usize {
    frame_samples.min(ring.capacity() - 1)
}

/// Pushes decoded frames into a slot's ring
///
/// The first decoded frame fixes the ring's channel layout (1 or 2); later
/// frames are converted to it so the ring never changes layout mid-stream.
struct RingSink<'a> {
    ring: &'a SampleRing,
    shared: &'a SlotShared,
    channels: &'a mut u16,
    sample_rate: &'a mut u32,
    pushed: u64,
    dropped: u64,
}

impl<'a> RingSink<'a> {
    fn new(shared: &'a SlotShared, channels: &'a mut u16, sample_rate: &'a mut u32) -> Self {
        Self {
            ring: shared.ring(),
            shared,
            channels,
            sample_rate,
            pushed: 0,
            dropped: 0,
        }
    }

    fn push_decoded(&mut self, info: FrameInfo, samples: &[i16]) {
        if *self.channels == 0 {
            *self.channels = info.channels.clamp(1, 2);
            // Published before the first push of this stream
            self.shared.set_channels(*self.channels);
        }
        if *self.sample_rate == 0 {
            *self.sample_rate = info.sample_rate;
        }

        let source_channels = info.channels.max(1) as usize;
        let target = *self.channels as usize;
        for frame in samples.chunks_exact(source_channels) {
            let out = match (source_channels, target) {
                (1, _) => [frame[0], frame[0]],
                (_, 1) => [((frame[0] as i32 + frame[1] as i32) / 2) as i16, 0],
                _ => [frame[0], frame[1]],
            };
            if self.ring.push_frame(&out[..target]) {
                self.pushed += target as u64;
            } else {
                self.dropped += target as u64;
            }
        }
    }

    fn finish(self, exhausted: bool) -> StreamFill {
        StreamFill {
            pushed: self.pushed,
            dropped: self.dropped,
            exhausted,
        }
    }
}
