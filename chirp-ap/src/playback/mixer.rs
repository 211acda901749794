//! Real-time mixer
//!
//! Runs on the hardware clock (the audio output callback). For every output
//! frame it pops one frame from each audible slot, scales it by the slot
//! volume, sums in i32, applies the master volume and saturates to i16.
//!
//! # Real-time rules
//!
//! - Touches only the slots' `SlotShared` handles and `OutputControl`
//! - No locks, no allocation, no storage
//! - An empty ring is silence plus an underrun count, never an error
//! - While the mute gate is closed the output is silence and no ring is read

use crate::playback::stream::SlotShared;
use crate::playback::types::StreamState;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Output-wide controls and counters shared by the engine and the mixer
#[derive(Debug)]
pub struct OutputControl {
    allow_audio: AtomicBool,
    /// f32 bits
    master_volume: AtomicU32,
    frames_mixed: AtomicU64,
    clipped_samples: AtomicU64,
}

impl OutputControl {
    pub fn new(master_volume: f32) -> Self {
        Self {
            allow_audio: AtomicBool::new(true),
            master_volume: AtomicU32::new(master_volume.clamp(0.0, 1.0).to_bits()),
            frames_mixed: AtomicU64::new(0),
            clipped_samples: AtomicU64::new(0),
        }
    }

    pub fn audio_allowed(&self) -> bool {
        self.allow_audio.load(Ordering::Relaxed)
    }

    pub fn set_audio_allowed(&self, allowed: bool) {
        self.allow_audio.store(allowed, Ordering::Relaxed);
    }

    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume.load(Ordering::Relaxed))
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master_volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn frames_mixed(&self) -> u64 {
        self.frames_mixed.load(Ordering::Relaxed)
    }

    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples.load(Ordering::Relaxed)
    }
}

/// Consumer side of every slot
pub struct Mixer {
    slots: Vec<Arc<SlotShared>>,
    control: Arc<OutputControl>,
}

impl Mixer {
    pub fn new(slots: Vec<Arc<SlotShared>>, control: Arc<OutputControl>) -> Self {
        Self { slots, control }
    }

    /// Mix one stereo output frame
    pub fn mix_frame(&mut self) -> [i16; 2] {
        let mut clipped = 0;
        let frame = self.mix_one(&mut clipped);
        self.control.frames_mixed.fetch_add(1, Ordering::Relaxed);
        if clipped > 0 {
            self.control.clipped_samples.fetch_add(clipped, Ordering::Relaxed);
        }
        frame
    }

    /// Fill an interleaved stereo block; a trailing odd sample is zeroed
    pub fn render(&mut self, out: &mut [i16]) {
        self.render_channels(out, 2);
    }

    /// Fill an interleaved block with `channels` samples per frame
    ///
    /// Mono devices get the average of L and R; channels past the second
    /// are silent.
    pub fn render_channels(&mut self, out: &mut [i16], channels: usize) {
        if channels == 0 {
            return;
        }
        let mut clipped = 0;
        let mut frames = 0;

        let mut chunks = out.chunks_exact_mut(channels);
        for frame in &mut chunks {
            let [left, right] = self.mix_one(&mut clipped);
            if channels == 1 {
                frame[0] = ((left as i32 + right as i32) / 2) as i16;
            } else {
                frame[0] = left;
                frame[1] = right;
                frame[2..].fill(0);
            }
            frames += 1;
        }
        chunks.into_remainder().fill(0);

        self.control.frames_mixed.fetch_add(frames, Ordering::Relaxed);
        if clipped > 0 {
            self.control.clipped_samples.fetch_add(clipped, Ordering::Relaxed);
        }
    }

    fn mix_one(&self, clipped: &mut u64) -> [i16; 2] {
        if !self.control.audio_allowed() {
            return [0, 0];
        }

        let mut left: i32 = 0;
        let mut right: i32 = 0;

        for slot in &self.slots {
            let state = slot.state();
            if !state.is_audible() {
                continue;
            }

            let ring = slot.ring();
            if ring.is_empty() {
                // Draining slots run dry by design; the lifecycle stops them
                if state == StreamState::Playing {
                    slot.record_underrun();
                }
                continue;
            }

            // Channel count is published before the first push, so it is
            // valid once data has been seen
            let channels = slot.channels();
            let mut frame = [0i16; 2];
            if !ring.pop_frame(&mut frame[..channels]) {
                if state == StreamState::Playing {
                    slot.record_underrun();
                }
                continue;
            }
            if channels == 1 {
                frame[1] = frame[0];
            }

            let volume = slot.volume();
            left += (frame[0] as f32 * volume) as i32;
            right += (frame[1] as f32 * volume) as i32;
        }

        let master = self.control.master_volume();
        if master < 1.0 {
            left = (left as f32 * master) as i32;
            right = (right as f32 * master) as i32;
        }

        [saturate(left, clipped), saturate(right, clipped)]
    }
}

fn saturate(value: i32, clipped: &mut u64) -> i16 {
    if value > i16::MAX as i32 {
        *clipped += 1;
        i16::MAX
    } else if value < i16::MIN as i32 {
        *clipped += 1;
        i16::MIN
    } else {
        value as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Slot forced into a state for mixer-only tests
    fn slot(state: StreamState, channels: u16, samples: &[i16]) -> Arc<SlotShared> {
        let shared = Arc::new(SlotShared::new(64));
        shared.set_channels(channels);
        for &s in samples {
            assert!(shared.ring().push(s));
        }
        shared.set_state(state);
        shared
    }

    fn mixer(slots: Vec<Arc<SlotShared>>) -> (Mixer, Arc<OutputControl>) {
        let control = Arc::new(OutputControl::new(1.0));
        (Mixer::new(slots, Arc::clone(&control)), control)
    }

    #[test]
    fn test_mono_is_duplicated() {
        let (mut mixer, _) = mixer(vec![slot(StreamState::Playing, 1, &[100, -50])]);
        assert_eq!(mixer.mix_frame(), [100, 100]);
        assert_eq!(mixer.mix_frame(), [-50, -50]);
    }

    #[test]
    fn test_stereo_pairs() {
        let (mut mixer, _) = mixer(vec![slot(StreamState::Playing, 2, &[10, 20, 30, 40])]);
        let mut out = [0i16; 4];
        mixer.render(&mut out);
        assert_eq!(out, [10, 20, 30, 40]);
    }

    #[test]
    fn test_sum_saturates_and_counts() {
        let a = slot(StreamState::Playing, 1, &[30_000, -30_000]);
        let b = slot(StreamState::Playing, 1, &[30_000, -30_000]);
        let (mut mixer, control) = mixer(vec![a, b]);

        assert_eq!(mixer.mix_frame(), [i16::MAX, i16::MAX]);
        assert_eq!(mixer.mix_frame(), [i16::MIN, i16::MIN]);
        assert_eq!(control.clipped_samples(), 4);
        assert_eq!(control.frames_mixed(), 2);
    }

    #[test]
    fn test_volume_scaling() {
        let a = slot(StreamState::Playing, 1, &[1000]);
        a.set_volume(0.5);
        let (mut mixer, control) = mixer(vec![a]);
        control.set_master_volume(0.5);
        assert_eq!(mixer.mix_frame(), [250, 250]);
    }

    #[test]
    fn test_empty_playing_ring_counts_underrun() {
        let playing = slot(StreamState::Playing, 1, &[]);
        let draining = slot(StreamState::Draining, 1, &[]);
        let (mut mixer, _) = mixer(vec![Arc::clone(&playing), Arc::clone(&draining)]);

        assert_eq!(mixer.mix_frame(), [0, 0]);
        assert_eq!(playing.underruns(), 1);
        assert_eq!(draining.underruns(), 0);
    }

    #[test]
    fn test_inactive_and_starting_slots_are_not_read() {
        let inactive = slot(StreamState::Inactive, 1, &[500]);
        let starting = slot(StreamState::Starting, 1, &[500]);
        let (mut mixer, _) = mixer(vec![Arc::clone(&inactive), Arc::clone(&starting)]);

        assert_eq!(mixer.mix_frame(), [0, 0]);
        assert_eq!(inactive.ring().available_to_read(), 1);
        assert_eq!(starting.ring().available_to_read(), 1);
    }

    #[test]
    fn test_mute_gate_outputs_silence_without_popping() {
        let a = slot(StreamState::Playing, 1, &[1000, 2000]);
        let (mut mixer, control) = mixer(vec![Arc::clone(&a)]);

        control.set_audio_allowed(false);
        assert_eq!(mixer.mix_frame(), [0, 0]);
        assert_eq!(a.ring().available_to_read(), 2);

        control.set_audio_allowed(true);
        assert_eq!(mixer.mix_frame(), [1000, 1000]);
    }

    #[test]
    fn test_half_stereo_frame_waits() {
        let a = slot(StreamState::Playing, 2, &[7]);
        let (mut mixer, _) = mixer(vec![Arc::clone(&a)]);
        assert_eq!(mixer.mix_frame(), [0, 0]);
        assert_eq!(a.ring().available_to_read(), 1);
        assert_eq!(a.underruns(), 1);
    }

    #[test]
    fn test_render_mono_device() {
        let (mut mixer, _) = mixer(vec![slot(StreamState::Playing, 2, &[100, 300])]);
        let mut out = [1i16; 2];
        mixer.render_channels(&mut out, 1);
        assert_eq!(out, [200, 0]);
    }

    #[test]
    fn test_render_odd_tail_is_zeroed() {
        let (mut mixer, control) = mixer(vec![slot(StreamState::Playing, 1, &[5, 6])]);
        let mut out = [9i16; 3];
        mixer.render(&mut out);
        assert_eq!(out, [5, 5, 0]);
        assert_eq!(control.frames_mixed(), 1);
    }
}
