//! WAV test data generation
//!
//! Samples are chosen so that every value is distinguishable, which lets a
//! test check order and loss through the ring and mixer.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

fn spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Encode interleaved samples as a 16-bit PCM WAV file in memory
pub fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::new();
    {
        let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec(channels, sample_rate))
            .expect("wav writer");
        for &sample in samples {
            writer.write_sample(sample).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
    }
    bytes
}

/// Mono WAV whose samples are 1, 2, ..., `count`
pub fn ramp_wav(count: usize, sample_rate: u32) -> Vec<u8> {
    let samples: Vec<i16> = (1..=count as i16).collect();
    wav_bytes(1, sample_rate, &samples)
}

/// Write a WAV file to disk
pub fn write_wav_file<P: AsRef<Path>>(path: P, channels: u16, sample_rate: u32, samples: &[i16]) {
    let mut writer = WavWriter::create(path, spec(channels, sample_rate)).expect("create wav");
    for &sample in samples {
        writer.write_sample(sample).expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}
