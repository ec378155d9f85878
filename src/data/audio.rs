//! WAV decoding, down-mixing and resampling.

use std::path::Path;

use hound::WavReader;
use rubato::{FftFixedInOut, Resampler};

use crate::error::CtcError;

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate_hz: u32,
    pub channels: usize,
}

/// Reads a WAV file into interleaved f32 samples in `[-1, 1]`.
pub fn load_wav(path: &Path) -> Result<AudioBuffer, CtcError> {
    let reader = WavReader::open(path).map_err(|e| CtcError::sample_load(path, e))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CtcError::sample_load(path, e))?,
        hound::SampleFormat::Int => {
            let max_val = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CtcError::sample_load(path, e))?
        }
    };

    if samples.is_empty() {
        return Err(CtcError::sample_load(path, "audio contains no samples"));
    }

    Ok(AudioBuffer {
        samples,
        sample_rate_hz: spec.sample_rate,
        channels: spec.channels as usize,
    })
}

/// Averages interleaved channels into one.
pub fn to_mono(buffer: AudioBuffer) -> AudioBuffer {
    if buffer.channels <= 1 {
        return buffer;
    }
    let samples = buffer
        .samples
        .chunks(buffer.channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    AudioBuffer {
        samples,
        sample_rate_hz: buffer.sample_rate_hz,
        channels: 1,
    }
}

/// Resamples mono audio to `target_hz`, keeping `len * target / source` samples.
pub fn resample(samples: &[f32], source_hz: u32, target_hz: u32) -> Result<Vec<f32>, CtcError> {
    if source_hz == target_hz || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if source_hz == 0 || target_hz == 0 {
        return Err(CtcError::invalid_input("sample rates must be > 0"));
    }

    let mut resampler =
        FftFixedInOut::<f32>::new(source_hz as usize, target_hz as usize, RESAMPLE_CHUNK, 1)
            .map_err(|e| CtcError::runtime("create resampler", e))?;
    let delay = resampler.output_delay();
    let expected =
        (samples.len() as u64 * target_hz as u64).div_ceil(source_hz as u64) as usize;

    let mut output = Vec::with_capacity(expected + delay);
    let mut pos = 0;
    while output.len() < expected + delay {
        let chunk_len = resampler.input_frames_next();
        let mut chunk = vec![0.0f32; chunk_len];
        if pos < samples.len() {
            let end = (pos + chunk_len).min(samples.len());
            chunk[..end - pos].copy_from_slice(&samples[pos..end]);
        }
        pos += chunk_len;
        let out = resampler
            .process(&[chunk], None)
            .map_err(|e| CtcError::runtime("resample", e))?;
        output.extend_from_slice(&out[0]);
    }

    Ok(output.into_iter().skip(delay).take(expected).collect())
}
