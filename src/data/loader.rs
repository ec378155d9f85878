use std::path::Path;

use crate::config::FeatureConfig;
use crate::ctc::alphabet::Alphabet;
use crate::data::audio::{load_wav, resample, to_mono};
use crate::data::corpus::SamplePaths;
use crate::data::features::LogMelExtractor;
use crate::error::CtcError;
use crate::pipeline::traits::SampleSource;
use crate::types::{FeatureSequence, Sample};

/// GRID alignment tokens that mark silence rather than words.
const ALIGN_SILENCE: [&str; 2] = ["sil", "sp"];

/// Converts one (audio, transcript) pair into features and labels.
#[derive(Debug)]
pub struct SampleLoader {
    alphabet: Alphabet,
    extractor: LogMelExtractor,
}

impl SampleLoader {
    pub fn new(alphabet: &Alphabet, features: &FeatureConfig) -> Self {
        Self {
            alphabet: alphabet.clone(),
            extractor: LogMelExtractor::new(features.clone()),
        }
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn feature_dim(&self) -> usize {
        self.extractor.feature_dim()
    }

    pub fn load(&self, audio_path: &Path, transcript_path: &Path) -> Result<Sample, CtcError> {
        let transcript = read_transcript(transcript_path)?;
        let audio = to_mono(load_wav(audio_path)?);
        let features = self
            .features_from_samples(&audio.samples, audio.sample_rate_hz)
            .map_err(|e| CtcError::sample_load(audio_path, e))?;
        Ok(Sample {
            features,
            labels: self.alphabet.encode_transcript(&transcript),
        })
    }

    /// Resamples mono audio to the configured rate and extracts features.
    pub fn features_from_samples(
        &self,
        samples: &[f32],
        sample_rate_hz: u32,
    ) -> Result<FeatureSequence, CtcError> {
        if samples.is_empty() {
            return Err(CtcError::invalid_input("audio contains no samples"));
        }
        let target = self.extractor.config().sample_rate_hz;
        let samples = resample(samples, sample_rate_hz, target)?;
        self.extractor.extract(&samples)
    }

    pub fn sample_from_audio(
        &self,
        samples: &[f32],
        sample_rate_hz: u32,
        transcript: &str,
    ) -> Result<Sample, CtcError> {
        Ok(Sample {
            features: self.features_from_samples(samples, sample_rate_hz)?,
            labels: self
                .alphabet
                .encode_transcript(&normalize_transcript(transcript)),
        })
    }

    /// Lazily loading sources for harvested path pairs.
    pub fn sources<'a>(&'a self, pairs: &'a [SamplePaths]) -> Vec<FileSample<'a>> {
        pairs
            .iter()
            .map(|paths| FileSample {
                loader: self,
                paths,
            })
            .collect()
    }
}

/// A harvested sample that is loaded from disk every time it is requested.
pub struct FileSample<'a> {
    loader: &'a SampleLoader,
    paths: &'a SamplePaths,
}

impl SampleSource for FileSample<'_> {
    fn load(&self) -> Result<Sample, CtcError> {
        self.loader.load(&self.paths.audio, &self.paths.transcript)
    }

    fn id(&self) -> String {
        self.paths.id()
    }
}

impl SampleSource for Sample {
    fn load(&self) -> Result<Sample, CtcError> {
        Ok(self.clone())
    }

    fn id(&self) -> String {
        format!("in-memory/{}x{}", self.features.time(), self.features.feature_dim())
    }
}

/// Newlines become spaces, text is lowercased and trimmed.
pub fn normalize_transcript(raw: &str) -> String {
    raw.replace(['\r', '\n'], " ").trim().to_lowercase()
}

/// Reads a transcript; `.align` files are GRID word alignments (`start end word`).
pub fn read_transcript(path: &Path) -> Result<String, CtcError> {
    let raw = std::fs::read_to_string(path).map_err(|e| CtcError::sample_load(path, e))?;
    let is_align = path.extension().and_then(|e| e.to_str()) == Some("align");
    Ok(if is_align {
        parse_alignment(&raw)
    } else {
        normalize_transcript(&raw)
    })
}

fn parse_alignment(raw: &str) -> String {
    raw.lines()
        .filter_map(|line| line.split_whitespace().nth(2))
        .filter(|word| !ALIGN_SILENCE.contains(word))
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn normalize_replaces_newlines() {
        assert_eq!(normalize_transcript("bin blue\nat f\r\n"), "bin blue at f");
    }

    #[test]
    fn alignment_drops_silence_markers() {
        let raw = "0 23750 sil\n23750 29500 bin\n29500 34000 blue\n34000 35500 sp\n35500 41000 at\n41000 47250 f\n";
        assert_eq!(parse_alignment(raw), "bin blue at f");
    }

    #[test]
    fn load_pairs_audio_and_transcript() {
        let dir = std::env::temp_dir();
        let audio = dir.join("grid_ctc_loader_sample.wav");
        let transcript = dir.join("grid_ctc_loader_sample.txt");
        let tone: Vec<i16> = (0..8000).map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16).collect();
        write_wav(&audio, 16_000, &tone);
        std::fs::write(&transcript, "set red\nby 5 now\n").unwrap();

        let loader = SampleLoader::new(&Alphabet::grid(), &FeatureConfig::default());
        let sample = loader.load(&audio, &transcript).unwrap();
        assert_eq!(sample.features.feature_dim(), 40);
        assert_eq!(sample.features.time(), 8000 / 160 + 1);
        assert_eq!(
            loader.alphabet().decode_labels(&sample.labels),
            "set red by  now"
        );

        let _ = std::fs::remove_file(&audio);
        let _ = std::fs::remove_file(&transcript);
    }

    #[test]
    fn resamples_to_configured_rate() {
        let loader = SampleLoader::new(&Alphabet::grid(), &FeatureConfig::default());
        let audio = vec![0.01f32; 50_000];
        let features = loader.features_from_samples(&audio, 50_000).unwrap();
        assert_eq!(features.time(), 16_000 / 160 + 1);
    }

    #[test]
    fn unreadable_audio_is_a_sample_error() {
        let dir = std::env::temp_dir();
        let transcript = dir.join("grid_ctc_loader_missing_audio.txt");
        std::fs::write(&transcript, "lay green").unwrap();
        let loader = SampleLoader::new(&Alphabet::grid(), &FeatureConfig::default());
        let err = loader
            .load(&dir.join("grid_ctc_no_such_file.wav"), &transcript)
            .unwrap_err();
        assert!(err.is_sample_error());
        let _ = std::fs::remove_file(&transcript);
    }

    #[test]
    fn in_memory_empty_audio_is_rejected() {
        let loader = SampleLoader::new(&Alphabet::grid(), &FeatureConfig::default());
        assert!(loader.sample_from_audio(&[], 16_000, "bin").is_err());
    }
}
