//! GRID-style corpus discovery: `<root>/s<N>/<utterance>.<ext>` on both the
//! audio and transcript side.

use std::path::{Path, PathBuf};

use crate::error::CtcError;

const AUDIO_EXTENSION: &str = "wav";
const TRANSCRIPT_EXTENSIONS: [&str; 2] = ["txt", "align"];

/// One harvested utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePaths {
    pub speaker: String,
    pub audio: PathBuf,
    pub transcript: PathBuf,
}

impl SamplePaths {
    /// `speaker/stem`, stable across runs.
    pub fn id(&self) -> String {
        format!("{}/{}", self.speaker, file_stem(&self.audio))
    }
}

#[derive(Debug, Clone)]
pub struct SampleHarvester {
    audio_root: PathBuf,
    transcript_root: PathBuf,
    exclude_speakers: Vec<String>,
}

impl SampleHarvester {
    pub fn new(audio_root: impl Into<PathBuf>, transcript_root: impl Into<PathBuf>) -> Self {
        Self {
            audio_root: audio_root.into(),
            transcript_root: transcript_root.into(),
            exclude_speakers: Vec::new(),
        }
    }

    pub fn with_excluded_speakers(mut self, speakers: &[String]) -> Self {
        self.exclude_speakers = speakers.to_vec();
        self
    }

    /// Pairs every audio file with the transcript of the same speaker and stem.
    pub fn harvest(&self) -> Result<Vec<SamplePaths>, CtcError> {
        let audio_speakers = self.speakers(&self.audio_root)?;
        let transcript_speakers = self.speakers(&self.transcript_root)?;
        if audio_speakers != transcript_speakers {
            return Err(CtcError::invalid_input(format!(
                "speaker directories differ: audio {audio_speakers:?}, transcripts {transcript_speakers:?}"
            )));
        }

        let mut pairs = Vec::new();
        for speaker in &audio_speakers {
            let audio = list_files(&self.audio_root.join(speaker), &[AUDIO_EXTENSION])?;
            let transcripts =
                list_files(&self.transcript_root.join(speaker), &TRANSCRIPT_EXTENSIONS)?;
            if audio.len() != transcripts.len() {
                return Err(CtcError::invalid_input(format!(
                    "speaker {speaker}: {} audio files but {} transcripts",
                    audio.len(),
                    transcripts.len()
                )));
            }
            for (audio, transcript) in audio.into_iter().zip(transcripts) {
                if file_stem(&audio) != file_stem(&transcript) {
                    return Err(CtcError::invalid_input(format!(
                        "unpaired files {} and {}",
                        audio.display(),
                        transcript.display()
                    )));
                }
                pairs.push(SamplePaths {
                    speaker: speaker.clone(),
                    audio,
                    transcript,
                });
            }
        }

        tracing::info!(
            speakers = audio_speakers.len(),
            utterances = pairs.len(),
            excluded = ?self.exclude_speakers,
            "corpus harvested"
        );
        Ok(pairs)
    }

    fn speakers(&self, root: &Path) -> Result<Vec<String>, CtcError> {
        let entries = std::fs::read_dir(root)
            .map_err(|e| CtcError::io("read corpus root", e))?;
        let mut speakers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CtcError::io("read corpus entry", e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_speaker_dir(&name) && !self.exclude_speakers.contains(&name) {
                speakers.push(name);
            }
        }
        speakers.sort_by_key(|name| speaker_number(name));
        Ok(speakers)
    }
}

fn is_speaker_dir(name: &str) -> bool {
    speaker_number(name).is_some()
}

fn speaker_number(name: &str) -> Option<u32> {
    name.strip_prefix('s')?.parse().ok()
}

fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, CtcError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CtcError::io("read speaker directory", e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CtcError::io("read speaker entry", e))?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.contains(&ext));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
