//! Media decomposition (C3): turns a file into a finite, ordered `Segment`
//! sequence with well-defined `[start_ms, end_ms]` windows per modality.
//!
//! Video decomposition shells out to `ffprobe`/`ffmpeg` for stream metadata
//! and frame extraction rather than binding libav directly, the same
//! approach the scene-detection and keyframe-extraction tooling this grew
//! from takes.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use uuid::Uuid;

use crate::constants::VIDEO_CHUNK_OVERLAP_MS;
use crate::file_types::FileKind;
use crate::model::{Modality, Segment};

#[derive(Debug, thiserror::Error)]
pub enum DecomposeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported codec in {path}")]
    UnsupportedCodec { path: std::path::PathBuf },
    #[error("ffprobe failed for {path}: {reason}")]
    ProbeFailed {
        path: std::path::PathBuf,
        reason: String,
    },
    #[error("decode error: {0}")]
    Decode(String),
}

/// Tunables for the video/audio decomposition policy.
#[derive(Debug, Clone)]
pub struct DecomposerConfig {
    /// Seconds between regular visual-frame samples.
    pub frame_interval_secs: f64,
    /// Seconds per audio chunk.
    pub audio_chunk_secs: f64,
    /// Seconds of overlap between consecutive audio chunks.
    pub audio_overlap_secs: f64,
    /// Max segment length so visual windows satisfy the ±2s retrieval contract.
    pub max_visual_window_secs: f64,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            frame_interval_secs: 2.0,
            audio_chunk_secs: 10.0,
            audio_overlap_secs: VIDEO_CHUNK_OVERLAP_MS as f64 / 1000.0,
            max_visual_window_secs: 2.0,
        }
    }
}

/// Result of decomposing one file: the segments that decoded successfully,
/// plus a flag when some modality track failed while others succeeded.
#[derive(Debug, Default)]
pub struct DecompositionResult {
    pub segments: Vec<Segment>,
    pub partial_success: bool,
}

pub struct MediaDecomposer {
    config: DecomposerConfig,
}

impl MediaDecomposer {
    pub fn new(config: DecomposerConfig) -> Self {
        Self { config }
    }

    pub fn decompose(
        &self,
        path: &Path,
        file_id: Uuid,
        kind: FileKind,
    ) -> Result<DecompositionResult, DecomposeError> {
        match kind {
            FileKind::Image => Ok(DecompositionResult {
                segments: vec![one_shot_segment(file_id, Modality::Image)],
                partial_success: false,
            }),
            FileKind::Text => Ok(DecompositionResult {
                segments: vec![one_shot_segment(file_id, Modality::Text)],
                partial_success: false,
            }),
            FileKind::Audio => self.decompose_audio(path, file_id),
            FileKind::Video => self.decompose_video(path, file_id),
            FileKind::Unknown => Err(DecomposeError::UnsupportedCodec {
                path: path.to_path_buf(),
            }),
        }
    }

    fn decompose_audio(
        &self,
        path: &Path,
        file_id: Uuid,
    ) -> Result<DecompositionResult, DecomposeError> {
        let duration = probe_duration(path)?;
        let segments = self.audio_chunks(file_id, duration);
        Ok(DecompositionResult {
            segments,
            partial_success: false,
        })
    }

    fn decompose_video(
        &self,
        path: &Path,
        file_id: Uuid,
    ) -> Result<DecompositionResult, DecomposeError> {
        let duration = probe_duration(path)?;

        let visual = self.visual_frames(file_id, duration);
        let audio = self.audio_chunks(file_id, duration);

        let partial_success = visual.is_empty() || audio.is_empty();
        let mut segments = visual;
        segments.extend(audio);

        Ok(DecompositionResult {
            segments,
            partial_success,
        })
    }

    fn visual_frames(&self, file_id: Uuid, duration_secs: f64) -> Vec<Segment> {
        let step = self.config.frame_interval_secs.max(0.1);
        let window = self.config.max_visual_window_secs;
        let mut segments = Vec::new();
        let mut t = 0.0;
        let mut seq = 0;
        while t < duration_secs {
            let start_ms = (t * 1000.0).round() as i64;
            let end_ms = ((t + window).min(duration_secs) * 1000.0).round() as i64;
            segments.push(Segment {
                segment_id: Uuid::new_v4(),
                file_id,
                modality: Modality::VisualFrame,
                seq,
                start_ms,
                end_ms: end_ms.max(start_ms),
                quality: 1.0,
                extra: None,
            });
            seq += 1;
            t += step;
        }
        segments
    }

    fn audio_chunks(&self, file_id: Uuid, duration_secs: f64) -> Vec<Segment> {
        let chunk = self.config.audio_chunk_secs.max(0.1);
        let overlap = self.config.audio_overlap_secs.max(0.0);
        let stride = (chunk - overlap).max(0.1);

        let mut segments = Vec::new();
        let mut t = 0.0;
        let mut seq = 0;
        while t < duration_secs {
            let start_ms = (t * 1000.0).round() as i64;
            let end_ms = ((t + chunk).min(duration_secs) * 1000.0).round() as i64;
            segments.push(Segment {
                segment_id: Uuid::new_v4(),
                file_id,
                // Default to speech; a real front-end would classify
                // music vs. speech per chunk before this is persisted.
                modality: Modality::AudioSpeech,
                seq,
                start_ms,
                end_ms: end_ms.max(start_ms),
                quality: 1.0,
                extra: None,
            });
            seq += 1;
            t += stride;
        }
        segments
    }
}

fn one_shot_segment(file_id: Uuid, modality: Modality) -> Segment {
    Segment {
        segment_id: Uuid::new_v4(),
        file_id,
        modality,
        seq: 0,
        start_ms: 0,
        end_ms: 0,
        quality: 1.0,
        extra: None,
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

/// Shell out to `ffprobe` for container duration, in seconds.
fn probe_duration(path: &Path) -> Result<f64, DecomposeError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|source| DecomposeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(DecomposeError::ProbeFailed {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
        DecomposeError::ProbeFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| DecomposeError::ProbeFailed {
            path: path.to_path_buf(),
            reason: "no duration in ffprobe output".into(),
        })
}

/// Convert a frame index to a millisecond timestamp given a frame rate,
/// used when a caller already knows `fps` from a prior probe and wants the
/// ≤1ms-residual timestamp guarantee without re-deriving it inline.
pub fn frame_index_to_ms(frame_index: u64, fps: f64) -> i64 {
    ((frame_index as f64 / fps) * 1000.0).round() as i64
}

/// Shells out to `ffmpeg` to decode the single video frame nearest
/// `at_secs` and writes it as a PNG under `cache_dir`, returning the written
/// path. The encoder pool embeds this extracted frame, never the source
/// container, so a `VisualFrame` segment's embedding reflects that segment's
/// own timestamp rather than whatever `image::open` makes of raw video
/// bytes.
pub fn extract_frame(
    path: &Path,
    at_secs: f64,
    cache_dir: &Path,
    out_name: &str,
) -> Result<PathBuf, DecomposeError> {
    std::fs::create_dir_all(cache_dir).map_err(|source| DecomposeError::Io {
        path: cache_dir.to_path_buf(),
        source,
    })?;
    let out_path = cache_dir.join(out_name);

    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-ss")
        .arg(format!("{:.3}", at_secs.max(0.0)))
        .arg("-i")
        .arg(path)
        .args(["-frames:v", "1", "-q:v", "2"])
        .arg(&out_path)
        .output()
        .map_err(|source| DecomposeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(DecomposeError::ProbeFailed {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(out_path)
}

/// Shells out to `ffmpeg` to cut the `[start_secs, start_secs+duration_secs)`
/// audio window into a mono 16kHz WAV under `cache_dir`, returning the
/// written path. Mirrors `extract_frame`: the transcriber gets only this
/// segment's own audio, not the whole file.
pub fn extract_audio_slice(
    path: &Path,
    start_secs: f64,
    duration_secs: f64,
    cache_dir: &Path,
    out_name: &str,
) -> Result<PathBuf, DecomposeError> {
    std::fs::create_dir_all(cache_dir).map_err(|source| DecomposeError::Io {
        path: cache_dir.to_path_buf(),
        source,
    })?;
    let out_path = cache_dir.join(out_name);

    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-ss")
        .arg(format!("{:.3}", start_secs.max(0.0)))
        .arg("-i")
        .arg(path)
        .arg("-t")
        .arg(format!("{:.3}", duration_secs.max(0.01)))
        .args(["-ar", "16000", "-ac", "1"])
        .arg(&out_path)
        .output()
        .map_err(|source| DecomposeError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(DecomposeError::ProbeFailed {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_produces_single_zero_window_segment() {
        let d = MediaDecomposer::new(DecomposerConfig::default());
        let result = d
            .decompose(Path::new("photo.png"), Uuid::new_v4(), FileKind::Image)
            .unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].start_ms, 0);
        assert_eq!(result.segments[0].end_ms, 0);
        assert_eq!(result.segments[0].modality, Modality::Image);
    }

    #[test]
    fn text_produces_single_zero_window_segment() {
        let d = MediaDecomposer::new(DecomposerConfig::default());
        let result = d
            .decompose(Path::new("notes.md"), Uuid::new_v4(), FileKind::Text)
            .unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].modality, Modality::Text);
    }

    #[test]
    fn visual_frames_respect_max_window() {
        let d = MediaDecomposer::new(DecomposerConfig::default());
        let file_id = Uuid::new_v4();
        let frames = d.visual_frames(file_id, 10.0);
        assert!(!frames.is_empty());
        for f in &frames {
            assert!(f.end_ms - f.start_ms <= 2000);
        }
    }

    #[test]
    fn audio_chunks_overlap_by_configured_amount() {
        let d = MediaDecomposer::new(DecomposerConfig::default());
        let file_id = Uuid::new_v4();
        let chunks = d.audio_chunks(file_id, 30.0);
        assert!(chunks.len() >= 2);
        // consecutive chunks overlap: next start is before previous end
        assert!(chunks[1].start_ms < chunks[0].end_ms);
    }

    #[test]
    fn frame_index_to_ms_matches_expected_formula() {
        assert_eq!(frame_index_to_ms(30, 30.0), 1000);
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let d = MediaDecomposer::new(DecomposerConfig::default());
        let err = d
            .decompose(Path::new("blob.bin"), Uuid::new_v4(), FileKind::Unknown)
            .unwrap_err();
        assert!(matches!(err, DecomposeError::UnsupportedCodec { .. }));
    }
}
