//! EncoderPool (C4): `Embed(modality, batch) -> [vector]` plus
//! `Transcribe(audio) -> text` for speech, backed by one `ModelEngine` per
//! model, loaded lazily on first use exactly as the multi-model router this
//! grew from lazily constructs its per-model embedders.

use std::path::Path;
use std::sync::Mutex;

use candle_core::Device;

use crate::embedder_clip::ClipEmbedder;
use crate::model::Modality;
use crate::query_cache::{CachedEmbedding, QueryCache};
use crate::whisper::Transcriber;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("batch failed: {0}")]
    BatchFailed(String),
    #[error("shape mismatch: expected dim {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// Lifecycle state of a single model engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineHealth {
    Starting,
    Ready,
    Degraded,
    Down,
}

/// One embedding result, tagged with the confidence of the engine that
/// produced it (`<1` when the engine is `degraded`).
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub modality: Modality,
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

/// Create the appropriate compute device for the current platform, honoring
/// `DEVICE=cuda` before falling back to whatever accelerated backend was
/// compiled in, following the `make_device()` helper pattern from the core
/// library this grew from.
pub fn make_device() -> Device {
    if std::env::var("DEVICE").as_deref() == Ok("cuda") {
        if let Ok(dev) = Device::new_cuda(0) {
            return dev;
        }
    }
    #[cfg(target_os = "macos")]
    {
        Device::new_metal(0).unwrap_or(Device::Cpu)
    }
    #[cfg(not(target_os = "macos"))]
    {
        Device::Cpu
    }
}

struct ClipEngine {
    embedder: Option<ClipEmbedder>,
    health: EngineHealth,
}

struct WhisperEngine {
    transcriber: Option<Transcriber>,
    health: EngineHealth,
}

/// Holds one engine per model (`clip`, `whisper`, ...), loading each lazily
/// the first time a segment of the matching modality needs embedding.
pub struct EncoderPool {
    device: Device,
    clip: Mutex<ClipEngine>,
    whisper: Mutex<WhisperEngine>,
    query_cache: Mutex<QueryCache>,
    pub max_batch_size: usize,
}

impl EncoderPool {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            clip: Mutex::new(ClipEngine {
                embedder: None,
                health: EngineHealth::Starting,
            }),
            whisper: Mutex::new(WhisperEngine {
                transcriber: None,
                health: EngineHealth::Starting,
            }),
            query_cache: Mutex::new(QueryCache::default()),
            max_batch_size: 16,
        }
    }

    fn ensure_clip(&self) -> Result<(), EncodeError> {
        let mut guard = self.clip.lock().unwrap();
        if guard.embedder.is_some() {
            return Ok(());
        }
        match ClipEmbedder::new(&self.device) {
            Ok(e) => {
                guard.embedder = Some(e);
                guard.health = EngineHealth::Ready;
                Ok(())
            }
            Err(e) => {
                guard.health = EngineHealth::Down;
                Err(EncodeError::ModelUnavailable(e.to_string()))
            }
        }
    }

    fn ensure_whisper(&self) -> Result<(), EncodeError> {
        let mut guard = self.whisper.lock().unwrap();
        if guard.transcriber.is_some() {
            return Ok(());
        }
        match Transcriber::new() {
            Ok(t) => {
                guard.transcriber = Some(t);
                guard.health = EngineHealth::Ready;
                Ok(())
            }
            Err(e) => {
                guard.health = EngineHealth::Down;
                Err(EncodeError::ModelUnavailable(e.to_string()))
            }
        }
    }

    pub fn clip_health(&self) -> EngineHealth {
        self.clip.lock().unwrap().health
    }

    pub fn whisper_health(&self) -> EngineHealth {
        self.whisper.lock().unwrap().health
    }

    /// Embed a batch of text strings. Routes `image`, `visual_frame` and
    /// `text` segments to the joint image/text model.
    pub fn embed_text_batch(
        &self,
        modality: Modality,
        texts: &[String],
    ) -> Result<Vec<EmbeddingOutput>, EncodeError> {
        self.ensure_clip()?;
        let mut guard = self.clip.lock().unwrap();
        let embedder = guard.embedder.as_mut().expect("checked by ensure_clip");
        let confidence = if guard.health == EngineHealth::Degraded {
            0.5
        } else {
            1.0
        };

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let result = embedder
                .embed_text(text)
                .map_err(|e| EncodeError::BatchFailed(e.to_string()))?;
            if result.data.iter().any(|v| !v.is_finite()) {
                return Err(EncodeError::BatchFailed("non-finite embedding".into()));
            }
            out.push(EmbeddingOutput {
                modality,
                embedding: result.data,
                confidence,
            });
        }
        Ok(out)
    }

    /// Embed a single image file, routed to the joint image/text model.
    pub fn embed_image_file(&self, path: &Path) -> Result<EmbeddingOutput, EncodeError> {
        self.ensure_clip()?;
        let mut guard = self.clip.lock().unwrap();
        let embedder = guard.embedder.as_mut().expect("checked by ensure_clip");
        let result = embedder
            .embed_image_file(path)
            .map_err(|e| EncodeError::BatchFailed(e.to_string()))?;
        if result.data.iter().any(|v| !v.is_finite()) {
            return Err(EncodeError::BatchFailed("non-finite embedding".into()));
        }
        Ok(EmbeddingOutput {
            modality: Modality::Image,
            embedding: result.data,
            confidence: 1.0,
        })
    }

    /// Transcribe a speech segment, then embed the resulting text with the
    /// image/text model so speech becomes searchable by text queries.
    pub fn transcribe_and_embed(&self, audio_path: &Path) -> Result<EmbeddingOutput, EncodeError> {
        self.ensure_whisper()?;
        let text = {
            let mut guard = self.whisper.lock().unwrap();
            let transcriber = guard.transcriber.as_mut().expect("checked by ensure_whisper");
            transcriber
                .transcribe_file(audio_path)
                .map_err(|e| EncodeError::BatchFailed(e.to_string()))?
        };

        let mut outputs = self.embed_text_batch(Modality::AudioSpeech, &[text])?;
        outputs
            .pop()
            .ok_or_else(|| EncodeError::BatchFailed("empty transcription embedding".into()))
    }

    /// Embed a search query, serving from the bounded query-embedding cache
    /// when the exact same text was embedded recently rather than re-running
    /// the text model on every repeated search.
    pub fn embed_query_text(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        if let Some(cached) = self.query_cache.lock().unwrap().get(text) {
            return Ok(cached.data.clone());
        }

        let mut out = self.embed_text_batch(Modality::Text, &[text.to_string()])?;
        let embedding = out
            .pop()
            .ok_or_else(|| EncodeError::BatchFailed("empty query embedding".into()))?
            .embedding;

        self.query_cache.lock().unwrap().insert(
            text.to_string(),
            CachedEmbedding {
                data: embedding.clone(),
                num_tokens: text.split_whitespace().count(),
            },
        );
        Ok(embedding)
    }

    pub fn query_cache_hit_rate(&self) -> f64 {
        self.query_cache.lock().unwrap().hit_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_device_returns_something_usable() {
        let device = make_device();
        assert!(device.is_cpu() || device.is_metal() || device.is_cuda());
    }

    #[test]
    fn pool_starts_with_engines_unloaded() {
        let pool = EncoderPool::new(Device::Cpu);
        assert_eq!(pool.clip_health(), EngineHealth::Starting);
        assert_eq!(pool.whisper_health(), EngineHealth::Starting);
    }

    #[test]
    fn query_cache_starts_empty_with_zero_hit_rate() {
        let pool = EncoderPool::new(Device::Cpu);
        assert_eq!(pool.query_cache_hit_rate(), 0.0);
    }
}
