//! File type classification (C1): map a path to a coarse media kind with a
//! confidence score, combining extension tables and magic-byte sniffing.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::encoding::is_valid_text_encoding;

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "tiff", "tif", "heic", "heif", "avif",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpeg", "mpg",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "m4a", "ogg", "opus", "wma", "aac", "aiff",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "json", "yaml", "yml", "toml", "csv", "log", "xml", "html", "htm", "rs",
    "py", "js", "ts", "go", "c", "cpp", "h", "java", "rb",
];

/// Coarse media kind a file resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Text,
    Unknown,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::Text => "text",
            FileKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Result of classifying a file: kind plus a confidence in `[0,1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub kind: FileKind,
    pub confidence: f32,
    /// True when extension and magic bytes disagreed and magic bytes won.
    pub disagreement: bool,
}

/// Errors raised by the classifier itself (not downstream decoding).
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("file not found: {0}")]
    FileMissing(std::path::PathBuf),
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Classify a file by combining extension and magic-byte evidence, per the
/// disagreement-weighted confidence rule: agreement is 0.95, magic-bytes-wins
/// disagreement is 0.8, extension-only is 0.7, neither is 0.3.
pub fn classify(path: &Path) -> Result<Classification, ClassifyError> {
    if !path.exists() {
        return Err(ClassifyError::FileMissing(path.to_path_buf()));
    }

    let t_ext = kind_from_extension(path);
    let t_magic = kind_from_magic(path)?;

    Ok(match (t_ext, t_magic) {
        (Some(e), Some(m)) if e == m => Classification {
            kind: e,
            confidence: 0.95,
            disagreement: false,
        },
        (_, Some(m)) => Classification {
            kind: m,
            confidence: 0.8,
            disagreement: t_ext.is_some(),
        },
        (Some(e), None) => Classification {
            kind: e,
            confidence: 0.7,
            disagreement: false,
        },
        (None, None) => Classification {
            kind: FileKind::Unknown,
            confidence: 0.3,
            disagreement: false,
        },
    })
}

fn kind_from_extension(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Audio)
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Text)
    } else {
        None
    }
}

fn kind_from_magic(path: &Path) -> Result<Option<FileKind>, ClassifyError> {
    let mut file = File::open(path).map_err(|source| ClassifyError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buffer = [0u8; 8192];
    let bytes_read = file.read(&mut buffer).map_err(|source| ClassifyError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(kind_from_buffer(&buffer[..bytes_read]))
}

/// Magic-byte classification of a raw buffer, exposed separately so callers
/// that already hold file bytes (e.g. the watcher reading a small probe) can
/// skip a second disk read.
pub fn kind_from_buffer(buffer: &[u8]) -> Option<FileKind> {
    if buffer.is_empty() {
        return Some(FileKind::Text);
    }

    if let Some(ft) = infer::get(buffer) {
        let mime = ft.mime_type();
        return if mime.starts_with("image/") {
            Some(FileKind::Image)
        } else if mime.starts_with("video/") {
            Some(FileKind::Video)
        } else if mime.starts_with("audio/") {
            Some(FileKind::Audio)
        } else {
            None
        };
    }

    if is_likely_text(buffer) {
        Some(FileKind::Text)
    } else {
        None
    }
}

/// Heuristic text/binary split used when magic-byte sniffing finds nothing:
/// accept any buffer that decodes (directly or via encoding detection) to a
/// string with at most 10% control/replacement characters.
fn is_likely_text(buffer: &[u8]) -> bool {
    if buffer.is_empty() {
        return true;
    }
    if is_valid_text_encoding(buffer) {
        return true;
    }
    if buffer.contains(&0) {
        return false;
    }

    let text = String::from_utf8_lossy(buffer);
    let mut printable = 0u32;
    let mut bad = 0u32;
    for c in text.chars() {
        if c == '\u{FFFD}' || (c.is_ascii_control() && !matches!(c, '\n' | '\r' | '\t')) {
            bad += 1;
        } else {
            printable += 1;
        }
    }
    let total = printable + bad;
    total == 0 || (bad as f64 / total as f64) <= 0.10
}
