//! File formats and conversion pairs.
//!
//! A format is named by its canonical file extension (`pdf`, `jpg`, `mp3`).
//! Names are normalized on construction so that `".JPEG"` and `"jpg"` are the
//! same format everywhere in the system.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical, lower-case format name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Format(String);

impl Format {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().trim_start_matches('.').to_ascii_lowercase();
        let canonical = match name.as_str() {
            "jpeg" | "jpe" => "jpg",
            "markdown" => "md",
            "text" => "txt",
            "tif" => "tiff",
            "htm" => "html",
            _ => return Self(name),
        };
        Self(canonical.to_string())
    }

    /// Derive the format of an uploaded file from its extension.
    ///
    /// Returns `None` for names without an extension (including dotfiles such
    /// as `.bashrc`) and for extensions containing anything but ASCII
    /// alphanumerics.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        let (stem, ext) = base.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self::new(ext))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// MIME type used when serving a blob of this format.
    pub fn content_type(&self) -> &'static str {
        match self.0.as_str() {
            "pdf" => "application/pdf",
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "png" => "image/png",
            "jpg" => "image/jpeg",
            "webp" => "image/webp",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "tiff" => "image/tiff",
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "ogg" => "audio/ogg",
            "flac" => "audio/flac",
            "m4a" => "audio/mp4",
            "mp4" => "video/mp4",
            "webm" => "video/webm",
            "mov" => "video/quicktime",
            "txt" | "log" => "text/plain; charset=utf-8",
            "md" => "text/markdown; charset=utf-8",
            "csv" => "text/csv; charset=utf-8",
            "html" => "text/html; charset=utf-8",
            _ => "application/octet-stream",
        }
    }
}

impl From<String> for Format {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Format {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Format> for String {
    fn from(value: Format) -> Self {
        value.0
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `(source format, output format)`: the key converters are registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversionPair {
    pub source: Format,
    pub target: Format,
}

impl ConversionPair {
    pub fn new(source: impl Into<Format>, target: impl Into<Format>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl fmt::Display for ConversionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.target)
    }
}
