use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub const DEFAULT_ENGINE_VERSION: &str = "2.24.0";

const TEXT_UPLOAD_SUFFIX: &str = ".txt";

/// LilyPond notation body as submitted by a caller, before the version header is prepended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotationSource(String);

impl NotationSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A `\version` declaration value such as `2.24.0`.
///
/// Only dotted numeric versions are accepted so the value can be spliced into the
/// `\version "..."` line without escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVersion(String);

impl EngineVersion {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_version(raw, "version must not be empty"));
        }

        let well_formed = trimmed
            .split('.')
            .all(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()));
        if !well_formed {
            return Err(DomainError::invalid_version(
                raw,
                "expected dot-separated numbers such as 2.24.0",
            ));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Use the caller's version when present, otherwise the configured fallback.
    pub fn resolve(requested: Option<&str>, fallback: &EngineVersion) -> Result<Self, DomainError> {
        match requested {
            Some(raw) => Self::parse(raw),
            None => Ok(fallback.clone()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        Self(DEFAULT_ENGINE_VERSION.to_string())
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tool flag set used for a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderProfile {
    /// Plain PDF output rasterized at the fixed density.
    #[default]
    Standard,
    /// EPS backend for the engine and maximum raster quality.
    Binary,
}

impl RenderProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderProfile::Standard => "standard",
            RenderProfile::Binary => "binary",
        }
    }

    pub(crate) fn engine_backend(self) -> Option<&'static str> {
        match self {
            RenderProfile::Standard => None,
            RenderProfile::Binary => Some("-dbackend=eps"),
        }
    }

    pub(crate) fn raster_quality(self) -> Option<u32> {
        match self {
            RenderProfile::Standard => None,
            RenderProfile::Binary => Some(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: NotationSource,
    pub version: EngineVersion,
    pub profile: RenderProfile,
}

impl RenderRequest {
    pub fn new(source: NotationSource, version: EngineVersion, profile: RenderProfile) -> Self {
        Self {
            source,
            version,
            profile,
        }
    }

    /// Full engine input: the version declaration followed by the caller's body.
    pub fn staged_text(&self) -> String {
        format!("\\version \"{}\"\n{}\n", self.version, self.source.as_str())
    }
}

/// How the `content` of a binary submission should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Decode as base64 when that yields UTF-8 text, otherwise use the raw string.
    #[default]
    Auto,
    Base64,
    Plain,
}

impl ContentEncoding {
    pub fn decode(self, content: String) -> Result<NotationSource, DomainError> {
        match self {
            ContentEncoding::Plain => Ok(NotationSource::new(content)),
            ContentEncoding::Base64 => decode_base64_text(&content)
                .map(NotationSource::new)
                .ok_or_else(|| {
                    DomainError::validation("content is not base64-encoded UTF-8 text")
                }),
            ContentEncoding::Auto => match decode_base64_text(&content) {
                Some(decoded) => Ok(NotationSource::new(decoded)),
                None => Ok(NotationSource::new(content)),
            },
        }
    }
}

/// Decode standard base64 into UTF-8 text, ignoring ASCII whitespace such as line wrapping.
///
/// Returns `None` when the input is not canonical standard base64 (after whitespace
/// removal) or the decoded bytes are not UTF-8.
pub fn decode_base64_text(content: &str) -> Option<String> {
    let compact: String = content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD.decode(compact.as_bytes()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Accept only uploads whose filename ends in `.txt`.
pub fn ensure_text_upload(filename: Option<&str>) -> Result<&str, DomainError> {
    match filename {
        Some(name) if name.ends_with(TEXT_UPLOAD_SUFFIX) => Ok(name),
        _ => Err(DomainError::validation("File must be a .txt file")),
    }
}
