//! Request-scoped domain values: notation input, engine versions and render profiles.

pub mod error;
pub mod notation;

pub use notation::{
    ContentEncoding, DEFAULT_ENGINE_VERSION, EngineVersion, NotationSource, RenderProfile,
    RenderRequest, decode_base64_text, ensure_text_upload,
};
