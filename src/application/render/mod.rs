//! Notation render pipeline: stage the source, typeset it, rasterize the document.

mod error;
mod pipeline;
mod staging;
mod tools;

pub use error::{PipelineStep, RenderError, RenderErrorKind};
pub use pipeline::{
    DEFAULT_STAGING_DIR, DEFAULT_TOOL_TIMEOUT, RASTER_DENSITY_DPI, RenderPipeline,
    RenderPipelineConfig, RenderedImage,
};
pub use staging::{STAGED_BASE_NAME, StagedFiles};
pub use tools::{CONVERT_TOOL, ExternalTool, LILYPOND_TOOL, ToolOutput, resolve_executable};
