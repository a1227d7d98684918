use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::{
    config::RenderSettings,
    domain::{RenderProfile, RenderRequest},
};

use super::{
    error::{PipelineStep, RenderError},
    staging::StagedFiles,
    tools::ExternalTool,
};

pub const RASTER_DENSITY_DPI: u32 = 300;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_STAGING_DIR: &str = "/tmp/lilyrender";

#[derive(Debug, Clone)]
pub struct RenderPipelineConfig {
    pub lilypond_path: PathBuf,
    pub convert_path: PathBuf,
    pub staging_dir: PathBuf,
    pub tool_timeout: Duration,
}

impl Default for RenderPipelineConfig {
    fn default() -> Self {
        Self {
            lilypond_path: PathBuf::from(super::tools::LILYPOND_TOOL),
            convert_path: PathBuf::from(super::tools::CONVERT_TOOL),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl From<&RenderSettings> for RenderPipelineConfig {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            lilypond_path: settings.lilypond_path.clone(),
            convert_path: settings.convert_path.clone(),
            staging_dir: settings.staging_dir.clone(),
            tool_timeout: settings.tool_timeout,
        }
    }
}

/// Raster output of a successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    bytes: Vec<u8>,
}

impl RenderedImage {
    pub const FORMAT: &'static str = "png";

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn encode_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Typesets notation with LilyPond and rasterizes the PDF with ImageMagick.
///
/// Each call stages its files in a directory of its own, so renders may run
/// concurrently. Steps within one render are strictly sequential.
#[derive(Debug, Clone)]
pub struct RenderPipeline {
    engine: ExternalTool,
    rasterizer: ExternalTool,
    staging_dir: PathBuf,
    tool_timeout: Duration,
}

impl RenderPipeline {
    pub fn new(config: RenderPipelineConfig) -> Self {
        Self {
            engine: ExternalTool::lilypond(config.lilypond_path),
            rasterizer: ExternalTool::convert(config.convert_path),
            staging_dir: config.staging_dir,
            tool_timeout: config.tool_timeout,
        }
    }

    pub fn engine(&self) -> &ExternalTool {
        &self.engine
    }

    pub fn rasterizer(&self) -> &ExternalTool {
        &self.rasterizer
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub async fn render(&self, request: &RenderRequest) -> Result<RenderedImage, RenderError> {
        let started_at = Instant::now();

        let result = match StagedFiles::allocate(&self.staging_dir).await {
            Ok(staged) => {
                let outcome = self.run_steps(&staged, request).await;
                staged.release();
                outcome
            }
            Err(err) => Err(err),
        };

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!("lilyrender_render_ms").record(elapsed_ms as f64);

        match &result {
            Ok(image) => {
                counter!("lilyrender_render_total", "result" => "ok").increment(1);
                info!(
                    target = "application::render::pipeline",
                    op = "pipeline::render",
                    result = "ok",
                    profile = request.profile.as_str(),
                    version = %request.version,
                    source_bytes = request.source.len(),
                    image_bytes = image.len(),
                    elapsed_ms,
                    "Notation rendered"
                );
            }
            Err(err) => {
                counter!("lilyrender_render_total", "result" => err.kind().as_str()).increment(1);
                warn!(
                    target = "application::render::pipeline",
                    op = "pipeline::render",
                    result = "error",
                    profile = request.profile.as_str(),
                    version = %request.version,
                    error_kind = err.kind().as_str(),
                    step = err.step().as_str(),
                    elapsed_ms,
                    error = %err,
                    "Notation render failed"
                );
            }
        }

        result
    }

    async fn run_steps(
        &self,
        staged: &StagedFiles,
        request: &RenderRequest,
    ) -> Result<RenderedImage, RenderError> {
        staged.write_source(&request.staged_text()).await?;
        debug!(
            target = "application::render::pipeline",
            op = "pipeline::stage",
            token = %staged.token(),
            path = %staged.source().display(),
            source_bytes = request.source.len(),
            "Created LilyPond file"
        );

        self.engine
            .run(
                PipelineStep::Typeset,
                typeset_args(staged, request.profile),
                staged.directory(),
                self.tool_timeout,
            )
            .await?;
        ensure_output(
            PipelineStep::VerifyDocument,
            self.engine.name(),
            "PDF",
            staged.document(),
        )
        .await?;

        self.rasterizer
            .run(
                PipelineStep::Rasterize,
                raster_args(staged, request.profile),
                staged.directory(),
                self.tool_timeout,
            )
            .await?;
        ensure_output(
            PipelineStep::VerifyImage,
            self.rasterizer.name(),
            "PNG",
            staged.image(),
        )
        .await?;

        let bytes = tokio::fs::read(staged.image()).await.map_err(|source| {
            RenderError::staging(
                PipelineStep::ReadImage,
                "read rendered image",
                staged.image(),
                source,
            )
        })?;

        Ok(RenderedImage { bytes })
    }
}

fn typeset_args(staged: &StagedFiles, profile: RenderProfile) -> Vec<OsString> {
    let mut args = vec![OsString::from("--pdf")];
    if let Some(backend) = profile.engine_backend() {
        args.push(backend.into());
    }
    args.push("-o".into());
    args.push(staged.output_prefix().into());
    args.push(staged.source().into());
    args
}

fn raster_args(staged: &StagedFiles, profile: RenderProfile) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("-density"),
        RASTER_DENSITY_DPI.to_string().into(),
    ];
    if let Some(quality) = profile.raster_quality() {
        args.push("-quality".into());
        args.push(quality.to_string().into());
    }
    args.push(staged.document().into());
    args.push(staged.image().into());
    args
}

/// Exit status alone is not trusted: the artifact must be on disk.
async fn ensure_output(
    step: PipelineStep,
    tool: &'static str,
    artifact: &'static str,
    path: &Path,
) -> Result<(), RenderError> {
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if is_file {
        return Ok(());
    }
    Err(RenderError::OutputMissing {
        step,
        tool,
        artifact,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn standard_profile_arguments() {
        let root = TempDir::new().expect("temp dir");
        let staged = StagedFiles::allocate(root.path()).await.expect("allocate");
        let prefix = staged.output_prefix().display().to_string();

        assert_eq!(
            as_strings(typeset_args(&staged, RenderProfile::Standard)),
            vec![
                "--pdf".to_string(),
                "-o".to_string(),
                prefix.clone(),
                format!("{prefix}.ly"),
            ]
        );
        assert_eq!(
            as_strings(raster_args(&staged, RenderProfile::Standard)),
            vec![
                "-density".to_string(),
                "300".to_string(),
                format!("{prefix}.pdf"),
                format!("{prefix}.png"),
            ]
        );
    }

    #[tokio::test]
    async fn binary_profile_arguments() {
        let root = TempDir::new().expect("temp dir");
        let staged = StagedFiles::allocate(root.path()).await.expect("allocate");

        let typeset = as_strings(typeset_args(&staged, RenderProfile::Binary));
        assert_eq!(&typeset[..3], ["--pdf", "-dbackend=eps", "-o"]);

        let raster = as_strings(raster_args(&staged, RenderProfile::Binary));
        assert_eq!(&raster[..4], ["-density", "300", "-quality", "100"]);
    }

    #[test]
    fn image_encodes_as_standard_base64() {
        let image = RenderedImage {
            bytes: b"\x89PNG\r\n\x1a\n".to_vec(),
        };
        assert_eq!(image.encode_base64(), "iVBORw0KGgo=");
        assert_eq!(RenderedImage::FORMAT, "png");
    }

    #[tokio::test]
    async fn missing_output_is_reported_with_its_path() {
        let root = TempDir::new().expect("temp dir");
        let path = root.path().join("score.pdf");

        let err = ensure_output(PipelineStep::VerifyDocument, "lilypond", "PDF", &path)
            .await
            .expect_err("absent file");
        assert_eq!(err.kind().as_str(), "OutputMissing");

        std::fs::create_dir(&path).expect("directory in place of the document");
        assert!(
            ensure_output(PipelineStep::VerifyDocument, "lilypond", "PDF", &path)
                .await
                .is_err()
        );

        std::fs::remove_dir(&path).expect("remove");
        std::fs::write(&path, b"%PDF").expect("write");
        assert!(
            ensure_output(PipelineStep::VerifyDocument, "lilypond", "PDF", &path)
                .await
                .is_ok()
        );
    }
}
