//! Presence checks for the external tools the render pipeline needs.

use serde::Serialize;
use tracing::{info, warn};

use super::render::{ExternalTool, RenderPipeline};

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub tool: &'static str,
    pub program: String,
    pub resolved: Option<String>,
    #[serde(skip)]
    pub install_hint: &'static str,
}

impl DependencyStatus {
    fn check(tool: &ExternalTool) -> Self {
        Self {
            tool: tool.name(),
            program: tool.program().display().to_string(),
            resolved: tool.resolve().map(|path| path.display().to_string()),
            install_hint: tool.install_hint(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.resolved.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyReport {
    pub dependencies: Vec<DependencyStatus>,
}

impl DependencyReport {
    pub fn check(pipeline: &RenderPipeline) -> Self {
        Self {
            dependencies: vec![
                DependencyStatus::check(pipeline.engine()),
                DependencyStatus::check(pipeline.rasterizer()),
            ],
        }
    }

    pub fn all_available(&self) -> bool {
        self.dependencies.iter().all(DependencyStatus::is_available)
    }

    pub fn missing(&self) -> impl Iterator<Item = &DependencyStatus> {
        self.dependencies.iter().filter(|status| !status.is_available())
    }

    /// Advisory startup log: missing tools do not stop the server, requests fail instead.
    pub fn log_startup(&self) {
        for status in &self.dependencies {
            match status.resolved.as_deref() {
                Some(path) => info!(
                    target = "application::dependencies",
                    tool = status.tool,
                    path,
                    "External tool available"
                ),
                None => warn!(
                    target = "application::dependencies",
                    tool = status.tool,
                    program = %status.program,
                    "Warning: {}",
                    status.install_hint
                ),
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::application::render::RenderPipelineConfig;
    use std::path::PathBuf;

    #[test]
    fn reports_each_tool_separately() {
        let pipeline = RenderPipeline::new(RenderPipelineConfig {
            lilypond_path: PathBuf::from("sh"),
            convert_path: PathBuf::from("/nonexistent/convert"),
            ..RenderPipelineConfig::default()
        });

        let report = DependencyReport::check(&pipeline);

        assert!(!report.all_available());
        let missing: Vec<_> = report.missing().map(|status| status.tool).collect();
        assert_eq!(missing, vec!["convert"]);
        assert!(report.dependencies[0].is_available());
        assert_eq!(
            report.dependencies[1].install_hint,
            "Please install ImageMagick: brew install imagemagick"
        );
    }

    #[test]
    fn serializes_without_install_hints() {
        let pipeline = RenderPipeline::new(RenderPipelineConfig {
            lilypond_path: PathBuf::from("/nonexistent/lilypond"),
            convert_path: PathBuf::from("/nonexistent/convert"),
            ..RenderPipelineConfig::default()
        });

        let json = serde_json::to_value(DependencyReport::check(&pipeline)).expect("json");

        assert_eq!(json["dependencies"][0]["tool"], "lilypond");
        assert_eq!(json["dependencies"][0]["resolved"], serde_json::Value::Null);
        assert!(json["dependencies"][0].get("install_hint").is_none());
    }
}
