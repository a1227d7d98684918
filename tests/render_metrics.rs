#![cfg(unix)]

use std::{
    collections::HashSet,
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

use lilyrender::{
    application::render::{RenderPipeline, RenderPipelineConfig},
    domain::{EngineVersion, NotationSource, RenderProfile, RenderRequest},
    infra::telemetry,
};
use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("set perms");
    path
}

fn request(body: &str) -> RenderRequest {
    RenderRequest::new(
        NotationSource::new(body),
        EngineVersion::default(),
        RenderProfile::Standard,
    )
}

#[tokio::test]
async fn renders_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let root = TempDir::new().expect("temp dir");
    let lilypond = write_script(
        root.path(),
        "fake-lilypond",
        r#"case "$*" in *reject-staging*) ;; *) for arg; do prev2="$prev"; prev="$arg"; done; touch "$prev2.pdf"; exit 0 ;; esac
echo "forced failure" >&2
exit 1"#,
    );
    let convert = write_script(
        root.path(),
        "fake-convert",
        r#"for arg; do prev="$arg"; done
printf '\211PNG\r\n\032\n' > "$prev""#,
    );

    let pipeline = RenderPipeline::new(RenderPipelineConfig {
        lilypond_path: lilypond,
        convert_path: convert,
        staging_dir: root.path().join("staging"),
        tool_timeout: Duration::from_secs(10),
    });

    let image = pipeline
        .render(&request("{ c'4 }"))
        .await
        .expect("render should succeed");
    assert!(!image.is_empty());

    // Staged paths under `reject-staging` make the fake engine exit non-zero.
    let failing = RenderPipeline::new(RenderPipelineConfig {
        lilypond_path: pipeline.engine().program().to_path_buf(),
        convert_path: pipeline.rasterizer().program().to_path_buf(),
        staging_dir: root.path().join("reject-staging"),
        tool_timeout: Duration::from_secs(10),
    });
    let err = failing
        .render(&request("{ c'4 }"))
        .await
        .expect_err("render should fail");
    assert_eq!(err.kind().as_str(), "ExternalToolFailure");

    let snapshot = snapshotter.snapshot().into_vec();

    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();
    for metric in [
        "lilyrender_render_total",
        "lilyrender_render_ms",
        "lilyrender_tool_ms",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let results: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| {
            composite_key.key().name() == "lilyrender_render_total"
        })
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .filter(|label| label.key() == "result")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(results.contains("ok"));
    assert!(results.contains("ExternalToolFailure"));

    let tools: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| composite_key.key().name() == "lilyrender_tool_ms")
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    assert!(tools.contains("lilypond"));
    assert!(tools.contains("convert"));
}
