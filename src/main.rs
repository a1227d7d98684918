use std::process;

use lilyrender::{
    application::{
        dependencies::DependencyReport,
        error::AppError,
        render::{RenderPipeline, RenderPipelineConfig},
    },
    config::{self, CheckArgs, RenderArgs},
    domain::{EngineVersion, NotationSource, RenderProfile, RenderRequest},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;
    let pipeline = RenderPipeline::new(RenderPipelineConfig::from(&settings.render));

    match command {
        config::Command::Serve(_) => run_serve(settings, pipeline).await,
        config::Command::Check(args) => run_check(pipeline, args),
        config::Command::Render(args) => run_render(settings, pipeline, args).await,
    }
}

async fn run_serve(settings: config::Settings, pipeline: RenderPipeline) -> Result<(), AppError> {
    DependencyReport::check(&pipeline).log_startup();

    tokio::fs::create_dir_all(pipeline.staging_dir())
        .await
        .map_err(InfraError::from)?;

    let max_request_bytes = usize::try_from(settings.uploads.max_request_bytes.get())
        .map_err(|_| AppError::unexpected("uploads.max_request_bytes exceeds usize"))?;
    let state = HttpState::new(pipeline, settings.render.default_version.clone());
    let router = http::build_router(state, max_request_bytes);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "lilyrender::serve",
        addr = %settings.server.addr,
        staging_dir = %settings.render.staging_dir.display(),
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| InfraError::server(err.to_string()))?;

    info!(target = "lilyrender::serve", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "lilyrender::serve",
            error = %err,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}

fn run_check(pipeline: RenderPipeline, _args: CheckArgs) -> Result<(), AppError> {
    let report = DependencyReport::check(&pipeline);

    for status in &report.dependencies {
        match status.resolved.as_deref() {
            Some(path) => println!("{:<10} ok       {path}", status.tool),
            None => println!(
                "{:<10} missing  {} ({})",
                status.tool, status.program, status.install_hint
            ),
        }
    }

    if report.all_available() {
        Ok(())
    } else {
        let missing = report
            .missing()
            .map(|status| status.tool)
            .collect::<Vec<_>>()
            .join(", ");
        Err(AppError::unexpected(format!(
            "missing external tools: {missing}"
        )))
    }
}

async fn run_render(
    settings: config::Settings,
    pipeline: RenderPipeline,
    args: RenderArgs,
) -> Result<(), AppError> {
    let content = tokio::fs::read_to_string(&args.input)
        .await
        .map_err(InfraError::from)?;
    let version = EngineVersion::resolve(
        args.engine_version.as_deref(),
        &settings.render.default_version,
    )?;
    let profile = if args.binary {
        RenderProfile::Binary
    } else {
        RenderProfile::Standard
    };

    let request = RenderRequest::new(NotationSource::new(content), version, profile);
    let image = pipeline.render(&request).await?;

    tokio::fs::write(&args.output, image.bytes())
        .await
        .map_err(InfraError::from)?;

    info!(
        target = "lilyrender::render",
        input = %args.input.display(),
        output = %args.output.display(),
        profile = profile.as_str(),
        image_bytes = image.len(),
        "Rendered score"
    );
    Ok(())
}
