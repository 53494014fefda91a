//! slide-stream - median-filter a slide chunk by chunk.
//!
//! Usage: `slide-stream <INPUT> <OUTPUT> <RADIUS> [options]`

use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{info, warn};

use slide_stream::{
    config::StreamConfig,
    error::PipelineError,
    logging::init_logging,
    slide::{open_source, ImageSource},
    stream::{
        create_output, CancellationFlag, MedianFilter, StreamSummary, StreamingFilterPipeline,
        StreamingWriter,
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match StreamConfig::try_parse() {
        Ok(config) => config,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    init_logging(config.verbose);

    let cancellation = CancellationFlag::new();
    let flag = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping before the next chunk");
            flag.cancel();
        }
    });

    match run(config, cancellation).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {} failed: {}", e.stage(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(
    config: StreamConfig,
    cancellation: CancellationFlag,
) -> Result<StreamSummary, PipelineError> {
    config.validate()?;
    let radius = config.radius()?;

    let source: Arc<dyn ImageSource<2>> =
        Arc::from(open_source(&config.input, &config.source_options()).await?);
    let metadata = source.metadata().clone();
    let [width, height] = metadata.dimensions();
    info!(
        input = %config.input.display(),
        width,
        height,
        pixel_format = metadata.pixel_format().name(),
        radius,
        divisions = config.divisions,
        "streaming median filter"
    );

    let pipeline = Arc::new(StreamingFilterPipeline::new(
        source,
        MedianFilter::isotropic(radius),
    ));
    let container = create_output(&config.output, metadata).await?;

    let mut writer = StreamingWriter::new(pipeline, container, config.writer_config())
        .with_cancellation(cancellation);
    let summary = writer.run().await?;

    info!(output = %config.output.display(), "done");
    Ok(summary)
}
