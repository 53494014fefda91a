//! slide-info - print what a slide contains.
//!
//! Usage: `slide-info <SLIDE> [--json] [--write-levels DIR] [--write-associated DIR]`
//!
//! Reports image information, the metadata dictionary, the pyramid levels and
//! the associated images. Levels and associated images can be written out as
//! PNG files, streamed through the same writer `slide-stream` uses.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use slide_stream::{
    config::InfoConfig,
    error::{DecodeError, PipelineError, WriteError},
    logging::init_logging,
    pixel::PixelFormat,
    slide::{open_slide, AssociatedImageInfo, FileSlide, ImageSource, LevelInfo, ReadTarget},
    stream::{
        create_output, Passthrough, StreamingFilterPipeline, StreamingWriter, WriterConfig,
        DEFAULT_DIVISIONS,
    },
};

/// Associated image names printed per line.
const NAMES_PER_LINE: usize = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match InfoConfig::try_parse() {
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

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {} failed: {}", e.stage(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &InfoConfig) -> Result<(), PipelineError> {
    config.validate()?;

    let slide = open_slide(&config.slide, &config.source_options()).await?;
    let report = SlideReport::collect(&slide);

    if config.json {
        let json = serde_json::to_string_pretty(&report).map_err(|e| WriteError::Encode {
            message: e.to_string(),
        })?;
        println!("{}", json);
    } else {
        print!("{}", report.render());
    }

    if let Some(dir) = &config.write_levels {
        for level in &report.levels {
            let path = dir.join(format!("level-{}.png", level.info.level));
            let target = ReadTarget::Level(level.info.level);
            write_image(&slide, target, &path, config.max_image_bytes).await?;
        }
    }
    if let Some(dir) = &config.write_associated {
        for image in &report.associated_images {
            let path = dir.join(format!("{}.png", image.info.name));
            let target = ReadTarget::Associated(image.info.name.clone());
            write_image(&slide, target, &path, config.max_image_bytes).await?;
        }
    }
    Ok(())
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Serialize)]
struct SlideReport {
    dimensions: usize,
    component_type: &'static str,
    pixel_type: &'static str,
    pixel_format: PixelFormat,
    vendor: &'static str,
    format: &'static str,
    properties: BTreeMap<String, String>,
    levels: Vec<LevelReport>,
    associated_images: Vec<AssociatedReport>,
}

#[derive(Debug, Serialize)]
struct LevelReport {
    #[serde(flatten)]
    info: LevelInfo,
    size_in_bytes: u64,
}

#[derive(Debug, Serialize)]
struct AssociatedReport {
    #[serde(flatten)]
    info: AssociatedImageInfo,
    spacing: [f64; 2],
    size_in_bytes: u64,
}

impl SlideReport {
    fn collect(slide: &FileSlide) -> Self {
        let pixel_format = slide.metadata().pixel_format();
        let channels = pixel_format.channels() as u64;

        let levels = (0..slide.level_count())
            .filter_map(|n| slide.level_info(n))
            .map(|info| LevelReport {
                size_in_bytes: info.width as u64 * info.height as u64 * channels,
                info,
            })
            .collect();

        let mut associated_images = Vec::new();
        for name in slide.associated_image_names() {
            let Some(info) = slide.associated_image_info(name) else {
                continue;
            };
            // Associated images carry no physical spacing
            associated_images.push(AssociatedReport {
                size_in_bytes: info.width as u64 * info.height as u64 * channels,
                spacing: [1.0, 1.0],
                info,
            });
        }

        Self {
            dimensions: 2,
            component_type: "uint8",
            pixel_type: pixel_format.pixel_type(),
            pixel_format,
            vendor: slide.vendor(),
            format: slide.format().name(),
            properties: slide.properties().clone(),
            levels,
            associated_images,
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "\nImage Information:\n")?;
        writeln!(out, "Dimensions: {}", self.dimensions)?;
        writeln!(out, "Component type: {}", self.component_type)?;
        writeln!(out, "Pixel type: {}", self.pixel_type)?;
        writeln!(out, "Vendor: {}", self.vendor)?;

        writeln!(out, "\nMeta Data:\n")?;
        writeln!(out, "Number of keys: {}", self.properties.len())?;
        writeln!(out, "Entries:")?;
        for (key, value) in &self.properties {
            writeln!(out, "{} = {}", key, value)?;
        }

        writeln!(out, "\nLevel Information:\n")?;
        writeln!(out, "Level count: {}", self.levels.len())?;
        writeln!(out, "Levels:")?;
        for level in &self.levels {
            let info = &level.info;
            writeln!(
                out,
                "Level {}: dimensions = [{}, {}], spacing = [{}, {}], size in bytes = {}",
                info.level,
                info.width,
                info.height,
                info.spacing[0],
                info.spacing[1],
                level.size_in_bytes
            )?;
        }

        writeln!(out, "\nAssociated image information:\n")?;
        writeln!(out, "Number of associated images: {}", self.associated_images.len())?;
        writeln!(out, "Associated image names:")?;
        let names: Vec<String> = self
            .associated_images
            .iter()
            .map(|image| format!("'{}'", image.info.name))
            .collect();
        for line in names.chunks(NAMES_PER_LINE) {
            writeln!(out, "{}", line.join(", "))?;
        }

        writeln!(out, "\nAssociated images:")?;
        for image in &self.associated_images {
            writeln!(
                out,
                "{}: dimensions = [{}, {}], spacing = [{}, {}], size in bytes = {}",
                image.info.name,
                image.info.width,
                image.info.height,
                image.spacing[0],
                image.spacing[1],
                image.size_in_bytes
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Image Output
// =============================================================================

/// Stream one image of the slide, unfiltered, into a PNG file.
async fn write_image(
    slide: &FileSlide,
    target: ReadTarget,
    path: &Path,
    max_image_bytes: u64,
) -> Result<(), PipelineError> {
    let image = match slide.select(target).await {
        Ok(image) => image,
        Err(DecodeError::UnsupportedCompression(compression)) => {
            warn!(path = %path.display(), compression = %compression, "cannot decode image, skipping");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let metadata = image.metadata().clone();

    if metadata.size_in_bytes() > max_image_bytes {
        warn!(
            path = %path.display(),
            bytes = metadata.size_in_bytes(),
            limit = max_image_bytes,
            "image is too large, skipping"
        );
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await.map_err(WriteError::from)?;
    }

    let [width, height] = metadata.dimensions();
    let config = WriterConfig {
        divisions: DEFAULT_DIVISIONS.min(width.max(height) as usize),
        ..WriterConfig::default()
    };
    let container = create_output(path, metadata).await?;
    let pipeline = Arc::new(StreamingFilterPipeline::new(Arc::new(image), Passthrough));
    StreamingWriter::new(pipeline, container, config).run().await?;

    info!(path = %path.display(), "wrote image");
    Ok(())
}
