use std::fs;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tilepipe::core::config::RuntimeConfig;
use tilepipe::core::layer::Layer;
use tilepipe::core::pipeline::{PipelineOptions, PipelineOrchestrator};
use tilepipe::core::tile::NoData;
use tilepipe::io::secrets::{ensure_gcs_credentials, EnvSecrets};
use tilepipe::io::storage;
use tilepipe::types::DataType;

use super::args::CliArgs;
use super::errors::AppError;

fn require<T>(value: Option<T>, arg: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::MissingArgument {
        arg: arg.to_string(),
    })
}

/// Build the layer definition from a JSON file or from inline flags.
fn build_layer(args: &CliArgs) -> Result<Layer, Box<dyn std::error::Error>> {
    if let Some(path) = &args.layer {
        return Ok(Layer::from_json_file(path)?);
    }
    let nodata = match args.nodata.len() {
        0 => None,
        1 => Some(NoData::Single(args.nodata[0])),
        _ => Some(NoData::PerBand(args.nodata.clone())),
    };
    let dtype: DataType = require(args.dtype, "--dtype")?;
    let layer = Layer {
        dataset: require(args.dataset.clone(), "--dataset")?,
        version: require(args.version.clone(), "--version")?,
        grid: require(args.grid.clone(), "--grid")?,
        sources: args.sources.clone(),
        dtype,
        nodata,
        band_count: args.band_count,
        resampling: args.resampling,
        compression: args.compression,
        calc: args.calc.clone(),
        subset: args.subset.clone(),
        overwrite: args.overwrite,
        skip_existing_artifacts: args.ignore_existing,
    };
    layer.validate()?;
    Ok(layer)
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.log {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let mut layer = build_layer(&args)?;
    layer.skip_existing_artifacts |= args.ignore_existing;

    let uses_gcs = layer
        .sources
        .iter()
        .chain(std::iter::once(&args.target))
        .any(|uri| uri.starts_with("gs://"));
    if uses_gcs && ensure_gcs_credentials(&EnvSecrets)?.is_none() {
        return Err(AppError::MissingArgument {
            arg: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
        }
        .into());
    }

    // Keep the temp-dir guard alive for the whole run.
    let (work_root, _scratch_guard) = match &args.work_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            (dir.clone(), None)
        }
        None => {
            let tmp = tempfile::tempdir()?;
            (tmp.path().to_path_buf(), Some(tmp))
        }
    };

    let config = RuntimeConfig::detect(args.workers, args.mem_fraction, work_root);
    info!(
        "runtime: {} cores, {} MB memory budget",
        config.cores,
        config.memory_budget / (1024 * 1024)
    );

    let store = storage::from_uri(&args.target)?;
    let orchestrator = PipelineOrchestrator::new(
        &layer,
        &config,
        store,
        PipelineOptions {
            target: args.target.clone(),
        },
    );
    let summary = orchestrator.run()?;

    println!(
        "{}/{}: {} processed, {} skipped, {} pre-existing, {} failed",
        layer.dataset,
        layer.version,
        summary.processed.len(),
        summary.skipped.len(),
        summary.existing.len(),
        summary.failed.len()
    );
    if summary.has_failures() {
        return Err(AppError::TilesFailed {
            count: summary.failed.len(),
        }
        .into());
    }
    Ok(())
}
