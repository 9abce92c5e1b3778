//! The staged tile pipeline: enumerate, filter, transform, upload, report.
//!
//! Stages run as a fixed sequence over a vector of tiles; every stage
//! annotates status in place. A tile's failure never aborts its siblings —
//! failures only surface in the final summary (and the process exit code).
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::core::config::RuntimeConfig;
use crate::core::engine::TileTransformEngine;
use crate::core::grid::Grid;
use crate::core::layer::Layer;
use crate::core::tile::{RasterProfile, Tile, TileStatus};
use crate::error::Result;
use crate::io::gdal::SourceDescriptor;
use crate::io::storage::{fetch, split_remote, Storage};
use crate::io::{extent, vrt};

/// Knobs that belong to a run, not to the layer definition.
pub struct PipelineOptions {
    /// Destination root URI for artifacts.
    pub target: String,
}

/// Terminal buckets of one run.
#[derive(Debug, Default)]
pub struct Summary {
    pub processed: Vec<String>,
    pub skipped: Vec<(String, TileStatus)>,
    pub failed: Vec<String>,
    pub existing: Vec<String>,
}

impl Summary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.processed.len() + self.skipped.len() + self.failed.len() + self.existing.len()
    }
}

pub struct PipelineOrchestrator<'a> {
    layer: &'a Layer,
    config: &'a RuntimeConfig,
    storage: Box<dyn Storage>,
    options: PipelineOptions,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(
        layer: &'a Layer,
        config: &'a RuntimeConfig,
        storage: Box<dyn Storage>,
        options: PipelineOptions,
    ) -> PipelineOrchestrator<'a> {
        PipelineOrchestrator {
            layer,
            config,
            storage,
            options,
        }
    }

    pub fn run(&self) -> Result<Summary> {
        let grid = self.layer.grid()?;
        let epsg = grid.epsg();

        let ids = apply_subset(grid.tile_ids(), self.layer.subset.as_deref());
        let aou = grid.area_of_use();
        info!(
            "{}/{}: {} candidate tiles on grid {} covering ({}, {})..({}, {}), destination {}",
            self.layer.dataset,
            self.layer.version,
            ids.len(),
            grid.name(),
            aou.left,
            aou.bottom,
            aou.right,
            aou.top,
            self.options.target
        );

        let local_sources = self.prefetch_sources()?;
        let mut sources = Vec::with_capacity(local_sources.len());
        for path in &local_sources {
            sources.push(SourceDescriptor::open(path)?);
        }
        let source_bounds: Vec<_> = sources
            .iter()
            .map(|s| s.bounds_in(epsg))
            .collect::<Result<_>>()?;

        let mut tiles = Vec::with_capacity(ids.len());
        for id in ids {
            let bounds = grid.bounds_of(&id)?;
            let profile = RasterProfile::for_tile(
                &grid,
                &bounds,
                self.layer.dtype,
                self.layer.nodata.clone(),
                self.layer.compression,
                self.layer.band_count,
            );
            let mut tile = Tile::new(id, bounds, profile, &self.config.work_root);
            if !source_bounds.iter().any(|b| b.intersects(&tile.bounds)) {
                tile.status = TileStatus::SkippedNoIntersection;
            }
            tiles.push(tile);
        }

        if !self.layer.overwrite {
            filter_existing(&mut tiles, self.storage.as_ref(), self.layer, epsg)?;
        }

        let pending = tiles
            .iter()
            .filter(|t| t.status == TileStatus::Pending)
            .count();
        let (tile_workers, co_workers) = self.config.worker_split(pending);
        let budget = self.config.memory_per_worker(tile_workers);
        info!(
            "{} tiles to transform: {} tile workers x {} window co-workers, {} MB each",
            pending,
            tile_workers,
            co_workers,
            budget / (1024 * 1024)
        );

        let engine = TileTransformEngine::new(self.layer, &grid)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(tile_workers)
            .build()
            .map_err(|e| crate::error::Error::Processing(format!("tile pool: {}", e)))?;
        pool.install(|| {
            tiles
                .par_iter_mut()
                .filter(|t| t.status == TileStatus::Pending)
                .for_each(|tile| {
                    engine.run(tile, &sources, co_workers, budget);
                });
        });

        self.upload_tiles(&mut tiles, epsg);
        let summary = partition(&tiles);
        self.postprocess(&grid, &tiles, &summary)?;
        for tile in &tiles {
            tile.cleanup();
        }

        info!(
            "done: {} processed, {} skipped, {} pre-existing, {} failed",
            summary.processed.len(),
            summary.skipped.len(),
            summary.existing.len(),
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Download each unique remote source once, before any tile work, so
    /// concurrent tiles never race on the same transfer.
    fn prefetch_sources(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        let source_dir = self.config.work_root.join("sources");
        for (i, uri) in self.layer.sources.iter().enumerate() {
            if !seen.insert(uri.clone()) {
                continue;
            }
            match split_remote(uri) {
                Some((_, _, key)) => {
                    let name = key.rsplit('/').next().unwrap_or(key);
                    let dest = source_dir.join(format!("src_{}_{}", i, name));
                    info!("fetching {}", uri);
                    fetch(uri, &dest)?;
                    paths.push(dest);
                }
                None => {
                    let path = uri.strip_prefix("file://").unwrap_or(uri);
                    paths.push(PathBuf::from(path));
                }
            }
        }
        Ok(paths)
    }

    fn upload_tiles(&self, tiles: &mut [Tile], epsg: u32) {
        for tile in tiles.iter_mut() {
            if tile.status != TileStatus::Processed {
                continue;
            }
            for artifact in &tile.artifacts {
                let key = match artifact_key(self.layer, epsg, artifact) {
                    Some(key) => key,
                    None => {
                        warn!("artifact {:?} of tile {} has no file name", artifact, tile.id);
                        tile.status = TileStatus::Failed;
                        break;
                    }
                };
                if let Err(e) = self.storage.upload(artifact, &key) {
                    warn!("upload of tile {} failed: {}", tile.id, e);
                    tile.status = TileStatus::Failed;
                    break;
                }
            }
        }
    }

    /// Mosaic + extent metadata over the tiles that ended up at the
    /// destination.
    fn postprocess(&self, grid: &Grid, tiles: &[Tile], summary: &Summary) -> Result<()> {
        let mut contributing: Vec<&str> = summary.processed.iter().map(String::as_str).collect();
        if !self.layer.skip_existing_artifacts {
            contributing.extend(summary.existing.iter().map(String::as_str));
        }
        if contributing.is_empty() {
            info!("no tiles at destination; skipping mosaic and extent metadata");
            return Ok(());
        }

        let mut entries = Vec::with_capacity(contributing.len());
        for id in &contributing {
            entries.push((id.to_string(), grid.bounds_of(id)?));
        }

        let profile = tiles
            .iter()
            .find(|t| contributing.contains(&t.id.as_str()))
            .map(|t| t.profile.clone());
        let metadata_dir = self.config.work_root.join("metadata");
        std::fs::create_dir_all(&metadata_dir)?;
        let epsg = grid.epsg();
        let prefix = self.layer.prefix(epsg);

        if let Some(profile) = profile {
            let sources: Vec<vrt::MosaicSource> = entries
                .iter()
                .map(|(id, bounds)| vrt::MosaicSource {
                    key: format!("{}.tif", id),
                    bounds: *bounds,
                })
                .collect();
            let xml = vrt::build_vrt(&profile, &sources)?;
            let local = metadata_dir.join("all.vrt");
            std::fs::write(&local, xml)?;
            self.storage
                .upload(&local, &format!("{}/geotiff/all.vrt", prefix))?;
        }

        let grid_name = grid.name();
        let features = extent::tile_features(
            &self.layer.dataset,
            &self.layer.version,
            &grid_name,
            &entries,
        );
        let union = extent::union_extent(
            &self.layer.dataset,
            &self.layer.version,
            &grid_name,
            &entries,
        );
        for (name, value) in [("tiles.geojson", features), ("extent.geojson", union)] {
            let local = metadata_dir.join(name);
            let body = serde_json::to_vec_pretty(&value)
                .map_err(|e| crate::error::Error::Processing(format!("extent geojson: {}", e)))?;
            std::fs::write(&local, body)?;
            self.storage
                .upload(&local, &format!("{}/geotiff/{}", prefix, name))?;
        }
        Ok(())
    }
}

/// Destination key for one local artifact of a tile: keyed by file name
/// under the layer's geotiff prefix, so distinct artifacts never collide.
/// `None` for a path with no file name.
fn artifact_key(layer: &Layer, epsg: u32, artifact: &Path) -> Option<String> {
    let name = artifact.file_name()?.to_str()?;
    Some(format!("{}/geotiff/{}", layer.prefix(epsg), name))
}

/// Keep only tile ids named by the allow-list (when one is given).
pub fn apply_subset(ids: Vec<String>, subset: Option<&[String]>) -> Vec<String> {
    match subset {
        None => ids,
        Some(allow) => {
            let allow: HashSet<&str> = allow.iter().map(String::as_str).collect();
            ids.into_iter().filter(|id| allow.contains(id.as_str())).collect()
        }
    }
}

/// Mark still-pending tiles whose output already exists at the destination.
pub fn filter_existing(
    tiles: &mut [Tile],
    storage: &dyn Storage,
    layer: &Layer,
    epsg: u32,
) -> Result<()> {
    for tile in tiles.iter_mut() {
        if tile.status != TileStatus::Pending {
            continue;
        }
        if storage.exists(&layer.tile_key(epsg, &tile.id))? {
            tile.status = TileStatus::SkippedExisting;
        }
    }
    Ok(())
}

/// Partition tiles into the four terminal buckets.
pub fn partition(tiles: &[Tile]) -> Summary {
    let mut summary = Summary::default();
    for tile in tiles {
        match tile.status {
            TileStatus::Processed => summary.processed.push(tile.id.clone()),
            TileStatus::Failed => summary.failed.push(tile.id.clone()),
            TileStatus::SkippedExisting => summary.existing.push(tile.id.clone()),
            status => summary.skipped.push((tile.id.clone(), status)),
        }
    }
    summary
}
