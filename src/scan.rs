//! Scan runner: the hosting caller of the inference core. Builds the
//! registry, fans images out across worker threads and persists the
//! `(overlay, result)` pair for each.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::ScanConfig;
use crate::detection::InferenceResult;
use crate::image_input::collect_images_from_sources;
use crate::registry::{default_registry, ModelRegistry};
use crate::summary::SizePolicy;

/// Persisted record for one scanned image: the result document plus
/// artifact locations.
#[derive(Debug, Serialize)]
pub struct ScanRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,
    pub result: InferenceResult,
}

/// Process all configured sources. Returns the number of successfully
/// processed images.
pub fn run_scan(config: ScanConfig) -> Result<usize> {
    let scan_start = Instant::now();

    let images = collect_images_from_sources(&config.sources, config.strict)?;
    if images.is_empty() {
        warn!("No valid images found to process");
        return Ok(0);
    }
    info!("🎯 Found {} image(s) to process", images.len());

    let registry = default_registry(
        &config.model_dir,
        &config.device,
        config.params.clone(),
        SizePolicy::default(),
    );

    // load once up front so a bad model fails before any image work starts
    registry
        .ensure_loaded(&config.model)
        .with_context(|| format!("loading model '{}'", config.model))?;

    let outcomes: Vec<(PathBuf, Result<f64>)> = images
        .par_iter()
        .map(|path| (path.clone(), process_one(&registry, &config, path)))
        .collect();

    let mut successful = 0usize;
    let mut failed = 0usize;
    for (path, outcome) in outcomes {
        match outcome {
            Ok(elapsed) => {
                successful += 1;
                info!("✅ Processed {} in {:.1}ms", path.display(), elapsed);
            }
            Err(e) => {
                failed += 1;
                if config.strict {
                    return Err(e.context(format!("failed to process {}", path.display())));
                }
                warn!("⚠️  Failed to process {}: {e:#}", path.display());
            }
        }
    }

    info!(
        "✅ Processed {} image(s) in {:.1}s",
        successful,
        scan_start.elapsed().as_secs_f64()
    );
    if failed > 0 {
        warn!("⚠️  {} of {} images failed to process", failed, images.len());
    }

    Ok(successful)
}

fn process_one(registry: &ModelRegistry, config: &ScanConfig, path: &Path) -> Result<f64> {
    let started = Instant::now();

    let image = image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_rgb8();
    let (overlay, result) = registry.predict(&config.model, &image)?;

    let output_dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| path.parent().unwrap_or(Path::new(".")).to_path_buf());
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "scan".to_string());

    let overlay_path = if config.save_overlay {
        let overlay_path = output_dir.join(format!("{stem}-overlay.jpg"));
        overlay
            .save(&overlay_path)
            .with_context(|| format!("saving overlay {}", overlay_path.display()))?;
        Some(overlay_path)
    } else {
        None
    };

    let record = ScanRecord {
        timestamp: Utc::now(),
        source: path.display().to_string(),
        overlay: overlay_path.as_ref().map(|p| p.display().to_string()),
        result,
    };

    let result_path = output_dir.join(format!("{stem}-result.json"));
    std::fs::write(&result_path, serde_json::to_string_pretty(&record)?)
        .with_context(|| format!("writing result {}", result_path.display()))?;

    log::debug!(
        "📊 {} detection(s) → {}",
        record.result.summary.num_detections,
        result_path.display()
    );

    Ok(started.elapsed().as_secs_f64() * 1000.0)
}
