//! landchange CLI - land-cover change detection from yearly composites

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gdal::Metadata;
use std::path::PathBuf;
use std::time::Instant;

use landchange::io::raster::{open_raster, read_band, read_grid};
use landchange::types::nan_mean;
use landchange::{
    run_detection, run_indices, DetectionMethod, DetectionRequest, ProjectConfig,
};

#[derive(Parser)]
#[command(name = "landchange")]
#[command(author, version, about = "Land-cover change detection from Sentinel-2 composites", long_about = None)]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute NDVI/NDBI/NDWI/BSI stacks for every yearly composite
    Indices {
        /// Directory with <prefix>_<YYYY>.tif composites
        #[arg(long)]
        raw_dir: Option<PathBuf>,

        /// Output directory for indices_<YYYY>.tif
        #[arg(long)]
        processed_dir: Option<PathBuf>,
    },
    /// Compare two years of index stacks
    Detect {
        /// First year
        #[arg(long)]
        start: i32,

        /// Second year
        #[arg(long)]
        end: i32,

        /// Method (difference, rules, anomaly, all)
        #[arg(short, long, default_value = "all")]
        method: String,

        /// Absolute index change counted as gain or loss
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Directory with indices_<YYYY>.tif, also receives the outputs
        #[arg(long)]
        processed_dir: Option<PathBuf>,

        /// Study-area boundary vector
        #[arg(long)]
        boundary: Option<PathBuf>,
    },
    /// Show information about a raster file
    Inspect {
        /// Input raster file
        input: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ProjectConfig> {
    match path {
        Some(path) => ProjectConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(ProjectConfig::default()),
    }
}

fn inspect(input: &PathBuf) -> Result<()> {
    let dataset = open_raster(input).context("Failed to open raster")?;
    let grid = read_grid(&dataset)?;
    let gt = grid.geo_transform;

    println!("File: {}", input.display());
    println!(
        "Dimensions: {} x {} ({} band(s))",
        grid.width, grid.height, grid.band_count
    );
    if !grid.crs_wkt.is_empty() {
        println!("CRS: {}", grid.crs_wkt);
    }
    println!("Origin: ({:.3}, {:.3})", gt.top_left_x, gt.top_left_y);
    println!("Pixel size: {} x {}", gt.pixel_width, gt.pixel_height);
    if let Some(nodata) = grid.nodata {
        println!("NoData: {}", nodata);
    }
    if let Some(description) = dataset.metadata_item("DESCRIPTION", "") {
        println!("Description: {}", description);
    }

    for band_number in 1..=grid.band_count as isize {
        let label = dataset
            .rasterband(band_number)?
            .description()
            .unwrap_or_default();
        let band = read_band(&dataset, band_number)?;
        let valid = band.iter().filter(|v| v.is_finite()).count();
        let min = band.iter().copied().filter(|v| v.is_finite()).fold(f64::NAN, f64::min);
        let max = band.iter().copied().filter(|v| v.is_finite()).fold(f64::NAN, f64::max);
        println!("\nBand {} {}", band_number, label);
        println!("  Min: {:.4}", min);
        println!("  Max: {:.4}", max);
        println!("  Mean: {:.4}", nan_mean(band.iter().copied()));
        println!(
            "  Valid cells: {} ({:.1}%)",
            valid,
            100.0 * valid as f64 / band.len().max(1) as f64
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Indices {
            raw_dir,
            processed_dir,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(dir) = raw_dir {
                config.raw_dir = dir;
            }
            if let Some(dir) = processed_dir {
                config.processed_dir = dir;
            }

            let start = Instant::now();
            let report = run_indices(&config).context("Index computation failed")?;
            for (source, reason) in &report.failed {
                eprintln!("Failed: {}: {}", source.display(), reason);
            }
            if report.processed.is_empty() {
                anyhow::bail!(
                    "No composites processed from {}",
                    config.raw_dir.display()
                );
            }
            for (year, means) in &report.processed {
                println!(
                    "{}: NDVI {:.3} NDBI {:.3} NDWI {:.3} BSI {:.3}",
                    year, means.ndvi, means.ndbi, means.ndwi, means.bsi
                );
            }
            println!("  Processing time: {:.2?}", start.elapsed());
        }

        Commands::Detect {
            start,
            end,
            method,
            threshold,
            processed_dir,
            boundary,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(t) = threshold {
                config.difference.threshold = t;
            }
            if let Some(dir) = processed_dir {
                config.processed_dir = dir;
            }
            if let Some(path) = boundary {
                config.boundary_path = path;
            }
            config.validate()?;

            let request = DetectionRequest {
                start_year: start,
                end_year: end,
                method: method.parse::<DetectionMethod>()?,
            };

            let timer = Instant::now();
            let report = run_detection(&config, &request).context("Change detection failed")?;

            if let Some(d) = &report.difference {
                println!(
                    "Difference: gain {:.1}%, loss {:.1}% of {} valid px",
                    d.gain_percent(),
                    d.loss_percent(),
                    d.valid_pixels
                );
            }
            if let Some(r) = &report.rules {
                println!(
                    "Rules: {:.2} ha changed of {:.2} ha analysed, net vegetation {:+.2} ha",
                    r.changed_area_ha(),
                    r.analysed_area_ha(),
                    r.net_vegetation_change_ha()
                );
            }
            if let Some(a) = &report.anomaly {
                println!(
                    "Anomaly: {} strong positive, {} strong negative of {} valid px",
                    a.strong_positive, a.strong_negative, a.valid_pixels
                );
            }
            for output in &report.outputs {
                println!("Saved to: {}", output.display());
            }
            println!("  Processing time: {:.2?}", timer.elapsed());
        }

        Commands::Inspect { input } => inspect(&input)?,
    }

    Ok(())
}
