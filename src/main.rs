//! Voxflow CLI - Sampling Pipelines for Volumetric Data
//!
//! Runs a demonstration pipeline over a synthetic volume.

use anyhow::{bail, Context, Result};
use log::info;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use voxflow::config::{PipelineConfig, RoiConfig};
use voxflow::prelude::*;

const VOLUME: usize = 64;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        return Ok(());
    }

    match args[1].as_str() {
        "spec" => show_spec(&load_config(args.get(2))?),
        "sample" => {
            let (path, iterations) = parse_sample_args(&args[2..])?;
            sample(&load_config(path)?, iterations)
        }
        "help" | "--help" | "-h" => {
            print_usage(&args[0]);
            Ok(())
        }
        other => {
            print_usage(&args[0]);
            bail!("unknown command: {}", other)
        }
    }
}

fn print_usage(program: &str) {
    println!("Voxflow v{}", voxflow::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  spec [config.toml]                   Print what the demo pipeline provides");
    println!("  sample [config.toml] [-n <count>]    Draw batches from the demo pipeline");
    println!("  help                                 Show this help message");
    println!();
    println!("Set RUST_LOG=debug to trace individual requests.");
}

fn parse_sample_args(args: &[String]) -> Result<(Option<&String>, usize)> {
    let mut path = None;
    let mut iterations = 10;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-n" | "--iterations" => {
                let value = args.get(i + 1).context("missing value for --iterations")?;
                iterations = value.parse().with_context(|| format!("invalid iteration count '{}'", value))?;
                i += 2;
            }
            _ => {
                path = Some(&args[i]);
                i += 1;
            }
        }
    }
    Ok((path, iterations))
}

fn load_config(path: Option<&String>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path)),
        None => Ok(default_config()),
    }
}

fn default_config() -> PipelineConfig {
    let roi = || RoiConfig {
        offset: vec![0, 0, 0],
        shape: vec![16, 16, 16],
    };
    let mut config = PipelineConfig {
        seed: Some(1),
        ..Default::default()
    };
    config.random_location.min_masked = 0.5;
    config.random_location.mask = Some(ArrayKey::new("MASK"));
    config.random_location.ensure_nonempty = Some(PointsKey::new("SYN"));
    config.precache.cache_size = 8;
    config.precache.num_workers = 4;
    config.request.arrays.insert("RAW".to_string(), roi());
    config.request.arrays.insert("MASK".to_string(), roi());
    config.request.points.insert("SYN".to_string(), roi());
    config
}

/// A 64^3 volume with a smooth intensity ramp, a spherical mask and a few
/// points scattered inside the sphere.
fn synthetic_source(seed: u64) -> MemorySource {
    let center = VOLUME as f64 / 2.0;
    let radius = VOLUME as f64 / 3.0;
    let inside = |z: f64, y: f64, x: f64| {
        let d = (z - center).powi(2) + (y - center).powi(2) + (x - center).powi(2);
        d.sqrt() < radius
    };

    let raw = Array3::from_shape_fn((VOLUME, VOLUME, VOLUME), |(z, y, x)| ((z + y + x) * 255 / (3 * VOLUME)) as u8);
    let mask = Array3::from_shape_fn((VOLUME, VOLUME, VOLUME), |(z, y, x)| inside(z as f64, y as f64, x as f64) as u8);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut points = PointSet::new();
    while points.len() < 20 {
        let p = [
            rng.gen_range(0..VOLUME as i64),
            rng.gen_range(0..VOLUME as i64),
            rng.gen_range(0..VOLUME as i64),
        ];
        if inside(p[0] as f64, p[1] as f64, p[2] as f64) {
            points.insert(points.len() as u64, Point::new(p));
        }
    }

    let roi = Roi::new([0, 0, 0], [VOLUME as i64; 3]);
    let spec = |interpolatable| ArraySpec::provided(Some(roi.clone()), Coordinate::splat(3, 1), DataType::Uint8, interpolatable);
    MemorySource::new("synthetic")
        .with_array(ArrayKey::new("RAW"), Array::new(spec(true), ArrayData::Uint8(raw.into_dyn())))
        .with_array(ArrayKey::new("MASK"), Array::new(spec(false), ArrayData::Uint8(mask.into_dyn())))
        .with_points(PointsKey::new("SYN"), roi.clone(), points)
}

fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let request = config.request.to_request()?;
    let factory = {
        let request = request.clone();
        move || request.clone()
    };

    let pipeline = Pipeline::new(synthetic_source(config.seed.unwrap_or(0)))
        + Normalize::new(ArrayKey::new("RAW"))
        + RandomLocation::from_config(config.random_location());
    Ok(pipeline.precache(config.precache.to_options(), factory))
}

fn show_spec(config: &PipelineConfig) -> Result<()> {
    let mut pipeline = build_pipeline(config)?;
    pipeline.setup()?;
    println!("{}", serde_json::to_string_pretty(pipeline.spec())?);
    pipeline.teardown();
    Ok(())
}

fn sample(config: &PipelineConfig, iterations: usize) -> Result<()> {
    let request = config.request.to_request()?;
    if request.is_empty() {
        bail!("the configuration requests nothing");
    }

    let mut pipeline = build_pipeline(config)?;
    pipeline.setup()?;

    let start = Instant::now();
    for i in 0..iterations {
        let batch = pipeline.request_batch(request.clone())?;
        let mut line = format!("batch {:>3} [{}]", i, batch.id);
        for (key, array) in &batch.arrays {
            if let Some((lo, hi)) = array.data.min_max() {
                line.push_str(&format!(" {}=[{:.3}, {:.3}]", key, lo, hi));
            }
        }
        for (key, points) in &batch.points {
            line.push_str(&format!(" {}={} point(s)", key, points.len()));
        }
        println!("{}", line);
    }
    info!(
        "{} batch(es) in {:.2?} ({:.2?} per batch)",
        iterations,
        start.elapsed(),
        start.elapsed() / iterations.max(1) as u32
    );

    pipeline.teardown();
    Ok(())
}
