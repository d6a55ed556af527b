//! Demo app: particles drifting in a box, re-bucketed into a spatial grid every step.
//!
//! Environment variables:
//!
//! - `SPATIAL_POINTS` - number of particles (default: 100000).
//! - `SPATIAL_ITERATIONS` - number of simulation steps (default: 20).
//! - `SPATIAL_RADIUS` - neighbour search radius, also the cell size (default: 0.5).
//! - `CELLGRID_THREADS` - worker threads (default: number of hardware threads).
//!
//! ```sh
//! SPATIAL_POINTS=200000 CELLGRID_THREADS=8 cargo run --example spatial_demo --release
//! ```
use cellgrid::{parallel_for, PoolConfig, SpatialGrid, ThreadPool};
use rand::prelude::*;
use std::env;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

const BOX_SIZE: f32 = 40.0;
const STEP: f32 = 0.05;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn main() -> Result<(), Box<dyn Error>> {
    let count: usize = env_or("SPATIAL_POINTS", 100_000);
    let iterations: usize = env_or("SPATIAL_ITERATIONS", 20);
    let radius: f32 = env_or("SPATIAL_RADIUS", 0.5);

    let pool = ThreadPool::with_config(PoolConfig::from_env())?;
    println!(
        "{} points, {} iterations, radius {}, {} threads",
        count,
        iterations,
        radius,
        pool.thread_count()
    );

    let mut rng = StdRng::seed_from_u64(42);
    let mut points: Vec<[f32; 3]> = (0..count)
        .map(|_| {
            [
                rng.gen_range(0.0..BOX_SIZE),
                rng.gen_range(0.0..BOX_SIZE),
                rng.gen_range(0.0..BOX_SIZE),
            ]
        })
        .collect();
    let mut grid = SpatialGrid::new(radius, count)?;

    for step in 0..iterations {
        for p in points.iter_mut() {
            for c in p.iter_mut() {
                *c = (*c + rng.gen_range(-STEP..STEP)).clamp(0.0, BOX_SIZE);
            }
        }

        let start = Instant::now();
        grid.build(&pool, &points)?;
        let built = start.elapsed();

        let pairs = AtomicUsize::new(0);
        parallel_for(&pool, points.len(), |i| {
            let n = grid.neighbors(&points, points[i], radius).len();
            // Every point finds itself.
            pairs.fetch_add(n - 1, Ordering::Relaxed);
        })?;

        println!(
            "step {:>3}: build {:>8.2?}, total {:>8.2?}, neighbour pairs {}",
            step,
            built,
            start.elapsed(),
            pairs.load(Ordering::Relaxed) / 2
        );
    }

    pool.terminate();
    Ok(())
}
