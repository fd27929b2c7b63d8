use std::process::exit;
use std::sync::Arc;
use std::thread;

use clap::{Parser, ValueEnum};
use log::{error, info};

use forcepool::{PoolConfig, PoolError, Result, ThreadPool};

/// Contact stiffness of the soft-sphere model.
const STIFFNESS: f64 = 1.0e3;
const GRAIN_RADIUS: f64 = 0.5;
const GRAIN_MASS: f64 = 1.0;
const TIME_STEP: f64 = 1.0e-3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Executor {
    /// The forcepool thread pool
    Pool,
    /// A rayon thread pool
    Rayon,
    /// One freshly spawned thread per chunk
    Naive,
}

#[derive(Parser)]
#[command(
    name = "grain-forces",
    version,
    about = "Pairwise grain force evaluation on a thread pool"
)]
struct Cli {
    /// Number of grains in the packing
    #[arg(long, default_value_t = 256)]
    grains: usize,

    /// Number of integration steps
    #[arg(long, default_value_t = 5)]
    steps: usize,

    /// Worker threads; defaults to the number of CPUs
    #[arg(long)]
    threads: Option<usize>,

    /// Grains per force task
    #[arg(long, default_value_t = 32)]
    chunk: usize,

    /// Executor that runs the force tasks
    #[arg(long, value_enum, default_value_t = Executor::Pool)]
    executor: Executor,
}

#[derive(Clone, Copy, Debug, Default)]
struct Grain {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
}

fn main() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut builder = PoolConfig::builder().thread_name_prefix("grain-forces");
    if let Some(threads) = cli.threads {
        builder = builder.num_threads(threads);
    }
    let config = builder.build()?;
    if cli.chunk == 0 {
        return Err(PoolError::InvalidConfig("chunk must be at least 1".to_string()));
    }

    info!("grain-forces {}", env!("CARGO_PKG_VERSION"));
    info!(
        "{} grains, {} steps, {} threads, executor {:?}",
        cli.grains, cli.steps, config.num_threads, cli.executor
    );

    let mut grains = initial_packing(cli.grains);
    let ranges = chunk_ranges(grains.len(), cli.chunk);

    match cli.executor {
        Executor::Pool => {
            let pool = ThreadPool::with_config(config)?;
            simulate(&mut grains, cli.steps, |snapshot| {
                pool_forces(&pool, snapshot, &ranges)
            })?;
            pool.shutdown();
        }
        Executor::Rayon => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_threads)
                .build()
                .map_err(|e| PoolError::InvalidConfig(e.to_string()))?;
            simulate(&mut grains, cli.steps, |snapshot| {
                Ok(rayon_forces(&pool, snapshot, &ranges))
            })?;
        }
        Executor::Naive => {
            simulate(&mut grains, cli.steps, |snapshot| {
                naive_forces(snapshot, &ranges)
            })?;
        }
    }

    Ok(())
}

/// Grains on a square lattice slightly tighter than contact, so they repel.
fn initial_packing(n: usize) -> Vec<Grain> {
    let side = (n as f64).sqrt().ceil().max(1.0) as usize;
    let spacing = 2.0 * GRAIN_RADIUS * 0.95;
    (0..n)
        .map(|i| {
            // Deterministic jitter keeps the packing from being perfectly symmetric.
            let jitter = ((i as f64) * 0.618_033_988_75).fract() * 0.05;
            Grain {
                x: (i % side) as f64 * spacing + jitter,
                y: (i / side) as f64 * spacing - jitter,
                ..Grain::default()
            }
        })
        .collect()
}

fn chunk_ranges(len: usize, chunk: usize) -> Vec<(usize, usize)> {
    (0..len)
        .step_by(chunk)
        .map(|start| (start, (start + chunk).min(len)))
        .collect()
}

/// Net soft-sphere force on grains `start..end` from every other grain.
fn chunk_forces(grains: &[Grain], start: usize, end: usize) -> Vec<(f64, f64)> {
    (start..end)
        .map(|i| {
            let gi = grains[i];
            grains
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .fold((0.0, 0.0), |(fx, fy), (_, gj)| {
                    let dx = gi.x - gj.x;
                    let dy = gi.y - gj.y;
                    let dist = (dx * dx + dy * dy).sqrt();
                    let overlap = 2.0 * GRAIN_RADIUS - dist;
                    if overlap <= 0.0 || dist == 0.0 {
                        return (fx, fy);
                    }
                    let magnitude = STIFFNESS * overlap;
                    (fx + magnitude * dx / dist, fy + magnitude * dy / dist)
                })
        })
        .collect()
}

fn pool_forces(
    pool: &ThreadPool,
    grains: &Arc<Vec<Grain>>,
    ranges: &[(usize, usize)],
) -> Result<Vec<(f64, f64)>> {
    let handles = ranges
        .iter()
        .map(|&(start, end)| {
            let grains = grains.clone();
            pool.submit(move || chunk_forces(&grains, start, end))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut forces = Vec::with_capacity(grains.len());
    for handle in handles {
        forces.extend(handle.join()?);
    }
    Ok(forces)
}

fn rayon_forces(
    pool: &rayon::ThreadPool,
    grains: &Arc<Vec<Grain>>,
    ranges: &[(usize, usize)],
) -> Vec<(f64, f64)> {
    use rayon::prelude::*;

    pool.install(|| {
        ranges
            .par_iter()
            .map(|&(start, end)| chunk_forces(grains, start, end))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    })
}

fn naive_forces(
    grains: &Arc<Vec<Grain>>,
    ranges: &[(usize, usize)],
) -> Result<Vec<(f64, f64)>> {
    let threads: Vec<_> = ranges
        .iter()
        .map(|&(start, end)| {
            let grains = grains.clone();
            thread::spawn(move || chunk_forces(&grains, start, end))
        })
        .collect();

    let mut forces = Vec::with_capacity(grains.len());
    for worker in threads {
        let chunk = worker
            .join()
            .map_err(|_| PoolError::TaskFailed("force thread panicked".to_string()))?;
        forces.extend(chunk);
    }
    Ok(forces)
}

/// Explicit Euler integration; prints the kinetic energy after each step.
fn simulate<F>(grains: &mut [Grain], steps: usize, mut forces: F) -> Result<()>
where
    F: FnMut(&Arc<Vec<Grain>>) -> Result<Vec<(f64, f64)>>,
{
    for step in 1..=steps {
        let snapshot = Arc::new(grains.to_vec());
        let step_forces = forces(&snapshot)?;

        let mut kinetic = 0.0;
        for (grain, (fx, fy)) in grains.iter_mut().zip(step_forces) {
            grain.vx += fx / GRAIN_MASS * TIME_STEP;
            grain.vy += fy / GRAIN_MASS * TIME_STEP;
            grain.x += grain.vx * TIME_STEP;
            grain.y += grain.vy * TIME_STEP;
            kinetic += 0.5 * GRAIN_MASS * (grain.vx * grain.vx + grain.vy * grain.vy);
        }
        println!("step {step} kinetic_energy={kinetic:.9}");
    }
    Ok(())
}
