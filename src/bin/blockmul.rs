//! Experiment runner comparing the multiplication paths of a block operator.
//!
//! The primary process, the "orchestrator," iterates through a range of grid
//! sizes. For each size it spawns one isolated "worker" child process per
//! variant:
//!
//! - `dense`: materializes the operator once and runs a plain dense GEMV;
//! - `general`: the per-block algorithm used for irregular partitions;
//! - `strided`: the reshaped, parallel algorithm used for uniform partitions.
//!
//! Each worker builds the Matérn-5/2 Gramian of a deterministic point cloud,
//! times `reps` multiplications and prints a single CSV row with the timing and
//! its peak RSS, which is why every variant runs in its own process. The
//! orchestrator aggregates those rows into the output CSV file.

use anyhow::{Context, Result, anyhow};
use blockop::{
    BlockFactorization,
    algorithms::multiply,
    gramian::{Evaluation, GramianOptions, PointSet, blocked_gramian},
    kernels::{IsotropicKernel, Matern52},
    utils::perf::get_peak_rss_kb,
};
use clap::{Parser, ValueEnum};
use faer::{
    Accum, Col, Par,
    dyn_stack::{MemBuffer, MemStack},
    linalg::matmul::matmul,
};
use serde::{Deserialize, Serialize};
use std::{
    hint::black_box,
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

/// Environment variable to differentiate between orchestrator and worker processes.
/// If this is set, the process runs in worker mode for the specified variant.
const VARIANT_ENV_VAR: &str = "BLOCKMUL_VARIANT";

#[derive(ValueEnum, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Copy)]
#[serde(rename_all = "kebab-case")]
enum Variant {
    Dense,
    General,
    Strided,
}

impl Variant {
    fn as_str(self) -> &'static str {
        match self {
            Variant::Dense => "dense",
            Variant::General => "general",
            Variant::Strided => "strided",
        }
    }
}

/// Command-line arguments for the main orchestrator process.
#[derive(Parser, Debug)]
#[clap(
    name = "blockmul",
    about = "Compares dense, general and strided block operator multiplication."
)]
struct OrchestratorArgs {
    /// Number of points per block (the block size).
    #[clap(long)]
    block_size: usize,
    /// The starting number of block rows (and columns).
    #[clap(long)]
    nblocks_start: usize,
    /// The ending number of block rows (and columns).
    #[clap(long)]
    nblocks_end: usize,
    /// The step size for increasing the number of blocks.
    #[clap(long, default_value_t = 1)]
    nblocks_step: usize,
    /// Worker threads for the strided variant. 0 uses every core.
    #[clap(long, default_value_t = 0)]
    threads: usize,
    /// Multiplications timed per run.
    #[clap(long, default_value_t = 10)]
    reps: usize,
    /// Keep kernel blocks lazy instead of storing them densely.
    #[clap(long)]
    lazy: bool,
    /// Path to the output CSV file for storing aggregated results.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Command-line arguments for the isolated worker processes.
#[derive(Parser, Debug)]
struct WorkerArgs {
    #[clap(long)]
    block_size: usize,
    #[clap(long)]
    nblocks: usize,
    #[clap(long)]
    threads: usize,
    #[clap(long)]
    reps: usize,
    #[clap(long)]
    lazy: bool,
}

/// A single row of the output CSV.
#[derive(Debug, Serialize, Deserialize)]
struct MulResult {
    variant: Variant,
    n: usize,
    block_size: usize,
    threads: usize,
    lazy: bool,
    time_per_mul_s: f64,
    rss_kb: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    if let Ok(variant_str) = std::env::var(VARIANT_ENV_VAR) {
        let variant = Variant::from_str(&variant_str, true)
            .map_err(|_| anyhow!("Invalid variant string in env var: {}", variant_str))?;
        run_worker(variant)
    } else {
        run_orchestrator()
    }
}

fn run_orchestrator() -> Result<()> {
    let args = OrchestratorArgs::parse();
    if args.block_size == 0 || args.nblocks_step == 0 {
        return Err(anyhow!("--block-size and --nblocks-step must be positive"));
    }
    log::info!("Orchestrator starting multiplication experiment...");

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create CSV writer for {:?}", &args.output))?;

    for nblocks in (args.nblocks_start..=args.nblocks_end).step_by(args.nblocks_step) {
        log::info!(
            "Processing {nblocks}x{nblocks} grid of {} point blocks",
            args.block_size
        );

        for variant in [Variant::Dense, Variant::General, Variant::Strided] {
            let mut command = Command::new(std::env::current_exe()?);
            command
                .arg("--block-size")
                .arg(args.block_size.to_string())
                .arg("--nblocks")
                .arg(nblocks.to_string())
                .arg("--threads")
                .arg(args.threads.to_string())
                .arg("--reps")
                .arg(args.reps.to_string())
                .env(VARIANT_ENV_VAR, variant.as_str())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit());
            if args.lazy {
                command.arg("--lazy");
            }
            let output = command
                .spawn()
                .with_context(|| format!("Failed to spawn worker for variant {variant:?}"))?
                .wait_with_output()?;

            if !output.status.success() {
                log::error!(
                    "Worker for {:?} with {} blocks failed with status: {}. Skipping.",
                    variant,
                    nblocks,
                    output.status
                );
                continue;
            }

            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .from_reader(output.stdout.as_slice());
            match rdr.deserialize::<MulResult>().next() {
                Some(Ok(record)) => {
                    log::info!(
                        "Worker finished. Result: variant={:?}, n={}, time={:.3e}s, rss={}KB",
                        record.variant,
                        record.n,
                        record.time_per_mul_s,
                        record.rss_kb
                    );
                    writer.serialize(&record)?;
                    writer.flush()?;
                }
                Some(Err(e)) => {
                    log::error!("Failed to parse worker output as CSV: {}. Skipping record.", e);
                }
                None => {
                    log::warn!("Worker for {:?} produced no output. Skipping record.", variant);
                }
            }
        }
    }

    log::info!(
        "Multiplication experiment complete. Results saved to {:?}.",
        &args.output
    );
    Ok(())
}

/// Points on a slowly winding curve in the plane, so that the Gramian has both
/// near and far interactions.
fn curve_points(n: usize) -> Result<PointSet> {
    let coords = (0..n)
        .flat_map(|i| {
            let t = i as f64 / n.max(1) as f64;
            [4.0 * t, (8.0 * t).sin()]
        })
        .collect();
    Ok(PointSet::new(2, coords)?)
}

fn time_reps(reps: usize, mut f: impl FnMut() -> Result<()>) -> Result<f64> {
    f()?;
    let start_time = Instant::now();
    for _ in 0..reps {
        f()?;
    }
    Ok(start_time.elapsed().as_secs_f64() / reps.max(1) as f64)
}

fn run_worker(variant: Variant) -> Result<()> {
    let args = WorkerArgs::parse();
    log::info!("Worker for {variant:?} started.");

    let n = args.nblocks * args.block_size;
    let points = curve_points(n)?;
    let options = GramianOptions {
        evaluation: if args.lazy {
            Evaluation::Lazy
        } else {
            Evaluation::Eager
        },
        jitter: 1e-6,
        ..Default::default()
    };
    let op: BlockFactorization<f64> =
        blocked_gramian(Matern52.with_lengthscale(0.5), &points, args.block_size, &options)?;
    let par = if args.threads == 1 {
        Par::Seq
    } else {
        Par::rayon(args.threads)
    };

    let rhs = Col::<f64>::from_fn(n, |i| 1.0 / (1.0 + i as f64));
    let mut out = Col::<f64>::zeros(n);

    let time_per_mul_s = match variant {
        Variant::Dense => {
            let dense = op.to_dense();
            time_reps(args.reps, || {
                matmul(
                    out.as_mut().as_mat_mut(),
                    Accum::Replace,
                    dense.as_ref(),
                    rhs.as_ref().as_mat(),
                    1.0,
                    par,
                );
                black_box(&out);
                Ok(())
            })?
        }
        Variant::General => time_reps(args.reps, || {
            multiply::general(
                op.blocks(),
                op.partition(),
                out.as_mut(),
                rhs.as_ref(),
                1.0,
                0.0,
            );
            black_box(&out);
            Ok(())
        })?,
        Variant::Strided => {
            let mut mem = MemBuffer::new(op.mul_scratch(par));
            time_reps(args.reps, || {
                op.mul_add_into(
                    out.as_mut(),
                    rhs.as_ref(),
                    1.0,
                    0.0,
                    par,
                    MemStack::new(&mut mem),
                )?;
                black_box(&out);
                Ok(())
            })?
        }
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(std::io::stdout());
    writer.serialize(MulResult {
        variant,
        n,
        block_size: args.block_size,
        threads: args.threads,
        lazy: args.lazy,
        time_per_mul_s,
        rss_kb: get_peak_rss_kb(),
    })?;
    writer.flush()?;

    log::info!("Worker for {variant:?} finished.");
    Ok(())
}
