//! u-anneal: command-line driver for the simulated annealing inversion.
//!
//! Loads an inversion from binary matrix files or a zip bundle, anneals it
//! on a thread pool (optionally across cluster ranks), and writes the best
//! solution plus a metadata summary.

use anyhow::{bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use u_annealing::completion::{
    format_duration, parse_duration, CompletionCriteria, CompoundCompletion,
    EnergyChangeCompletion, EnergyCompletion, IterationCompletion, ProgressTracking,
    SubCompletion, TimeCompletion,
};
use u_annealing::data::{ConstraintData, InversionProblem};
use u_annealing::distributed::{DistributedAnnealer, DistributedConfig, TcpCommunicator};
use u_annealing::io::{
    metadata_path, read_archive, read_matrix, read_vector, strip_bin, write_solution,
    InversionInputs, RunMetadata,
};
use u_annealing::sa::{
    AnnealState, Annealer, CoolingSchedule, NonnegativityConstraint, PerturbationFunction,
    SaConfig,
};
use u_annealing::threaded::{parse_threads, ThreadedAnnealer, ThreadedConfig};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(
    name = "u-anneal",
    version,
    about = "Simulated annealing inversion of sparse constrained least-squares systems"
)]
struct Cli {
    /// Zip file bundling a.bin, d.bin and optionally a_ineq.bin, d_ineq.bin,
    /// initial.bin and constraintRanges.csv
    #[arg(long = "zip", visible_alias = "zip-file", conflicts_with_all = ["a_matrix", "d_matrix"])]
    zip: Option<PathBuf>,

    /// Equality matrix file
    #[arg(short = 'a', long = "a-matrix-file", requires = "d_matrix")]
    a_matrix: Option<PathBuf>,

    /// Equality data vector file
    #[arg(short = 'd', long = "d-matrix-file", requires = "a_matrix")]
    d_matrix: Option<PathBuf>,

    /// Inequality matrix file
    #[arg(long = "a-ineq-matrix-file", requires = "d_ineq_matrix")]
    a_ineq_matrix: Option<PathBuf>,

    /// Inequality data vector file
    #[arg(long = "d-ineq-matrix-file", requires = "a_ineq_matrix")]
    d_ineq_matrix: Option<PathBuf>,

    /// Initial solution file (overrides one in the zip bundle)
    #[arg(short = 'i', long = "initial-state-file")]
    initial_state_file: Option<PathBuf>,

    /// Where to write the solution
    #[arg(long = "solution-file", visible_alias = "sol")]
    solution_file: PathBuf,

    /// Number of threads, or a percentage of available ones (e.g. 50%)
    #[arg(short = 't', long = "threads", visible_alias = "num-threads", default_value = "1")]
    threads: String,

    /// Round budget: N iterations, a time (10s, 1m), or <max>,<min> times
    #[arg(short = 's', long = "sub-completion")]
    sub_completion: SubCompletion,

    /// Stop after this long (ms, s, m, h; bare numbers are milliseconds)
    #[arg(long = "completion-time", value_parser = parse_duration)]
    completion_time: Option<Duration>,

    /// Stop after this many iterations
    #[arg(long = "completion-iterations")]
    completion_iterations: Option<u64>,

    /// Stop once the total energy reaches this value
    #[arg(long = "completion-energy")]
    completion_energy: Option<f64>,

    /// Stop when energy improves too slowly: <minutes>,<percent>,<diff>
    #[arg(long = "completion-delta-energy", value_parser = EnergyChangeCompletion::parse)]
    completion_delta_energy: Option<EnergyChangeCompletion>,

    /// Weight of the entropy regularizer
    #[arg(long = "smoothness-weight", default_value_t = 0.0)]
    smoothness_weight: f64,

    #[arg(long = "cooling-schedule", default_value = "fast")]
    cooling_schedule: CoolingSchedule,

    /// Divide the cooling iteration count by this factor
    #[arg(long = "slower-cooling", default_value_t = 1)]
    slower_cooling: u64,

    #[arg(long = "perturbation-function", default_value = "uniform")]
    perturbation_function: PerturbationFunction,

    /// Override the perturbation function's width, multiplier or scale
    #[arg(long = "perturbation-scale")]
    perturbation_scale: Option<f64>,

    #[arg(long = "nonnegativity", default_value = "limit_zero")]
    nonnegativity: NonnegativityConstraint,

    /// Treat every accepted state as the new best
    #[arg(long = "cur-as-best")]
    cur_as_best: bool,

    /// Multiplier applied to energy changes in the acceptance test
    #[arg(long = "energy-scale", default_value_t = 1.0)]
    energy_scale: f64,

    /// Average the threads' solutions after each round instead of keeping the best
    #[arg(long = "average")]
    average: bool,

    /// Count each round's sub-completion iterations from zero
    #[arg(long = "start-sub-iters-zero")]
    start_sub_iters_zero: bool,

    /// Write a checkpoint of the best solution at this interval
    #[arg(long = "checkpoint", value_parser = parse_duration)]
    checkpoint: Option<Duration>,

    /// CSV file receiving periodic progress snapshots
    #[arg(short = 'p', long = "progress-file")]
    progress_file: Option<PathBuf>,

    /// Master random seed
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Number of cluster ranks (processes)
    #[arg(long = "cluster-size", default_value_t = 1)]
    cluster_size: usize,

    /// This process's rank; rank 0 listens on --cluster-addr
    #[arg(long = "cluster-rank", default_value_t = 0)]
    cluster_rank: usize,

    /// Address of rank 0
    #[arg(long = "cluster-addr", default_value = "127.0.0.1:7077")]
    cluster_addr: SocketAddr,

    /// Round budget across cluster ranks (defaults to 10x the sub-completion)
    #[arg(long = "dist-sub-completion")]
    dist_sub_completion: Option<SubCompletion>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse();
    if let Err(e) = run(cli, args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, args: Vec<String>) -> anyhow::Result<()> {
    let problem = Arc::new(load_problem(&cli)?);
    info!(
        vars = problem.num_vars(),
        rows = problem.equality().nrows(),
        ineq_rows = problem.inequality().map(ConstraintData::nrows),
        ranges = problem.ranges().len(),
        "loaded inversion"
    );

    let sa_config = sa_config(&cli);
    sa_config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid annealing options")?;

    let available = std::thread::available_parallelism().map_or(1, |n| n.get());
    let threads = parse_threads(&cli.threads, available).map_err(anyhow::Error::msg)?;
    let mut config = ThreadedConfig::default()
        .with_threads(threads)
        .with_sub_completion(cli.sub_completion)
        .with_average(cli.average)
        .with_start_sub_iterations_at_zero(cli.start_sub_iters_zero);
    if let Some(interval) = cli.checkpoint {
        config = config.with_checkpoint(interval, strip_bin(&cli.solution_file));
    }
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    let (criteria, description) = completion_criteria(&cli)?;
    let (top, progress) = if cli.progress_file.is_some() {
        let p = Arc::new(ProgressTracking::new(Box::new(criteria), PROGRESS_INTERVAL));
        (Box::new(Arc::clone(&p)) as Box<dyn CompletionCriteria>, Some(p))
    } else {
        (Box::new(criteria) as Box<dyn CompletionCriteria>, None)
    };

    let mut tsa = ThreadedAnnealer::new(Arc::clone(&problem), sa_config, config)
        .context("failed to set up annealing threads")?;
    let start = tsa.initial_state();
    info!(threads, "annealing started: {}", start.energy);

    let run = Run {
        cli: &cli,
        args,
        threads,
        problem: &problem,
        criteria: &description,
    };
    if cli.cluster_size > 1 {
        let comm = if cli.cluster_rank == 0 {
            TcpCommunicator::listen(cli.cluster_addr, cli.cluster_size)?
        } else {
            TcpCommunicator::connect(
                cli.cluster_addr,
                cli.cluster_rank,
                cli.cluster_size,
                CONNECT_TIMEOUT,
            )?
        };
        let sub = cli
            .dist_sub_completion
            .unwrap_or_else(|| scale_sub_completion(cli.sub_completion, 10));
        let dist_config = DistributedConfig::default().with_sub_completion(sub);
        let mut dsa = DistributedAnnealer::new(tsa, comm, dist_config)?;
        let end = dsa.run(&start, &top).context("distributed annealing failed")?;
        if dsa.rank() != 0 {
            return Ok(());
        }
        run.write_outputs(&dsa, &end)?;
    } else {
        let end = tsa.iterate(&start, &top).context("annealing failed")?;
        run.write_outputs(&tsa, &end)?;
    }

    if let (Some(path), Some(p)) = (&cli.progress_file, &progress) {
        let names: Vec<String> = problem.ranges().iter().map(|r| r.short_name.clone()).collect();
        p.write_csv(path, &names)
            .with_context(|| format!("failed to write progress file {}", path.display()))?;
    }
    Ok(())
}

fn load_problem(cli: &Cli) -> anyhow::Result<InversionProblem> {
    let inputs = match (&cli.zip, &cli.a_matrix, &cli.d_matrix) {
        (Some(zip), _, _) => read_archive(zip)
            .with_context(|| format!("failed to read input bundle {}", zip.display()))?,
        (None, Some(a), Some(d)) => {
            let equality = load_constraint(a, d)?;
            let inequality = match (&cli.a_ineq_matrix, &cli.d_ineq_matrix) {
                (Some(a), Some(d)) => Some(load_constraint(a, d)?),
                _ => None,
            };
            InversionInputs {
                equality,
                inequality,
                initial: None,
                ranges: Vec::new(),
            }
        }
        _ => bail!("either --zip or both --a-matrix-file and --d-matrix-file are required"),
    };
    let initial = cli
        .initial_state_file
        .as_deref()
        .map(|p| {
            read_vector(p).with_context(|| format!("failed to read initial state {}", p.display()))
        })
        .transpose()?;
    Ok(inputs.into_problem(initial, cli.smoothness_weight)?)
}

fn load_constraint(a: &Path, d: &Path) -> anyhow::Result<ConstraintData> {
    let matrix = read_matrix(a).with_context(|| format!("failed to read matrix {}", a.display()))?;
    let data = read_vector(d).with_context(|| format!("failed to read data {}", d.display()))?;
    ConstraintData::new(matrix, data)
        .with_context(|| format!("{} does not match {}", d.display(), a.display()))
}

fn sa_config(cli: &Cli) -> SaConfig {
    let perturbation = match cli.perturbation_scale {
        Some(scale) => cli.perturbation_function.with_scale(scale),
        None => cli.perturbation_function,
    };
    let mut config = SaConfig::default()
        .with_cooling(cli.cooling_schedule)
        .with_slowdown(cli.slower_cooling)
        .with_perturbation(perturbation)
        .with_nonnegativity(cli.nonnegativity)
        .with_energy_scale(cli.energy_scale)
        .with_keep_current_as_best(cli.cur_as_best);
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    config
}

/// Combines every criteria given on the command line; any one of them ends
/// the run.
fn completion_criteria(cli: &Cli) -> anyhow::Result<(CompoundCompletion, String)> {
    let mut criteria = CompoundCompletion::default();
    let mut parts = Vec::new();
    if let Some(d) = cli.completion_time {
        criteria.push(Box::new(TimeCompletion::new(d)));
        parts.push(format!("time {}", format_duration(d)));
    }
    if let Some(n) = cli.completion_iterations {
        criteria.push(Box::new(IterationCompletion::new(n)));
        parts.push(format!("{n} iterations"));
    }
    if let Some(e) = cli.completion_energy {
        criteria.push(Box::new(EnergyCompletion::new(e)));
        parts.push(format!("energy {e}"));
    }
    if let Some(c) = &cli.completion_delta_energy {
        parts.push(format!("{c:?}"));
        criteria.push(Box::new(c.clone()));
    }
    if criteria.is_empty() {
        bail!(
            "at least one of --completion-time, --completion-iterations, \
             --completion-energy or --completion-delta-energy is required"
        );
    }
    Ok((criteria, parts.join("; ")))
}

fn scale_sub_completion(sub: SubCompletion, factor: u32) -> SubCompletion {
    match sub {
        SubCompletion::Iterations(n) => SubCompletion::Iterations(n.saturating_mul(u64::from(factor))),
        SubCompletion::Time(d) => SubCompletion::Time(d * factor),
        SubCompletion::VariableTime { max, min } => SubCompletion::VariableTime {
            max: max * factor,
            min: min * factor,
        },
    }
}

struct Run<'a> {
    cli: &'a Cli,
    args: Vec<String>,
    threads: usize,
    problem: &'a InversionProblem,
    criteria: &'a str,
}

impl Run<'_> {
    fn write_outputs<A: Annealer>(&self, annealer: &A, end: &AnnealState) -> anyhow::Result<()> {
        info!("annealing finished: {end}");
        let path = &self.cli.solution_file;
        write_solution(path, annealer.best_solution())
            .with_context(|| format!("failed to write solution {}", path.display()))?;

        let meta_path = metadata_path(path);
        RunMetadata {
            args: self.args.clone(),
            criteria: self.criteria.to_string(),
            threads: self.threads,
            problem: self.problem,
            energy: annealer.best_energy(),
            state: end,
        }
        .write(&meta_path)
        .with_context(|| format!("failed to write metadata {}", meta_path.display()))?;
        Ok(())
    }
}
