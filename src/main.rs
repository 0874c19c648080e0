use std::path::PathBuf;
use std::process;

use a2a_contractor::config::ContractorPar;
use a2a_contractor::contractor::Contractor;
use a2a_contractor::error::Error;
use a2a_contractor::group::mpi::MpiGroup;
use a2a_contractor::group::ProcessGroup;
use a2a_contractor::output::JsonResultWriter;
use clap::Parser;
use flexi_logger::{json_format, Duplicate, FileSpec, FlexiLoggerError, Logger, LoggerHandle};
use log::{error, info, LevelFilter};

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Contracts A2A matrix series into time correlators.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON parameter file.
    parameters: PathBuf,
    /// Level of the per-rank log files.
    #[arg(short, long, value_enum, default_value_t = LogLevel::Debug)]
    log_level: LogLevel,
    /// Directory of the per-rank log files.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
    /// Only log to files, not to stdout.
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Starts the JSON logger of `rank`, writing to
    /// `<log_dir>/a2a-contractor_rank<rank>.log.json`.
    fn start_rank_logger(&self, rank: usize) -> Result<LoggerHandle, FlexiLoggerError> {
        let stdout = if self.quiet {
            Duplicate::None
        } else {
            Duplicate::Info
        };
        let files = FileSpec::default()
            .directory(&self.log_dir)
            .basename(env!("CARGO_PKG_NAME"))
            .discriminant(format!("rank{rank}"))
            .suppress_timestamp()
            .suffix("log.json");
        Logger::with(LevelFilter::from(self.log_level))
            .format(json_format)
            .log_to_file(files)
            .duplicate_to_stdout(stdout)
            .start()
    }
}

/// Logs `err` together with the stage it happened in and terminates all ranks.
fn fail(group: &MpiGroup, stage: &str, err: Error) -> ! {
    error!(stage, rank = group.rank(); "{stage} failed: {err}");
    eprintln!("error in {stage}: {err}");
    log::logger().flush();
    if group.size() > 1 {
        group.abort(1)
    }
    process::exit(1)
}

fn main() {
    let args = Cli::parse();

    let Some(universe) = mpi::initialize() else {
        eprintln!("MPI was initialized twice");
        process::exit(1)
    };
    let group = MpiGroup::new(universe.world());
    let rank = group.rank();
    let size = group.size();
    let _logger = match args.start_rank_logger(rank) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("can not set up logging: {err}");
            process::exit(1)
        }
    };
    info!(rank, size; "Logging setup");

    let par = ContractorPar::from_file(&args.parameters)
        .unwrap_or_else(|err| fail(&group, "configuration", err));
    let mut writer = JsonResultWriter::new(&par.global.output);
    let mut contractor =
        Contractor::new(par, &group).unwrap_or_else(|err| fail(&group, "configuration", err));

    let trajectories = contractor.par().global.traj_counter;
    let products = contractor.par().product.clone();
    for traj in trajectories.iter() {
        info!(traj; "Trajectory");
        if let Err(err) = contractor.import_trajectory(traj) {
            fail(&group, "tensor import", err);
        }
        for product in &products {
            if let Err(err) = contractor.run_product(product, traj, &mut writer) {
                let stage = match err {
                    Error::Sink(_) => "output",
                    Error::Config(_) => "configuration",
                    _ => "contraction",
                };
                fail(&group, stage, err);
            }
        }
    }
    info!(rank; "Done");
}
