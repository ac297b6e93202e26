use std::path::PathBuf;
use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use stencilgen::algebra::Canonical;
use stencilgen::config::load_problem;
use stencilgen::emit::{listing, write_file, Format, Program};
use stencilgen::problem::generate_batch;

#[derive(Debug, Parser)]
#[clap(version, about = "Generates ordered finite-difference kernels from equations in Einstein notation")]
struct Opts {
    /// Problem files (TOML)
    #[clap(required = true)]
    problems: Vec<PathBuf>,

    /// Directory the encoded programs are written to
    #[clap(short, long, default_value = ".")]
    output: PathBuf,

    /// Encoding of the written programs: cbor or msgpack
    #[clap(short, long, default_value = "cbor")]
    format: Format,

    /// Print a listing of every generated kernel
    #[clap(short, long)]
    listing: bool,

    /// Number of worker threads (0 uses one per core)
    #[clap(short = 'j', long, default_value = "0")]
    threads: usize,

    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

fn run(opts: Opts) -> stencilgen::error::Result<bool> {
    let problems = opts
        .problems
        .iter()
        .map(load_problem)
        .collect::<stencilgen::error::Result<Vec<_>>>()?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.threads)
        .build()
        .map_err(|e| stencilgen::error::Error::Config(e.to_string()))?;

    let results = pool.install(|| generate_batch(&problems, &Canonical));
    let mut failed = 0;

    for (problem, result) in problems.iter().zip(results) {
        match result {
            Ok(blocks) => {
                let program = Program { problem: &problem.name, blocks: &blocks };
                if opts.listing {
                    print!("{}", listing(&program));
                }
                write_file(&program, opts.format, &opts.output)?;
            }
            Err(e) => {
                error!("{}: {}", problem.name, e);
                failed += 1;
            }
        }
    }
    info!("{} of {} problems generated", problems.len() - failed, problems.len());
    Ok(failed == 0)
}

fn main() {
    let opts = Opts::parse();

    if let Err(e) = SimpleLogger::new().with_level(opts.log_level).init() {
        eprintln!("{}", e);
    }
    match run(opts) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
