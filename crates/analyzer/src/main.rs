//! sift CLI
//!
//! Flat command line over the analyzer driver: a list of C sources plus
//! the engine flags. Diagnostics go to stderr, one per line. Exit code
//! 0 means the analysis completed (findings or not), 1 is a fatal
//! internal error, 2 is a memory-budget abort.

use clap::{CommandFactory, Parser as ClapParser, ValueEnum};
use clap_complete::{Shell, generate};
use sift::engine::{Config, Project};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProjectArg {
    None,
    Kernel,
    Wine,
}

impl From<ProjectArg> for Project {
    fn from(p: ProjectArg) -> Project {
        match p {
            ProjectArg::None => Project::None,
            ProjectArg::Kernel => Project::Kernel,
            ProjectArg::Wine => Project::Wine,
        }
    }
}

#[derive(ClapParser)]
#[command(name = "sift")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "sift - static analysis for C", long_about = None)]
struct Cli {
    /// Project profile; gates checker families and primitive names
    #[arg(long, value_enum, default_value = "none")]
    project: ProjectArg,

    /// Emit info: rows useful for building summaries
    #[arg(long)]
    info: bool,

    /// Enable high-noise checkers
    #[arg(long)]
    spammy: bool,

    /// Disable the summary database; analyze functions in isolation
    #[arg(long)]
    no_db: bool,

    /// Abort once the process VmSize exceeds this many kilobytes
    #[arg(long, value_name = "N")]
    oom_kb: Option<u64>,

    /// Run a populate pass before the reporting pass
    #[arg(long)]
    two_pass: bool,

    /// Persist the summary database to this file across invocations
    #[arg(long, value_name = "PATH")]
    db_file: Option<PathBuf>,

    /// Generate shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,

    /// C source files to analyze. Unrecognized flags are tolerated for
    /// command-line compatibility and warned about.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    inputs: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "sift", &mut io::stdout());
        return;
    }

    // Anything flag-shaped we did not recognize would have gone to the
    // bundled parser in the original; this front end takes no flags.
    let mut files = Vec::new();
    for input in &cli.inputs {
        if input.starts_with('-') {
            eprintln!("sift: ignoring unrecognized option '{}'", input);
        } else {
            files.push(PathBuf::from(input));
        }
    }

    if files.is_empty() {
        eprintln!("sift: no input files");
        process::exit(1);
    }

    let cfg = Config {
        project: cli.project.into(),
        info: cli.info,
        spammy: cli.spammy,
        no_db: cli.no_db,
        // The budget defaults to roughly 800 MB of VmSize.
        oom_kb: cli.oom_kb.or(Some(800 * 1024)),
        two_pass: cli.two_pass,
        db_file: cli.db_file,
    };

    match sift::analyze_files(cfg, &files) {
        Ok(eng) if eng.oom_hit => process::exit(2),
        Ok(_) => {}
        Err(e) => {
            eprintln!("sift: {}", e);
            process::exit(1);
        }
    }
}
