// `slurmexport` -- Poll the Slurm status commands and print what they say as gauges
//
// Run with --help for brief help.  `slurmexport prom` prints Prometheus text exposition, either to
// stdout or atomically into a file for the node exporter's textfile collector; `slurmexport show`
// prints the parsed records as a table, CSV, or JSON.
//
// Each requested family is polled once per run.  A family whose command fails is reported, marked
// down in the exposition, and otherwise skipped; the run fails only if every family failed.

mod collect;
mod configs;
mod format;
mod prom;
mod show;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print gauges in Prometheus text exposition format
    Prom(PromArgs),

    /// Print the parsed records
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct PromArgs {
    #[command(flatten)]
    input_args: InputArgs,

    /// Write the exposition to this file, replacing it atomically [default: stdout]
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    input_args: InputArgs,

    /// Select fields for the output [default: family,key,attr,value]
    #[arg(long)]
    fmt: Option<String>,

    /// Print a header line
    #[arg(long, default_value_t = false)]
    header: bool,

    /// Print CSV instead of fixed-width columns
    #[arg(long, default_value_t = false)]
    csv: bool,

    /// Print JSON (overrides --fmt, --header, --csv)
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    meta_args: MetaArgs,
}

#[derive(Args, Debug)]
pub struct InputArgs {
    /// File containing JSON data with exporter configuration [default: none]
    #[arg(long)]
    config_file: Option<String>,

    /// Poll this family (repeatable): nodes, node_info, node_mem, cpus, filesystem, users
    /// [default: the config file's list, or all]
    #[arg(long)]
    family: Vec<String>,

    /// Read captured output from DIR/<family>.txt instead of running commands
    #[arg(long, value_name = "DIR")]
    capture_dir: Option<PathBuf>,

    /// Kill a command that has not finished after this many seconds [default: no limit]
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
pub struct MetaArgs {
    /// Print more diagnostics on stderr (repeatable)
    #[arg(long, short, action = ArgAction::Count)]
    verbose: u8,

    /// Print only errors on stderr
    #[arg(long, short, default_value_t = false)]
    quiet: bool,
}

fn main() {
    match slurmexport() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {:#}", msg);
            process::exit(1);
        }
    }
}

fn slurmexport() -> Result<()> {
    let cli = Cli::parse();

    let (input_args, meta_args) = match cli.command {
        Commands::Prom(ref a) => (&a.input_args, &a.meta_args),
        Commands::Show(ref a) => (&a.input_args, &a.meta_args),
    };

    init_logging(meta_args.verbose, meta_args.quiet);

    // Flags override the config file, which overrides the defaults.

    let config = match input_args.config_file {
        Some(ref f) => configs::read_from_json(f)?,
        None => Default::default(),
    };
    let selected = collect::select_families(if input_args.family.is_empty() {
        &config.families
    } else {
        &input_args.family
    })?;
    let timeout = input_args
        .timeout
        .or(config.timeout_secs)
        .map(Duration::from_secs);
    let settings = collect::Settings {
        config,
        capture_dir: input_args.capture_dir.clone(),
        timeout,
    };

    let now = chrono::Utc::now();
    let outcomes = collect::collect(&selected, &settings);

    match cli.command {
        Commands::Prom(ref a) => {
            let text = prom::to_prom(&outcomes, now)?;
            match a.output {
                Some(ref path) => write_atomically(path, &text)?,
                None => io::stdout().write_all(text.as_bytes())?,
            }
        }
        Commands::Show(ref a) => {
            let mut stdout = io::stdout();
            if a.json {
                show::print_json(&mut stdout, &outcomes)?;
            } else {
                show::print_table(&mut stdout, &outcomes, a.fmt.as_deref(), a.header, a.csv)?;
            }
        }
    }

    if outcomes.iter().all(|o| o.result.is_err()) {
        bail!("No family could be polled");
    }
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

// The textfile collector may read the file at any moment, so it must never see a partial one.  The
// temporary file is created next to the target so that the rename stays within one filesystem.

fn write_atomically(path: &Path, text: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Can't create temporary file in {}", dir.display()))?;
    tmp.write_all(text.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    tmp.persist(path)
        .with_context(|| format!("Can't replace {}", path.display()))?;
    Ok(())
}

#[test]
fn test_write_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slurm.prom");
    write_atomically(&path, "slurm_cpus_total 480\n").unwrap();
    write_atomically(&path, "slurm_cpus_total 512\n").unwrap();
    assert!(std::fs::read_to_string(&path).unwrap() == "slurm_cpus_total 512\n");
    assert!(std::fs::read_dir(dir.path()).unwrap().count() == 1);

    assert!(write_atomically(&dir.path().join("nope/slurm.prom"), "").is_err());
}

#[test]
fn test_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert();

    let cli = Cli::parse_from([
        "slurmexport",
        "prom",
        "--family",
        "nodes",
        "--family",
        "cpus",
        "--timeout",
        "10",
        "-vv",
        "-o",
        "/var/lib/node_exporter/slurm.prom",
    ]);
    let Commands::Prom(a) = cli.command else {
        panic!("expected prom")
    };
    assert!(a.input_args.family == vec!["nodes", "cpus"]);
    assert!(a.input_args.timeout == Some(10));
    assert!(a.meta_args.verbose == 2);
    assert!(a.output == Some(PathBuf::from("/var/lib/node_exporter/slurm.prom")));
}
