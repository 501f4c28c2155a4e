//! Weft CLI: new, check, build, run.

use clap::{Parser, Subcommand, ValueEnum};
use eyre::{bail, eyre, Result, WrapErr};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use weft_compiler::{check, compile, load_program, print_diagnostics, CompileOptions};
use weft_pkg::{find_manifest, load_manifest, Manifest, MANIFEST_FILE};
use weft_runtime::{Executor, RuntimeOptions, StdoutHost};
use weft_syntax::{builder::*, has_errors, Program};

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Weft dataflow language toolchain")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Explicit log level; overrides -v, -q and WEFT_LOG
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// Readable listing of the compiled program
    Ir,
    /// JSON encoding of the compiled program
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new Weft project
    New { name: String },
    /// Validate a program without running it
    Check { path: PathBuf },
    /// Compile a program and print the result
    Build {
        path: PathBuf,
        #[arg(long, value_enum, default_value_t = Emit::Ir)]
        emit: Emit,
        /// Ignore @unroll annotations
        #[arg(long)]
        no_unroll: bool,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile and run a program's entry function
    Run {
        path: PathBuf,
        /// Ignore @unroll annotations
        #[arg(long)]
        no_unroll: bool,
        /// Limit on live function activations
        #[arg(long)]
        max_activations: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet, cli.log_level);
    if let Err(e) = run(cli.command) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn setup_logging(verbose: u8, quiet: bool, log_level: Option<LogLevel>) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if let Some(level) = log_level {
        EnvFilter::new(match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        })
    } else if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::try_from_env("WEFT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Program output owns stdout.
    let formatter = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::New { name } => cmd_new(Path::new(&name)),
        Commands::Check { path } => cmd_check(&path),
        Commands::Build {
            path,
            emit,
            no_unroll,
            output,
        } => cmd_build(&path, emit, no_unroll, output.as_deref()),
        Commands::Run {
            path,
            no_unroll,
            max_activations,
        } => cmd_run(&path, no_unroll, max_activations),
    }
}

/// A program together with the settings that apply to it.
struct Target {
    program_path: PathBuf,
    manifest: Option<Manifest>,
}

impl Target {
    /// `path` is either a program file or a project directory holding a
    /// `weft.toml`. For a file, the nearest ancestor manifest supplies the
    /// settings.
    fn resolve(path: &Path) -> Result<Self> {
        if path.is_dir() {
            let manifest_path = path.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                bail!("no {} found in {}", MANIFEST_FILE, path.display());
            }
            let manifest = load_manifest(&manifest_path)?;
            return Ok(Self {
                program_path: path.join(&manifest.program),
                manifest: Some(manifest),
            });
        }
        if !path.is_file() {
            bail!("no such program: {}", path.display());
        }
        let manifest = match find_manifest(path) {
            Some(manifest_path) => {
                debug!(manifest = %manifest_path.display(), "using manifest");
                Some(load_manifest(&manifest_path)?)
            }
            None => None,
        };
        Ok(Self {
            program_path: path.to_path_buf(),
            manifest,
        })
    }

    fn load(&self) -> Result<Program> {
        load_program(&self.program_path).map_err(|diags| {
            print_diagnostics(&diags);
            eyre!("failed to load {}", self.program_path.display())
        })
    }

    fn compile_options(&self, no_unroll: bool) -> CompileOptions {
        let mut options = CompileOptions::default();
        if let Some(m) = &self.manifest {
            options.unroll = m.compile.unroll;
            options.max_expanded_copies = m.compile.max_expanded_copies;
        }
        if no_unroll {
            options.unroll = false;
        }
        options
    }

    fn runtime_options(&self, max_activations: Option<usize>) -> RuntimeOptions {
        let mut options = RuntimeOptions::default();
        if let Some(m) = &self.manifest {
            options.max_activations = m.run.max_activations;
        }
        if let Some(limit) = max_activations {
            options.max_activations = limit;
        }
        options
    }

    fn compile(&self, no_unroll: bool) -> Result<Program> {
        let program = self.load()?;
        compile(program, &self.compile_options(no_unroll)).map_err(|diags| {
            print_diagnostics(&diags);
            eyre!("compilation failed")
        })
    }
}

/// The program written by `weft new`.
fn starter_program() -> Program {
    let main = function("main").body(vec![foreach("i", int(1), int(10))
        .unroll(4)
        .body(vec![trace(vec![string("i ="), var("i")])])
        .into_stmt()]);
    Program::with_functions(vec![main])
}

fn cmd_new(dir: &Path) -> Result<()> {
    if dir.exists() {
        bail!("directory already exists: {}", dir.display());
    }
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("invalid project name: {}", dir.display()))?;
    let manifest = Manifest::new(name);
    std::fs::create_dir_all(dir).wrap_err_with(|| format!("creating {}", dir.display()))?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest.to_toml()?)?;
    let json = serde_json::to_string_pretty(&starter_program())?;
    std::fs::write(dir.join(&manifest.program), json + "\n")?;
    println!("Created project {}", name);
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let target = Target::resolve(path)?;
    let program = target.load()?;
    let diags = check(&program);
    print_diagnostics(&diags);
    if has_errors(&diags) {
        bail!("{} has errors", target.program_path.display());
    }
    println!("{}: ok", target.program_path.display());
    Ok(())
}

fn cmd_build(path: &Path, emit: Emit, no_unroll: bool, output: Option<&Path>) -> Result<()> {
    let target = Target::resolve(path)?;
    let program = target.compile(no_unroll)?;
    let text = match emit {
        Emit::Ir => program.to_string(),
        Emit::Json => serde_json::to_string_pretty(&program)? + "\n",
    };
    match output {
        Some(out) => {
            std::fs::write(out, text).wrap_err_with(|| format!("writing {}", out.display()))?;
            println!("Wrote {}", out.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn cmd_run(path: &Path, no_unroll: bool, max_activations: Option<usize>) -> Result<()> {
    let target = Target::resolve(path)?;
    let program = target.compile(no_unroll)?;
    let mut exec =
        Executor::with_options(&program, StdoutHost, target.runtime_options(max_activations))?;
    let result = exec.run();
    let stats = exec.stats();
    info!(
        steps = stats.steps,
        writes = stats.writes,
        activations = stats.activations,
        peak_activations = stats.peak_activations,
        values_allocated = stats.values_allocated,
        scopes_allocated = stats.scopes_allocated,
        "run finished"
    );
    if let Err(e) = result {
        warn!(kind = e.kind(), "run failed");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_compiler::compile_and_run;
    use weft_runtime::RecordingHost;

    fn conformance(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../conformance")
            .join(name)
    }

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("weft_cli_{}_{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn traced(target: &Target, no_unroll: bool) -> Vec<i64> {
        compile_and_run(
            target.load().unwrap(),
            &target.compile_options(no_unroll),
            target.runtime_options(None),
            RecordingHost::default(),
        )
        .unwrap()
        .traced_ints()
    }

    #[test]
    fn conformance_programs_run_with_and_without_unrolling() {
        for (name, expected) in [
            ("585-foreach-range-6.json", (5..=13).collect::<Vec<i64>>()),
            ("581-foreach-range-2.json", (1..=10).collect()),
            ("235-multiplication.json", vec![9]),
        ] {
            let target = Target::resolve(&conformance(name)).unwrap();
            for no_unroll in [false, true] {
                let mut got = traced(&target, no_unroll);
                got.sort_unstable();
                assert_eq!(got, expected, "{} (no_unroll: {})", name, no_unroll);
            }
        }
    }

    #[test]
    fn conformance_programs_pass_check() {
        for name in ["585-foreach-range-6.json", "581-foreach-range-2.json", "235-multiplication.json"] {
            assert!(cmd_check(&conformance(name)).is_ok(), "{}", name);
        }
    }

    #[test]
    fn flag_overrides_manifest() {
        let target = Target {
            program_path: PathBuf::from("main.json"),
            manifest: Some(Manifest::new("demo")),
        };
        assert!(target.compile_options(false).unroll);
        assert!(!target.compile_options(true).unroll);
        assert_eq!(target.runtime_options(Some(7)).max_activations, 7);
        assert_eq!(target.runtime_options(None).max_activations, 100_000);
    }

    #[test]
    fn new_project_builds_and_runs() {
        let dir = scratch("new");
        cmd_new(&dir).unwrap();
        assert!(cmd_new(&dir).is_err());

        let target = Target::resolve(&dir).unwrap();
        assert_eq!(target.program_path, dir.join("main.json"));
        let listing = target.compile(false).unwrap().to_string();
        assert!(!listing.contains("@unroll"));

        let host = compile_and_run(
            target.load().unwrap(),
            &target.compile_options(false),
            target.runtime_options(None),
            RecordingHost::default(),
        )
        .unwrap();
        assert_eq!(host.traces.len(), 10);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn manifest_next_to_program_disables_unrolling() {
        let dir = scratch("manifest");
        cmd_new(&dir).unwrap();
        let mut manifest = load_manifest(&dir.join(MANIFEST_FILE)).unwrap();
        manifest.compile.unroll = false;
        std::fs::write(dir.join(MANIFEST_FILE), manifest.to_toml().unwrap()).unwrap();

        let target = Target::resolve(&dir.join("main.json")).unwrap();
        let listing = target.compile(false).unwrap().to_string();
        assert!(listing.contains("foreach i in [1:10]"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_program_is_an_error() {
        assert!(Target::resolve(&scratch("missing").join("nope.json")).is_err());
    }
}
