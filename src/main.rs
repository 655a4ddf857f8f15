//! Command-line front end for the JIT differential oracle.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use oracle::differential::DifferentialOracle;
use oracle::engine::{EngineProcess, ExecutionResult, IsolateFunction, IsolateTransport, Transport};
use oracle::{EngineKind, Harness, TargetProfile, TransportError, Verdict};

/// CLI arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Built-in profile name [default: v8, or spidermonkey with --engine]
    #[arg(long, global = true)]
    profile: Option<String>,

    /// JSON profile file; overrides --profile
    #[arg(long, global = true)]
    profile_file: Option<PathBuf>,

    /// Engine shell binary; without it programs run in the embedded V8 isolate
    #[arg(long, global = true)]
    engine: Option<PathBuf>,

    /// Per-program execution timeout in milliseconds
    #[arg(long, default_value_t = 10_000, global = true)]
    timeout_ms: u64,

    /// V8 heap limit of the embedded isolate in megabytes
    #[arg(long, default_value_t = 256, global = true)]
    heap_limit_mb: usize,

    /// Maximum log level written to stderr
    #[arg(long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the selected profile as JSON
    Profile,
    /// Validate the profile, and run the target preflight with --preflight
    Check {
        #[arg(long)]
        preflight: bool,
    },
    /// Print the weighted generator and template report
    Extensions,
    /// Print a candidate body wrapped in the scaffold
    Wrap { file: PathBuf },
    /// Run the crash tests against the target
    SelfTest {
        #[arg(long, default_value_t = 2)]
        rounds: u32,
    },
    /// Run candidate bodies through the scaffold, one target per worker
    Run {
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 1)]
        jobs: usize,
    },
    /// Run the host-driven oracle on one candidate body in the embedded isolate
    Oracle { file: PathBuf },
}

// ── Target selection ────────────────────────────────────────────────────

enum Target {
    Process(EngineProcess),
    Isolate(IsolateTransport),
}

impl Target {
    fn for_profile(profile: &TargetProfile, engine: Option<&Path>, heap_limit: usize) -> Self {
        match engine {
            Some(path) => Target::Process(
                EngineProcess::new(path, profile.launch().clone()).with_sentinel(profile.sentinel().clone()),
            ),
            None => Target::Isolate(
                IsolateTransport::new(profile.launch(), profile.sentinel().clone()).with_heap_limit(heap_limit),
            ),
        }
    }

    fn kind(engine: Option<&Path>) -> EngineKind {
        match engine {
            Some(_) => EngineKind::Shell,
            None => EngineKind::Embedded,
        }
    }
}

#[async_trait]
impl Transport for Target {
    async fn launch(&mut self) -> Result<(), TransportError> {
        match self {
            Target::Process(t) => t.launch().await,
            Target::Isolate(t) => t.launch().await,
        }
    }

    async fn execute(
        &mut self,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, TransportError> {
        match self {
            Target::Process(t) => t.execute(source, timeout).await,
            Target::Isolate(t) => t.execute(source, timeout).await,
        }
    }

    async fn restart(&mut self) -> Result<(), TransportError> {
        match self {
            Target::Process(t) => t.restart().await,
            Target::Isolate(t) => t.restart().await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Target::Process(t) => t.describe(),
            Target::Isolate(t) => t.describe(),
        }
    }

    fn observes_sentinel(&self) -> bool {
        match self {
            Target::Process(t) => t.observes_sentinel(),
            Target::Isolate(t) => t.observes_sentinel(),
        }
    }
}

fn profile_name(args: &Args) -> &str {
    match (&args.profile, &args.engine) {
        (Some(name), _) => name.as_str(),
        (None, Some(_)) => "spidermonkey",
        (None, None) => "v8",
    }
}

fn load_profile(args: &Args) -> anyhow::Result<Arc<TargetProfile>> {
    let profile = match &args.profile_file {
        Some(path) => TargetProfile::from_file(path)
            .with_context(|| format!("loading profile {}", path.display()))?,
        None => TargetProfile::builtin(profile_name(args))
            .with_context(|| format!("loading built-in profile '{}'", profile_name(args)))?,
    };
    Ok(profile.shared())
}

fn read_body(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

// ── Commands ────────────────────────────────────────────────────────────

async fn run_candidates(
    profile: Arc<TargetProfile>,
    engine: Option<PathBuf>,
    timeout: Duration,
    heap_limit: usize,
    files: Vec<PathBuf>,
    jobs: usize,
) -> anyhow::Result<bool> {
    if files.is_empty() {
        bail!("no candidate files given");
    }
    let jobs = jobs.clamp(1, files.len());
    let mut shards: Vec<Vec<PathBuf>> = vec![Vec::new(); jobs];
    for (i, file) in files.into_iter().enumerate() {
        shards[i % jobs].push(file);
    }

    let mut workers = Vec::with_capacity(jobs);
    for (worker, shard) in shards.into_iter().enumerate() {
        let profile = profile.clone();
        let engine = engine.clone();
        workers.push(tokio::spawn(async move {
            let target = Target::for_profile(&profile, engine.as_deref(), heap_limit);
            let mut harness = Harness::new(profile, target).with_timeout(timeout);
            let mut results = Vec::with_capacity(shard.len());
            for file in shard {
                let outcome = match read_body(&file) {
                    Ok(body) => harness.run(&body).await,
                    Err(e) => {
                        tracing::error!(worker, error = %e, "skipping candidate");
                        continue;
                    }
                };
                results.push((file, outcome));
            }
            results
        }));
    }

    let mut found = false;
    for worker in workers {
        for (file, outcome) in worker.await.context("worker task failed")? {
            found |= outcome.is_confirmed();
            println!("{}", json!({ "file": file.display().to_string(), "result": outcome }));
        }
    }
    Ok(found)
}

async fn run_host_oracle(
    profile: Arc<TargetProfile>,
    body: String,
    timeout: Duration,
    heap_limit: usize,
) -> anyhow::Result<Verdict> {
    oracle::initialize_v8(&profile.launch().flag_string());
    let verdict = tokio::task::spawn_blocking(move || {
        let mut function = IsolateFunction::define_with_heap_limit(
            &body,
            profile.oracle_params(),
            profile.sentinel(),
            heap_limit,
        )?;
        let oracle = DifferentialOracle::new(profile.oracle_params().clone()).with_invoke_timeout(timeout);
        Ok::<_, TransportError>(oracle.run(&mut function))
    })
    .await
    .context("oracle worker failed")??;
    Ok(verdict)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;

    let profile = load_profile(&args)?;
    let timeout = Duration::from_millis(args.timeout_ms);
    let heap_limit = args.heap_limit_mb.saturating_mul(1024 * 1024);
    let engine = args.engine.clone();
    let selected = Target::kind(engine.as_deref());
    let new_harness = |profile: Arc<TargetProfile>| {
        let target = Target::for_profile(&profile, engine.as_deref(), heap_limit);
        Harness::new(profile, target).with_timeout(timeout)
    };

    match args.command {
        Command::Profile => {
            println!("{}", serde_json::to_string_pretty(profile.config())?);
        }
        Command::Check { preflight } => {
            if preflight {
                profile.check_engine(selected)?;
                new_harness(profile.clone()).preflight().await?;
            }
            println!("profile '{}' is valid", profile.name());
        }
        Command::Extensions => {
            print!("{}", profile.extensions().report());
        }
        Command::Wrap { file } => {
            let body = read_body(&file)?;
            println!("{}", profile.scaffold().wrap(&body));
        }
        Command::SelfTest { rounds } => {
            profile.check_engine(selected)?;
            let outcomes = new_harness(profile.clone()).self_test(rounds).await?;
            for (snippet, outcome) in profile.crash_tests().iter().zip(&outcomes) {
                println!("{} => {}", snippet, outcome);
            }
        }
        Command::Run { files, jobs } => {
            profile.check_engine(selected)?;
            let found = run_candidates(profile, engine.clone(), timeout, heap_limit, files, jobs).await?;
            return Ok(if found { ExitCode::from(1) } else { ExitCode::SUCCESS });
        }
        Command::Oracle { file } => {
            profile.check_engine(EngineKind::Embedded)?;
            let body = read_body(&file)?;
            let verdict = run_host_oracle(profile, body, timeout, heap_limit).await?;
            println!("{}", serde_json::to_string(&verdict)?);
            if verdict.is_divergent() {
                return Ok(ExitCode::from(1));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
