//! powersample CLI - answer one prompt with consensus, repair and chain sampling.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use powersample::models::Payload;
use powersample::sampling::ChainStateRow;
use powersample::{Config, Engine, Language, LlmClient, Mode, RunOverrides, RunResult, TemplateStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

const RULE_WIDTH: usize = 60;

#[derive(Parser)]
#[command(name = "powersample")]
#[command(version)]
#[command(about = "Inference-time reasoning amplification: consensus, weak-span repair, annealed chain sampling")]
struct Cli {
    /// Prompt to answer
    #[arg(required_unless_present = "print_config")]
    prompt: Option<String>,

    /// Number of consensus candidates
    #[arg(short)]
    k: Option<usize>,

    /// Refinement rounds (chain iterations in mcmc mode)
    #[arg(long)]
    steps: Option<usize>,

    /// Pipeline to run
    #[arg(long, value_enum, default_value_t = Mode::Full)]
    mode: Mode,

    /// Model identifier
    #[arg(long)]
    model: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a JSON prompt template file
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Force the working language (skips detection)
    #[arg(long)]
    lang: Option<Language>,

    /// Seed for the chain sampler's acceptance draws
    #[arg(long)]
    seed: Option<u64>,

    /// Approximate tokens per continuation block
    #[arg(long)]
    block_tokens: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the RunResult as JSON
    #[arg(long)]
    json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            model: self.model.clone(),
            k: self.k,
            steps: self.steps,
            block_tokens: self.block_tokens,
            seed: self.seed,
            language: self.lang,
            prompts_path: self.prompts.clone(),
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn spinner(mode: Mode) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("running {mode}"));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_human(result: &RunResult, verbose: bool) {
    let Some(payload) = &result.payload else {
        return;
    };
    let meta = &result.metadata;

    println!("{}", payload.text());
    if let Some(solution) = payload.solution() {
        println!("\nSolution: {solution}");
    }

    println!("{}", "─".repeat(RULE_WIDTH));
    println!("Elapsed:   {:.1}s", meta.elapsed_ms as f64 / 1000.0);
    println!("Mode:      {}", meta.mode);
    println!("Language:  {}", meta.language);
    println!("Model:     {}", meta.model);
    println!("k / steps: {} / {}", meta.config.k, meta.config.steps);

    if !verbose {
        return;
    }

    match payload {
        Payload::Consensus {
            candidates,
            chosen_index,
            ..
        } => {
            for (i, candidate) in candidates.iter().enumerate() {
                let mark = if i == *chosen_index { "*" } else { " " };
                println!("\n{mark}C{}:\n{candidate}", i + 1);
            }
        }
        Payload::Annotate {
            annotated, notes, ..
        } => {
            println!("\nAnnotated:\n{annotated}");
            if let Some(notes) = notes {
                println!("Notes: {notes}");
            }
        }
        Payload::Full {
            solution_source,
            rewrites,
            ..
        } => {
            println!("Rewrites:  {rewrites}");
            println!("Solution from: {solution_source:?}");
        }
        Payload::Mcmc {
            chain,
            best_iteration,
            final_score,
            acceptance_rate,
            ..
        } => {
            println!("Best:      iteration {best_iteration}");
            println!("Final:     {final_score:.2}");
            println!("Accepted:  {:.0}%", acceptance_rate * 100.0);
            println!("\n{}", ChainStateRow::HEADER);
            for state in chain {
                println!("{}", ChainStateRow(state));
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let config = Config::load(cli.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?
        .with_overrides(&cli.overrides());

    if cli.print_config {
        print!("{}", config.to_toml().context("Failed to render config")?);
        return Ok(ExitCode::SUCCESS);
    }

    // clap enforces the prompt unless --print-config was given
    let prompt = cli.prompt.clone().unwrap_or_default();

    let api_key = config.resolve_api_key();
    if api_key.is_none() {
        info!(env = %config.backend.api_key_env, "No API key configured, sending unauthenticated requests");
    }
    let client = Arc::new(
        LlmClient::new(&config.backend, api_key).context("Failed to create backend client")?,
    );
    let templates = TemplateStore::load_or_builtin(config.prompts.path.as_deref());
    let engine =
        Engine::new(config, client.clone(), templates).context("Invalid configuration")?;

    let pb = (!cli.json).then(|| spinner(cli.mode));
    let result = engine.run(&prompt, cli.mode).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let (input_tokens, output_tokens) = client.total_tokens();
    info!(input_tokens, output_tokens, "Token usage");

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?
        );
    } else if result.success {
        print_human(&result, cli.verbose);
    }

    if result.success {
        return Ok(ExitCode::SUCCESS);
    }

    if !cli.json {
        eprintln!("Error: {}", result.error.as_deref().unwrap_or("unknown failure"));
    }
    if cli.verbose {
        if let Some(detail) = &result.error_detail {
            eprintln!("{detail}");
        }
    }
    Ok(ExitCode::from(1))
}
