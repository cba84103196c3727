use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::Context;
use clap::Parser;
use morphogen::headless::{load_base, walker, ReportGenerator, RunOutcome, TrainingEnv};
use morphogen::TrainingSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (RON); defaults to ./morphogen.ron when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base morphology (RON); defaults to a four-legged walker
    #[arg(long)]
    base: Option<PathBuf>,

    /// Number of generations to train
    #[arg(long)]
    generations: Option<usize>,

    /// Population size per generation
    #[arg(long)]
    population: Option<usize>,

    /// Seed of the evolution loop
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory for training reports
    #[arg(long)]
    output: Option<String>,

    /// Print the effective settings and exit
    #[arg(long)]
    print_settings: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut settings = TrainingSettings::load_from(args.config.as_deref())?;
    if let Some(generations) = args.generations {
        settings.generations = generations;
    }
    if let Some(population) = args.population {
        settings.evolution.population_size = population;
    }
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(output) = args.output {
        settings.output_dir = output;
    }
    settings.validate()?;

    if args.print_settings {
        let text = ron::ser::to_string_pretty(&settings, ron::ser::PrettyConfig::default())
            .context("Failed to serialize settings")?;
        println!("{}", text);
        return Ok(());
    }

    let base = match &args.base {
        Some(path) => load_base(path)?,
        None => walker().context("Failed to build the default walker")?,
    };

    log::info!("Starting headless evolution training");
    log::info!("  Generations: {}", settings.generations);
    log::info!("  Population: {}", settings.evolution.population_size);
    log::info!("  Seed: {}", settings.seed);
    log::info!("  Base: {} segments, {} joints", base.nodes().len(), base.edges().len());
    log::info!("  Output: {}", settings.output_dir);

    let report = ReportGenerator::new(&settings.output_dir);
    let mut env = TrainingEnv::new(settings, base);

    let cancel = env.cancel_handle();
    ctrlc::set_handler(move || {
        log::info!("Shutdown signal received, finishing current members...");
        cancel.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    let outcome = env.run()?;
    report.generate(
        env.algorithm().lineage(),
        &env.stats_history,
        env.best(),
        env.algorithm().diagnostics(),
    )?;

    let diagnostics = env.algorithm().diagnostics();
    log::info!(
        "{} mutation passes, {} unrepairable, {} fallbacks",
        diagnostics.passes,
        diagnostics.unrepairable,
        diagnostics.fallbacks
    );
    if outcome == RunOutcome::Cancelled {
        log::warn!("Training was cancelled; reports cover completed generations only");
    }
    Ok(())
}
