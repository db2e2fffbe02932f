// Geniartor Music: CLI entry point.
//
// Loads a JSON configuration, runs the parallel VNS search and writes the
// best piece to MIDI (and optionally JSON). The pipeline: configuration ->
// constraint resolution -> draft -> VNS refinement -> rendering.
//
// Usage:
//   cargo run -p geniartor_music -- [--config PATH] [--seed N] [--passes N]
//     [--runs N] [--output-dir DIR]
//
// Without --config the bundled data/default_config.json is used when it
// exists, otherwise built-in defaults. RUST_LOG controls verbosity (default
// `info`).

use clap::Parser;
use geniartor_music::config::GeneratorConfig;
use geniartor_music::midi::write_midi;
use geniartor_music::vns::Composer;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/default_config.json");

#[derive(Parser, Debug)]
#[command(name = "generate")]
#[command(version, about = "Compose a multi-voice phrase by Variable Neighborhood Search", long_about = None)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base random seed (run i uses seed + i)
    #[arg(long)]
    seed: Option<u64>,

    /// Passes through all neighborhoods without improvement before stopping
    #[arg(long)]
    passes: Option<usize>,

    /// Number of independent runs
    #[arg(long)]
    runs: Option<usize>,

    /// Directory for output files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<GeneratorConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => GeneratorConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => GeneratorConfig::load(Path::new(DEFAULT_CONFIG))?,
        None => {
            log::info!("no config file given, using built-in defaults");
            GeneratorConfig::default()
        }
    };
    if let Some(seed) = args.seed {
        config.search.seed = seed;
    }
    if let Some(passes) = args.passes {
        config.search.n_passes = passes;
    }
    if let Some(runs) = args.runs {
        config.search.n_runs = runs;
    }
    if let Some(dir) = &args.output_dir {
        config.rendering.dir = dir.clone();
    }
    Ok(config)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args)?;
    config.rendering.validate()?;
    let composer = Composer::new(&config)?;

    println!("=== Geniartor ===");
    println!(
        "Scale: {} {}, meter {}/{}, {} measures, {} voices",
        config.piece.tonic,
        config.piece.scale_type,
        config.piece.meter.beats_per_measure,
        config.piece.meter.beat_unit,
        config.piece.n_measures,
        config.piece.voices.len()
    );
    println!(
        "Search: {} runs from seed {}, {} passes, k_max {}",
        config.search.n_runs, config.search.seed, config.search.n_passes, config.search.k_max
    );
    println!();

    let result = composer.search()?;

    println!("Best run: seed {}", result.seed);
    println!(
        "  Fitness: {:.4} -> {:.4} (delta {:+.4})",
        result.initial_fitness,
        result.fitness,
        result.fitness - result.initial_fitness
    );
    println!(
        "  Shakes: {} ({} degraded), improvements: {}, local search moves: {}",
        result.stats.shakes,
        result.stats.degraded_shakes,
        result.stats.improvements,
        result.stats.local_search_moves
    );
    println!();
    print!("{}", result.piece.summary());
    println!();

    println!("Breakdown:");
    for (name, score) in composer.evaluator().breakdown(&result.piece)? {
        println!("  {:<32} {:>8.4} (weighted {:>8.4})", name, score.raw, score.weighted);
    }
    println!();

    let dir = &config.rendering.dir;
    std::fs::create_dir_all(dir)?;
    let midi_path = dir.join(format!("piece_{}.mid", result.seed));
    write_midi(&result.piece, &config.rendering, &midi_path)?;
    println!("MIDI: {}", midi_path.display());

    if config.rendering.write_json {
        let json_path = dir.join(format!("piece_{}.json", result.seed));
        std::fs::write(&json_path, serde_json::to_string_pretty(&result.piece)?)?;
        println!("JSON: {}", json_path.display());
    }
    Ok(())
}
