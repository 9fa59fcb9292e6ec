use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use facade_columns::commands::{self, DEBUG_DIR, InputConfig, TestConfig, TrainConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Train,
    Test,
}

#[derive(Parser)]
#[command(name = "facade-columns")]
#[command(about = "Train and run a column locator for facade photographs")]
struct Cli {
    #[arg(long, value_enum)]
    mode: Mode,

    /// Path to folder containing images
    #[arg(long = "input_dir", value_name = "DIR")]
    input_dir: PathBuf,

    /// Where to put output files
    #[arg(long = "output_dir", value_name = "DIR", default_value = "out")]
    output_dir: PathBuf,

    /// Path to folder containing models
    #[arg(long = "model_dir", value_name = "DIR", default_value = "models")]
    model_dir: PathBuf,

    #[arg(long = "num_epochs", default_value_t = 10)]
    num_epochs: usize,

    #[arg(long = "learning_rate", default_value_t = 0.0001)]
    learning_rate: f64,

    /// Augmented copies per training sample
    #[arg(
        long = "augmentation_factor",
        default_value_t = 100,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    augmentation_factor: u32,

    /// Use all columns
    #[arg(long = "all_columns")]
    all_columns: bool,

    /// Output debug information
    #[arg(long)]
    debug: bool,

    /// Column annotation file
    #[arg(long = "column_annotation", default_value = "column_annotation.txt")]
    column_annotation: PathBuf,

    /// Floor annotation file
    #[arg(long = "floor_annotation", default_value = "floor_annotation.txt")]
    floor_annotation: PathBuf,

    /// Seed for augmentation, shuffling and training
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    std::fs::create_dir_all(&args.output_dir)?;
    std::fs::create_dir_all(&args.model_dir)?;

    let input = InputConfig {
        input_dir: args.input_dir,
        column_annotation: args.column_annotation,
        floor_annotation: args.floor_annotation,
    };
    let debug_dir = args.debug.then(|| PathBuf::from(DEBUG_DIR));

    match args.mode {
        Mode::Train => {
            let config = TrainConfig {
                input,
                model_dir: args.model_dir,
                num_epochs: args.num_epochs,
                learning_rate: args.learning_rate,
                augmentation_factor: args.augmentation_factor as usize,
                all_columns: args.all_columns,
                seed: args.seed,
                debug_dir,
            };
            commands::train(&config)?;
        }
        Mode::Test => {
            let config = TestConfig {
                input,
                model_dir: args.model_dir,
                output_dir: args.output_dir,
                all_columns: args.all_columns,
                debug_dir,
            };
            if let Some(report) = commands::test(&config)? {
                println!("\n=== Predictions ===");
                for (file, value) in &report.predictions {
                    println!("  {}: {:.4}", file, value);
                }
            }
        }
    }

    Ok(())
}
