use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::warn;
use std::path::{Path, PathBuf};
use vulnseq::{data::Dataset, store::DirectoryStore, Blstm, Config};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// JSON array of `{"vector": [[f32]], "label": 0|1}` examples
    #[arg(short, long, value_name = "FILE")]
    dataset: PathBuf,

    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding `<name>_model.safetensors`
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    store: PathBuf,

    #[arg(short, long)]
    name: Option<String>,

    #[arg(short, long)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Balance, split and train, then save the parameters
    Train {
        #[command(flatten)]
        args: RunArgs,
    },

    /// Rebuild the split, load saved parameters and report metrics
    Test {
        #[command(flatten)]
        args: RunArgs,

        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Train and test in one go
    Run {
        #[command(flatten)]
        args: RunArgs,

        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config: Config = if let Some(config_path) = &args.config {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("reading config {}", config_path.display()))?;
        serde_json::from_str(&config_str).context("parsing config")?
    } else {
        Config::default()
    };

    if let Some(name) = &args.name {
        config.training.run_name = name.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.training.batch_size = batch_size;
    }
    Ok(config)
}

fn build(args: &RunArgs) -> Result<Blstm<DirectoryStore>> {
    let config = load_config(args)?;
    let dataset = Dataset::from_json_file(&args.dataset)
        .with_context(|| format!("loading dataset {}", args.dataset.display()))?;
    println!("Loaded {} examples", dataset.len());

    let store = DirectoryStore::new(&args.store)?;
    Ok(Blstm::new(&dataset, config, store)?)
}

fn report(blstm: &mut Blstm<DirectoryStore>, output: Option<&Path>) -> Result<()> {
    let report = blstm.test()?;
    report.print_report();

    if let Some(output_path) = output {
        report.save_to_file(output_path)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train { args } => {
            let mut blstm = build(&args)?;
            let stats = blstm.train()?;
            if let Some(loss) = stats.final_loss() {
                println!("Final training loss: {:.4}", loss);
            }
            Ok(())
        }

        Commands::Test { args, output } => {
            let mut blstm = build(&args)?;
            if blstm.config().data.seed.is_none() {
                warn!("No data.seed configured; the test split will differ from the one used in training");
            }
            report(&mut blstm, output.as_deref())
        }

        Commands::Run { args, output } => {
            let mut blstm = build(&args)?;
            blstm.train()?;
            report(&mut blstm, output.as_deref())
        }
    }
}
