use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use candle_core::Device;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ffwd_common::{ExperimentConfig, Partition, RunningMetrics, VectorDataset};
use ffwd_core::FfNet;
use ffwd_train::{DiskCheckpoint, Recorder, RunRecorder, Trainer};

#[derive(Parser, Debug)]
#[command(name = "ffwd", about = "Forward-forward training harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model from scratch.
    Train(TrainArgs),
    /// Evaluate a saved model on one partition.
    Eval(EvalArgs),
}

#[derive(Parser, Debug)]
struct TrainArgs {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Directory holding train.jsonl / val.jsonl / test.jsonl.
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long, default_value = "runs")]
    output_dir: PathBuf,
    /// Override `training.epochs` from the config.
    #[arg(long)]
    epochs: Option<usize>,
    /// Override `training.learning_rate` from the config.
    #[arg(long)]
    learning_rate: Option<f64>,
    /// Seed for the train-partition shuffle.
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Parser, Debug)]
struct EvalArgs {
    /// Checkpoint directory written during training.
    #[arg(long)]
    model_dir: PathBuf,
    #[arg(long)]
    data_dir: PathBuf,
    #[arg(long, default_value = "test")]
    partition: Partition,
    #[arg(long, default_value = "100")]
    batch_size: usize,
}

/// Advances the epoch bar on every train-phase report, delegating everything
/// to the wrapped recorder.
struct ProgressRecorder<'a, R> {
    inner: &'a mut R,
    bar: ProgressBar,
}

impl<R: Recorder> Recorder for ProgressRecorder<'_, R> {
    fn record(
        &mut self,
        phase: &str,
        elapsed: Duration,
        metrics: &RunningMetrics,
        epoch: Option<usize>,
    ) -> Result<()> {
        self.inner.record(phase, elapsed, metrics, epoch)?;
        if phase == Partition::Train.as_str() {
            self.bar.inc(1);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Train(args) => run_train(args),
        Command::Eval(args) => run_eval(args),
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    // Load or create config
    let mut config = if args.config.exists() {
        ExperimentConfig::load(&args.config)?
    } else {
        let default = ExperimentConfig::default();
        default.save(&args.config)?;
        eprintln!("Created default config at {}", args.config.display());
        default
    };
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(lr) = args.learning_rate {
        config.training.learning_rate = lr;
    }
    config.validate()?;

    let device = Device::cuda_if_available(0)?;

    let mut train_data = VectorDataset::load(
        &args.data_dir.join(Partition::Train.file_name()),
        config.model.input_dim,
    )
    .context("load train partition")?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    train_data.shuffle(&mut rng);
    tracing::info!(samples = train_data.num_samples(), "loaded train partition");

    let val_data = if config.training.val_idx != -1 {
        let ds = VectorDataset::load(
            &args.data_dir.join(Partition::Val.file_name()),
            config.model.input_dim,
        )
        .context("load val partition")?;
        tracing::info!(samples = ds.num_samples(), "loaded val partition");
        Some(ds)
    } else {
        None
    };

    let model = FfNet::new(&config.model, &device)?;
    let optimizer = AdamW::new(
        model.varmap().all_vars(),
        ParamsAdamW {
            lr: config.training.learning_rate,
            ..Default::default()
        },
    )?;

    let mut recorder = RunRecorder::init(Some(&args.output_dir))?;
    let mut checkpoint = DiskCheckpoint::new(args.output_dir.join("best"));
    let mut trainer = Trainer::new(model, optimizer, &config, device)?;

    let bar = ProgressBar::new(config.training.epochs as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} epochs")
            .unwrap()
            .progress_chars("=>-"),
    );
    let mut progress = ProgressRecorder {
        inner: &mut recorder,
        bar: bar.clone(),
    };
    trainer.train(&train_data, val_data.as_ref(), &mut progress, &mut checkpoint)?;
    bar.finish_with_message("done");

    if config.training.final_test {
        let test_data = VectorDataset::load(
            &args.data_dir.join(Partition::Test.file_name()),
            config.model.input_dim,
        )
        .context("load test partition")?;
        trainer.evaluate(
            &test_data,
            Partition::Test,
            None,
            &mut recorder,
            &mut checkpoint,
        )?;
    }

    tracing::info!(best_val_acc = trainer.best_val_acc(), "training complete");
    recorder.finish()?;
    Ok(())
}

fn run_eval(args: EvalArgs) -> Result<()> {
    let device = Device::cuda_if_available(0)?;
    let model = FfNet::load(&args.model_dir, &device)?;

    let data = VectorDataset::load(
        &args.data_dir.join(args.partition.file_name()),
        model.config().input_dim,
    )
    .with_context(|| format!("load {} partition", args.partition))?;

    let mut config = ExperimentConfig::default();
    config.model = model.config().clone();
    config.training.batch_size = args.batch_size;
    config.scheduler = None;

    let optimizer = AdamW::new(model.varmap().all_vars(), ParamsAdamW::default())?;
    // Raised gate: a standalone evaluation must never win the checkpoint
    // write against a finished training run.
    let mut trainer = Trainer::new(model, optimizer, &config, device)?.with_initial_best(1.0);

    let mut recorder = RunRecorder::init(None)?;
    let mut checkpoint = DiskCheckpoint::new(args.model_dir.clone());
    trainer.evaluate(&data, args.partition, None, &mut recorder, &mut checkpoint)?;
    recorder.finish()?;
    Ok(())
}
