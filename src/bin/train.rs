//! RBM training binary.
//!
//! Trains a Restricted Boltzmann Machine on a text dataset (or a built-in
//! bars-and-stripes set) with contrastive divergence or simulated quantum
//! annealing. Writes JSONL metrics and periodic JSON checkpoints.

use clap::Parser;
use rbm::checkpoint::{load_checkpoint, resume_conflicts, save_checkpoint};
use rbm::data::{bars_and_stripes, binarize, load_matrix};
use rbm::{train_with_callback, Rbm, RbmResult, Sampler, SamplerKind, TrainConfig};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_HIDDEN: usize = 8;

#[derive(Parser, Debug)]
#[command(
    name = "rbm-train",
    about = "Train a Restricted Boltzmann Machine with CD-k or simulated quantum annealing"
)]
struct Args {
    /// Training data: one example per line, comma or whitespace separated.
    /// Defaults to the bars-and-stripes set when omitted.
    #[arg(long)]
    data: Option<PathBuf>,

    /// Side length of the built-in bars-and-stripes images
    #[arg(long, default_value_t = 4)]
    bars_side: usize,

    /// Binarize input values above this threshold to 1, others to 0
    #[arg(long)]
    binarize: Option<f32>,

    /// TOML training config; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of hidden units [default: 8]. Ignored when resuming.
    #[arg(long)]
    hidden: Option<usize>,

    /// Number of training epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Gibbs steps per example for contrastive divergence
    #[arg(long)]
    n_cd: Option<usize>,

    /// Negative-phase sampler: "cd" or "sqa"
    #[arg(long)]
    sampler: Option<SamplerKind>,

    /// Mini-batch size for the annealing sampler
    #[arg(long)]
    batch_size: Option<usize>,

    /// Learning rate. A resumed checkpoint keeps its own.
    #[arg(long)]
    alpha: Option<f32>,

    /// Monte Carlo sweeps per annealing call
    #[arg(long)]
    anneal_steps: Option<usize>,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Output metrics file (JSONL)
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Checkpoint directory
    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Save checkpoint every N epochs (0 = final only)
    #[arg(long, default_value_t = 0)]
    checkpoint_every: usize,

    /// Resume from checkpoint file
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Gibbs steps for the fantasy sample printed after training (0 = skip)
    #[arg(long, default_value_t = 0)]
    sample_steps: usize,
}

impl Args {
    /// Learning rate set explicitly on the command line or in the TOML config.
    fn requested_alpha(&self, config: &TrainConfig) -> RbmResult<Option<f32>> {
        if self.alpha.is_some() {
            return Ok(self.alpha);
        }
        match &self.config {
            Some(path) => {
                let table: toml::Table = toml::from_str(&fs::read_to_string(path)?)?;
                Ok(table.contains_key("alpha").then_some(config.alpha))
            }
            None => Ok(None),
        }
    }

    fn train_config(&self) -> RbmResult<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_toml_file(path)?,
            None => TrainConfig::default(),
        };
        if let Some(n) = self.epochs {
            config.n_epochs = n;
        }
        if let Some(k) = self.n_cd {
            config.n_cd = k;
        }
        if let Some(kind) = self.sampler {
            config.sampler = kind;
        }
        if let Some(bs) = self.batch_size {
            config.batch_size = bs;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(steps) = self.anneal_steps {
            config.anneal.steps = steps;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> RbmResult<()> {
    let config = args.train_config()?;

    let mut data = match &args.data {
        Some(path) => load_matrix(path)?,
        None => bars_and_stripes(args.bars_side)?,
    };
    if let Some(threshold) = args.binarize {
        data = binarize(&data, threshold);
    }

    let (mut rbm, start_epoch) = match &args.resume {
        Some(path) => {
            let (ckpt, rbm) = load_checkpoint(path, config.seed)?;
            for (setting, requested, restored) in
                resume_conflicts(&ckpt, args.hidden, args.requested_alpha(&config)?)
            {
                tracing::warn!(
                    setting,
                    requested = %requested,
                    restored = %restored,
                    "Checkpoint value overrides requested setting"
                );
            }
            tracing::info!(
                path = %path.display(),
                epoch = ckpt.epoch,
                avg_energy = ?ckpt.avg_energy,
                "Resumed from checkpoint"
            );
            (rbm, ckpt.epoch)
        }
        None => {
            let n_hidden = args.hidden.unwrap_or(DEFAULT_HIDDEN);
            let rbm = match config.seed {
                Some(seed) => Rbm::with_seed(data.ncols(), n_hidden, config.alpha, seed)?,
                None => Rbm::new(data.ncols(), n_hidden, config.alpha)?,
            };
            (rbm, 0)
        }
    };

    tracing::info!(
        n_visible = rbm.n_visible(),
        n_hidden = rbm.n_hidden(),
        examples = data.nrows(),
        sampler = %config.sampler,
        epochs = config.n_epochs,
        n_cd = config.n_cd,
        batch_size = config.batch_size,
        alpha = rbm.alpha(),
        "RBM training"
    );

    let mut metrics_file: Option<File> = match &args.metrics_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        }
        None => None,
    };

    let initial_error = rbm.reconstruction_error(&data)?;
    tracing::info!(reconstruction_error = initial_error, "Before training");

    let mut sampler = Sampler::from_config(&config);
    let report = train_with_callback(&mut rbm, &data, config.n_epochs, &mut sampler, |rbm, m| {
        let epoch = start_epoch + m.epoch + 1;
        let reconstruction_error = rbm.reconstruction_error(&data)?;

        if let Some(file) = metrics_file.as_mut() {
            let event = serde_json::json!({
                "type": "epoch",
                "epoch": epoch,
                "avg_energy": m.avg_energy,
                "reconstruction_error": reconstruction_error,
                "updates": m.num_updates,
                "dropped_samples": m.dropped_samples,
                "elapsed_secs": m.duration_secs,
            });
            writeln!(file, "{event}")?;
            file.flush()?;
        }

        if args.checkpoint_every > 0 && epoch % args.checkpoint_every == 0 {
            let path = args.checkpoint_dir.join(format!("epoch_{epoch:03}.json"));
            save_checkpoint(rbm, &path, epoch, m.avg_energy)?;
            tracing::info!(path = %path.display(), "Checkpoint saved");
        }
        Ok(())
    })?;

    let final_error = rbm.reconstruction_error(&data)?;
    tracing::info!(
        reconstruction_error = final_error,
        final_energy = ?report.final_energy(),
        avg_epoch_secs = report.avg_epoch_secs,
        "After training"
    );

    let final_epoch = start_epoch + report.epochs.len();
    let final_path = args.checkpoint_dir.join("final.json");
    save_checkpoint(
        &rbm,
        &final_path,
        final_epoch,
        report.final_energy().unwrap_or(f32::NAN),
    )?;
    tracing::info!(path = %final_path.display(), "Final checkpoint saved");

    if args.sample_steps > 0 {
        let (v, h) = rbm.sample(args.sample_steps, None)?;
        tracing::info!(visible = ?v.to_vec(), hidden = ?h.to_vec(), "Fantasy sample");
    }

    Ok(())
}
