//! # RBM (Restricted Boltzmann Machines)
//!
//! Training of binary Restricted Boltzmann Machines with an interchangeable
//! negative-phase sampler.
//!
//! ## Overview
//!
//! An RBM learns by pushing down the energy of data configurations and
//! pushing up the energy of configurations the model itself produces. The
//! positive phase comes from the data; the negative phase comes from either
//! a short Gibbs chain (contrastive divergence) or an annealing solver run on
//! the model's own energy landscape.
//!
//! ## Structure
//!
//! - [`core`] — Model parameters, propagation, energy, Hebbian update, Gibbs sampling
//! - [`solver`] — Spin-model solver interface and the built-in simulated quantum annealer
//! - [`training`] — Sampler strategies and the epoch loop
//! - [`config`] — Training configuration and TOML loading
//! - [`checkpoint`] — JSON checkpoints
//! - [`data`] — Dataset loading and preprocessing

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod data;
pub mod solver;
pub mod training;

pub use config::{AnnealConfig, SamplerKind, TrainConfig};
pub use crate::core::{sigmoid, Rbm, RbmError, RbmResult};
pub use solver::{BipartiteModel, SimulatedQuantumAnnealer, SolverError, SpinModelSolver};
pub use training::{train, train_with_callback, EpochMetrics, Sampler, TrainReport};

pub use checkpoint::{load_checkpoint, resume_conflicts, save_checkpoint, CheckpointData};
pub use data::{bars_and_stripes, binarize, load_matrix, parse_matrix};
