//! Annealing solvers for the negative phase.
//!
//! The annealing sampler hands the current RBM parameters to a
//! [`SpinModelSolver`] as a bipartite energy model and reads back joint
//! low-energy assignments over all `n_visible + n_hidden` units, ordered
//! visible units first.
//!
//! [`SimulatedQuantumAnnealer`] is the built-in solver: path-integral Monte
//! Carlo over `P` Trotter slices coupled by a decaying transverse field.
//!
//! ```text
//! H_eff = Σ_k E(x_k) / P  -  J⊥ Σ_k Σ_i s_{k,i} s_{k+1,i}
//! J⊥    = -(T/2) ln tanh(Γ / (P T)),   s = 2x - 1
//! ```
//!
//! As Γ decays the replicas are pulled together and the chain settles into a
//! low-energy classical state.

use crate::config::AnnealConfig;
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Errors raised by a spin-model solver.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    /// The solver finished without returning any assignment.
    #[error("solver returned no assignments")]
    EmptyResult,
    /// The annealing schedule cannot be run.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    /// Failure inside a solver backend.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Borrowed view of RBM parameters as a bipartite energy model.
///
/// Joint states are binary vectors of length `n_visible + n_hidden`, visible
/// units first.
#[derive(Debug, Clone, Copy)]
pub struct BipartiteModel<'a> {
    pub visible_bias: ArrayView1<'a, f32>,
    pub hidden_bias: ArrayView1<'a, f32>,
    /// Shape `(n_visible, n_hidden)`.
    pub weight: ArrayView2<'a, f32>,
}

impl<'a> BipartiteModel<'a> {
    pub fn new(
        visible_bias: ArrayView1<'a, f32>,
        hidden_bias: ArrayView1<'a, f32>,
        weight: ArrayView2<'a, f32>,
    ) -> Self {
        Self {
            visible_bias,
            hidden_bias,
            weight,
        }
    }

    pub fn n_visible(&self) -> usize {
        self.visible_bias.len()
    }

    pub fn n_hidden(&self) -> usize {
        self.hidden_bias.len()
    }

    pub fn n_units(&self) -> usize {
        self.n_visible() + self.n_hidden()
    }

    /// RBM energy of a joint state.
    pub fn energy(&self, state: ArrayView1<f32>) -> f32 {
        let nv = self.n_visible();
        let v = state.slice(s![..nv]);
        let h = state.slice(s![nv..]);
        -self.visible_bias.dot(&v) - self.hidden_bias.dot(&h) - v.dot(&self.weight.dot(&h))
    }

    /// Local field on unit `u` of a joint state: `-∂E/∂x_u`.
    fn local_field(&self, state: ArrayView1<f32>, u: usize) -> f32 {
        let nv = self.n_visible();
        if u < nv {
            self.visible_bias[u] + self.weight.row(u).dot(&state.slice(s![nv..]))
        } else {
            let j = u - nv;
            self.hidden_bias[j] + self.weight.column(j).dot(&state.slice(s![..nv]))
        }
    }
}

/// Capability to sample low-energy configurations of a bipartite spin model.
///
/// Implementations run for `steps` internal iterations and return one or more
/// joint binary assignments. The first assignment is the one consumed by the
/// trainer, so implementations should put their best sample first.
pub trait SpinModelSolver: Send {
    fn sample(
        &mut self,
        model: &BipartiteModel<'_>,
        steps: usize,
    ) -> Result<Vec<Array1<f32>>, SolverError>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

/// Simulated quantum annealing via path-integral Monte Carlo.
#[derive(Debug, Clone)]
pub struct SimulatedQuantumAnnealer {
    config: AnnealConfig,
    rng: StdRng,
}

impl SimulatedQuantumAnnealer {
    pub fn new(config: AnnealConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(config: AnnealConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &AnnealConfig {
        &self.config
    }

    fn validate(&self) -> Result<(), SolverError> {
        let c = &self.config;
        if c.trotter == 0 {
            return Err(SolverError::InvalidSchedule(
                "trotter must be > 0".to_string(),
            ));
        }
        if !(c.temperature.is_finite() && c.temperature > 0.0) {
            return Err(SolverError::InvalidSchedule(format!(
                "temperature must be positive, got {}",
                c.temperature
            )));
        }
        if !(c.gamma_start > 0.0 && c.gamma_end > 0.0) {
            return Err(SolverError::InvalidSchedule(format!(
                "transverse field must stay positive ({} -> {})",
                c.gamma_start, c.gamma_end
            )));
        }
        Ok(())
    }

    /// Transverse field at sweep `step` of `steps`, linear between the endpoints.
    #[allow(clippy::cast_precision_loss)]
    fn gamma_at(&self, step: usize, steps: usize) -> f32 {
        let c = &self.config;
        if steps <= 1 {
            return c.gamma_end;
        }
        let t = step as f32 / (steps - 1) as f32;
        c.gamma_start + (c.gamma_end - c.gamma_start) * t
    }

    /// Ferromagnetic coupling between neighbouring Trotter slices.
    #[allow(clippy::cast_precision_loss)]
    fn replica_coupling(&self, gamma: f32) -> f32 {
        let p = self.config.trotter as f32;
        let t = self.config.temperature;
        let th = (gamma / (p * t)).tanh().max(f32::MIN_POSITIVE);
        -0.5 * t * th.ln()
    }
}

impl SpinModelSolver for SimulatedQuantumAnnealer {
    #[allow(clippy::cast_precision_loss)]
    fn sample(
        &mut self,
        model: &BipartiteModel<'_>,
        steps: usize,
    ) -> Result<Vec<Array1<f32>>, SolverError> {
        self.validate()?;

        let n = model.n_units();
        let p = self.config.trotter;
        let beta = 1.0 / self.config.temperature;
        let slice_weight = 1.0 / p as f32;

        let rng = &mut self.rng;
        let mut replicas =
            Array2::from_shape_fn((p, n), |_| if rng.gen::<bool>() { 1.0f32 } else { 0.0 });

        for step in 0..steps {
            let j_perp = if p > 1 {
                self.replica_coupling(self.gamma_at(step, steps))
            } else {
                0.0
            };

            for k in 0..p {
                let prev = (k + p - 1) % p;
                let next = (k + 1) % p;
                for u in 0..n {
                    let x = replicas[[k, u]];
                    let dx = 1.0 - 2.0 * x;
                    let classical = -dx * model.local_field(replicas.row(k), u) * slice_weight;

                    let spin = 2.0 * x - 1.0;
                    let neighbours =
                        2.0 * replicas[[prev, u]] - 1.0 + 2.0 * replicas[[next, u]] - 1.0;
                    let quantum = 2.0 * j_perp * spin * neighbours;

                    let delta = classical + quantum;
                    if delta <= 0.0 || self.rng.gen::<f32>() < (-beta * delta).exp() {
                        replicas[[k, u]] = 1.0 - x;
                    }
                }
            }
        }

        let mut states: Vec<(f32, Array1<f32>)> = replicas
            .outer_iter()
            .map(|row| (model.energy(row), row.to_owned()))
            .collect();
        states.sort_by(|a, b| a.0.total_cmp(&b.0));

        if states.is_empty() {
            return Err(SolverError::EmptyResult);
        }
        Ok(states.into_iter().map(|(_, state)| state).collect())
    }

    fn name(&self) -> &'static str {
        "simulated-quantum-annealing"
    }
}
