//! Core RBM model: parameters, propagation, energy, and the Hebbian update.
//!
//! A Restricted Boltzmann Machine couples `n_visible` binary visible units to
//! `n_hidden` binary hidden units through a weight matrix, with no
//! connections inside a layer. The joint energy of a configuration is:
//! ```text
//! E(v, h) = -bᵀv - cᵀh - vᵀWh
//! ```
//!
//! Conditionals factorize per unit:
//! ```text
//! p(h_j = 1 | v) = σ((Wᵀv)_j + c_j)
//! p(v_i = 1 | h) = σ((Wh)_i + b_i)
//! ```

use crate::solver::BipartiteModel;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Error type for RBM operations.
#[derive(Debug, thiserror::Error)]
pub enum RbmError {
    /// A sampler name other than `cd` or `sqa` was requested.
    #[error("Unknown sampler: {0:?} (expected \"cd\" or \"sqa\")")]
    UnknownSampler(String),
    /// Vector or matrix dimensions disagree with the model.
    #[error("Incompatible shape: {0}")]
    IncompatibleShape(String),
    /// Invalid model or training configuration.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// The annealing solver failed to produce a sample.
    #[error("Solver error: {0}")]
    Solver(#[from] crate::solver::SolverError),
    /// Malformed numeric input in a dataset file.
    #[error("Parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

pub type RbmResult<T> = Result<T, RbmError>;

/// Logistic sigmoid, elementwise.
pub fn sigmoid(x: &Array1<f32>) -> Array1<f32> {
    x.mapv(|z| 1.0 / (1.0 + (-z).exp()))
}

/// Numerically stable `ln(1 + e^x)`.
fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// A Restricted Boltzmann Machine with binary visible and hidden units.
///
/// # Parameters
///
/// - **Weights:** `weight` has shape `(n_visible, n_hidden)`
/// - **Visible bias:** `b` has shape `(n_visible)`
/// - **Hidden bias:** `c` has shape `(n_hidden)`
///
/// Shapes are fixed at construction. Only [`Rbm::update_params`] mutates the
/// parameters.
///
/// # Initialization
///
/// All parameters are drawn from U(-1, 1).
#[derive(Debug, Clone)]
pub struct Rbm {
    n_visible: usize,
    n_hidden: usize,
    alpha: f32,
    weight: Array2<f32>,
    b: Array1<f32>,
    c: Array1<f32>,
    rng: StdRng,
}

impl Rbm {
    /// Create a new RBM seeded from system entropy.
    ///
    /// # Errors
    /// - `InvalidConfig` if either layer is empty or `alpha` is not a positive finite number
    pub fn new(n_visible: usize, n_hidden: usize, alpha: f32) -> RbmResult<Self> {
        Self::build(n_visible, n_hidden, alpha, StdRng::from_entropy())
    }

    /// Create a new RBM whose initialization and sampling are reproducible.
    pub fn with_seed(n_visible: usize, n_hidden: usize, alpha: f32, seed: u64) -> RbmResult<Self> {
        Self::build(n_visible, n_hidden, alpha, StdRng::seed_from_u64(seed))
    }

    fn build(n_visible: usize, n_hidden: usize, alpha: f32, mut rng: StdRng) -> RbmResult<Self> {
        validate_layout(n_visible, n_hidden, alpha)?;

        let dist = Uniform::new_inclusive(-1.0f32, 1.0f32);
        let weight = Array2::random_using((n_visible, n_hidden), dist, &mut rng);
        let b = Array1::random_using(n_visible, dist, &mut rng);
        let c = Array1::random_using(n_hidden, dist, &mut rng);

        Ok(Self {
            n_visible,
            n_hidden,
            alpha,
            weight,
            b,
            c,
            rng,
        })
    }

    /// Rebuild an RBM from explicit parameters (e.g. a checkpoint).
    ///
    /// # Errors
    /// - `IncompatibleShape` if the bias lengths disagree with the weight matrix
    /// - `InvalidConfig` for empty layers or a bad learning rate
    pub fn from_parameters(
        weight: Array2<f32>,
        visible_bias: Array1<f32>,
        hidden_bias: Array1<f32>,
        alpha: f32,
        seed: Option<u64>,
    ) -> RbmResult<Self> {
        let (n_visible, n_hidden) = weight.dim();
        validate_layout(n_visible, n_hidden, alpha)?;
        if visible_bias.len() != n_visible {
            return Err(RbmError::IncompatibleShape(format!(
                "Visible bias: expected {}, got {}",
                n_visible,
                visible_bias.len()
            )));
        }
        if hidden_bias.len() != n_hidden {
            return Err(RbmError::IncompatibleShape(format!(
                "Hidden bias: expected {}, got {}",
                n_hidden,
                hidden_bias.len()
            )));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            n_visible,
            n_hidden,
            alpha,
            weight,
            b: visible_bias,
            c: hidden_bias,
            rng,
        })
    }

    pub fn n_visible(&self) -> usize {
        self.n_visible
    }

    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    /// Learning rate used by [`Rbm::update_params`].
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn visible_bias(&self) -> &Array1<f32> {
        &self.b
    }

    pub fn hidden_bias(&self) -> &Array1<f32> {
        &self.c
    }

    /// Borrow the parameters as a bipartite spin model for an annealing solver.
    pub fn bipartite_model(&self) -> BipartiteModel<'_> {
        BipartiteModel::new(self.b.view(), self.c.view(), self.weight.view())
    }

    /// Draw a binary vector with one independent Bernoulli trial per unit.
    ///
    /// Each unit gets a fresh draw `u` from (0, 1] and is set to 1 when
    /// `u <= p[i]`, so probabilities of exactly 0 or 1 are reproduced exactly.
    pub fn sample_units(&mut self, p: &Array1<f32>) -> Array1<f32> {
        let rng = &mut self.rng;
        p.mapv(|pi| {
            let u = 1.0 - rng.gen::<f32>();
            if u <= pi {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Conditional hidden probabilities `σ(Wᵀv + c)` without sampling.
    pub fn hidden_probabilities(&self, v: &Array1<f32>) -> RbmResult<Array1<f32>> {
        self.check_visible(v)?;
        Ok(self.hidden_activation(v.view()))
    }

    /// Conditional visible probabilities `σ(Wh + b)` without sampling.
    pub fn visible_probabilities(&self, h: &Array1<f32>) -> RbmResult<Array1<f32>> {
        self.check_hidden(h)?;
        Ok(self.visible_activation(h.view()))
    }

    /// Propagate visible → hidden and sample the hidden layer.
    ///
    /// `v` may be binary or an aggregate such as a batch mean.
    pub fn forward(&mut self, v: &Array1<f32>) -> RbmResult<Array1<f32>> {
        let p_h = self.hidden_probabilities(v)?;
        Ok(self.sample_units(&p_h))
    }

    /// Propagate hidden → visible and sample the visible layer.
    pub fn backward(&mut self, h: &Array1<f32>) -> RbmResult<Array1<f32>> {
        let p_v = self.visible_probabilities(h)?;
        Ok(self.sample_units(&p_v))
    }

    /// Joint energy `E(v, h) = -bᵀv - cᵀh - vᵀWh`.
    ///
    /// Used for monitoring only; it plays no part in the update.
    pub fn energy(&self, v: &Array1<f32>, h: &Array1<f32>) -> RbmResult<f32> {
        self.check_visible(v)?;
        self.check_hidden(h)?;
        Ok(-self.b.dot(v) - self.c.dot(h) - v.dot(&self.weight.dot(h)))
    }

    /// Free energy `F(v) = -bᵀv - Σ_j softplus((Wᵀv)_j + c_j)`.
    pub fn free_energy(&self, v: &Array1<f32>) -> RbmResult<f32> {
        self.check_visible(v)?;
        let pre = self.weight.t().dot(v) + &self.c;
        Ok(-self.b.dot(v) - pre.iter().map(|&x| softplus(x)).sum::<f32>())
    }

    /// Apply the Hebbian/anti-Hebbian update.
    ///
    /// ```text
    /// W += α (v₀ h₀ᵀ - v_s h_sᵀ)
    /// b += α (v₀ - v_s)
    /// c += α (h₀ - h_s)
    /// ```
    ///
    /// No batch normalization is applied here. Callers either update once per
    /// example or pass a pre-aggregated batch mean.
    pub fn update_params(
        &mut self,
        v0: &Array1<f32>,
        v_sampled: &Array1<f32>,
        h0: &Array1<f32>,
        h_sampled: &Array1<f32>,
    ) -> RbmResult<()> {
        self.check_visible(v0)?;
        self.check_visible(v_sampled)?;
        self.check_hidden(h0)?;
        self.check_hidden(h_sampled)?;

        let positive = &v0.view().insert_axis(Axis(1)) * &h0.view().insert_axis(Axis(0));
        let negative =
            &v_sampled.view().insert_axis(Axis(1)) * &h_sampled.view().insert_axis(Axis(0));

        self.weight.scaled_add(self.alpha, &(positive - negative));
        self.b.scaled_add(self.alpha, &(v0 - v_sampled));
        self.c.scaled_add(self.alpha, &(h0 - h_sampled));

        Ok(())
    }

    /// Run a Gibbs chain for `n_iter` steps and return the final `(v, h)`.
    ///
    /// The chain starts from `v_init`, or from a uniformly random binary
    /// vector when `None`. Each step samples `h ← forward(v)` then
    /// `v ← backward(h)`; the returned `h` is the one `v` was drawn from.
    /// With `n_iter == 0` the start vector is returned with a single forward
    /// sample.
    pub fn sample(
        &mut self,
        n_iter: usize,
        v_init: Option<&Array1<f32>>,
    ) -> RbmResult<(Array1<f32>, Array1<f32>)> {
        let mut v = match v_init {
            Some(v) => {
                self.check_visible(v)?;
                v.clone()
            }
            None => self.random_visible(),
        };

        if n_iter == 0 {
            let h = self.forward(&v)?;
            return Ok((v, h));
        }

        let mut h = Array1::zeros(self.n_hidden);
        for _ in 0..n_iter {
            h = self.forward(&v)?;
            v = self.backward(&h)?;
        }
        Ok((v, h))
    }

    /// Mean-field reconstruction `v → p(h|v) → p(v|h)`.
    pub fn reconstruct(&self, v: &Array1<f32>) -> RbmResult<Array1<f32>> {
        self.check_visible(v)?;
        let p_h = self.hidden_activation(v.view());
        Ok(self.visible_activation(p_h.view()))
    }

    /// Mean squared mean-field reconstruction error over the rows of `data`.
    ///
    /// Rows are evaluated in parallel; the model is only read.
    ///
    /// # Errors
    /// Returns `IncompatibleShape` if `data` does not have `n_visible` columns.
    #[allow(clippy::cast_precision_loss)]
    pub fn reconstruction_error(&self, data: &Array2<f32>) -> RbmResult<f32> {
        if data.ncols() != self.n_visible {
            return Err(RbmError::IncompatibleShape(format!(
                "Data columns: expected {}, got {}",
                self.n_visible,
                data.ncols()
            )));
        }
        if data.nrows() == 0 {
            return Ok(0.0);
        }

        let total: f32 = (0..data.nrows())
            .into_par_iter()
            .map(|i| {
                let v = data.row(i);
                let p_h = self.hidden_activation(v);
                let p_v = self.visible_activation(p_h.view());
                let diff = &p_v - &v;
                diff.dot(&diff) / self.n_visible as f32
            })
            .sum();

        Ok(total / data.nrows() as f32)
    }

    fn hidden_activation(&self, v: ArrayView1<f32>) -> Array1<f32> {
        sigmoid(&(self.weight.t().dot(&v) + &self.c))
    }

    fn visible_activation(&self, h: ArrayView1<f32>) -> Array1<f32> {
        sigmoid(&(self.weight.dot(&h) + &self.b))
    }

    fn random_visible(&mut self) -> Array1<f32> {
        let rng = &mut self.rng;
        Array1::from_shape_fn(self.n_visible, |_| if rng.gen::<bool>() { 1.0 } else { 0.0 })
    }

    fn check_visible(&self, v: &Array1<f32>) -> RbmResult<()> {
        if v.len() != self.n_visible {
            return Err(RbmError::IncompatibleShape(format!(
                "Visible vector: expected {}, got {}",
                self.n_visible,
                v.len()
            )));
        }
        Ok(())
    }

    fn check_hidden(&self, h: &Array1<f32>) -> RbmResult<()> {
        if h.len() != self.n_hidden {
            return Err(RbmError::IncompatibleShape(format!(
                "Hidden vector: expected {}, got {}",
                self.n_hidden,
                h.len()
            )));
        }
        Ok(())
    }
}

fn validate_layout(n_visible: usize, n_hidden: usize, alpha: f32) -> RbmResult<()> {
    if n_visible == 0 || n_hidden == 0 {
        return Err(RbmError::InvalidConfig(format!(
            "Both layers must be non-empty (n_visible={n_visible}, n_hidden={n_hidden})"
        )));
    }
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(RbmError::InvalidConfig(format!(
            "Learning rate must be positive, got {alpha}"
        )));
    }
    Ok(())
}
