//! Model checkpoints as JSON.

use crate::core::{RbmError, RbmResult, Rbm};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Serialized model parameters plus training progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    /// Epochs completed when the checkpoint was written
    pub epoch: usize,
    /// Mean energy of the last epoch, if it produced any updates
    pub avg_energy: Option<f32>,
    pub n_visible: usize,
    pub n_hidden: usize,
    pub alpha: f32,
    pub weight: Array2<f32>,
    pub visible_bias: Array1<f32>,
    pub hidden_bias: Array1<f32>,
}

/// Write `rbm`'s parameters to `path`, creating parent directories.
pub fn save_checkpoint(rbm: &Rbm, path: &Path, epoch: usize, avg_energy: f32) -> RbmResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = CheckpointData {
        epoch,
        avg_energy: avg_energy.is_finite().then_some(avg_energy),
        n_visible: rbm.n_visible(),
        n_hidden: rbm.n_hidden(),
        alpha: rbm.alpha(),
        weight: rbm.weight().clone(),
        visible_bias: rbm.visible_bias().clone(),
        hidden_bias: rbm.hidden_bias().clone(),
    };

    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, &data)?;
    tracing::debug!(path = %path.display(), epoch, "Checkpoint written");
    Ok(())
}

/// Load a checkpoint and rebuild the model.
///
/// `seed` seeds the restored model's sampling RNG.
///
/// # Errors
/// IO and JSON errors, or `IncompatibleShape` if the stored arrays disagree
/// with each other.
pub fn load_checkpoint(path: &Path, seed: Option<u64>) -> RbmResult<(CheckpointData, Rbm)> {
    let reader = BufReader::new(File::open(path)?);
    let data: CheckpointData = serde_json::from_reader(reader)?;

    let (rows, cols) = data.weight.dim();
    if (data.n_visible, data.n_hidden) != (rows, cols) {
        return Err(RbmError::IncompatibleShape(format!(
            "Checkpoint layout {}x{} does not match weight shape {}x{}",
            data.n_visible, data.n_hidden, rows, cols
        )));
    }

    let rbm = Rbm::from_parameters(
        data.weight.clone(),
        data.visible_bias.clone(),
        data.hidden_bias.clone(),
        data.alpha,
        seed,
    )?;

    Ok((data, rbm))
}

/// Requested settings that a resumed checkpoint overrides.
///
/// Returns `(setting, requested, restored)` for each of `n_hidden` and
/// `alpha` that was requested and differs from the checkpoint.
pub fn resume_conflicts(
    data: &CheckpointData,
    n_hidden: Option<usize>,
    alpha: Option<f32>,
) -> Vec<(&'static str, String, String)> {
    let mut conflicts = Vec::new();
    if let Some(n) = n_hidden.filter(|&n| n != data.n_hidden) {
        conflicts.push(("n_hidden", n.to_string(), data.n_hidden.to_string()));
    }
    if let Some(a) = alpha.filter(|&a| (a - data.alpha).abs() > f32::EPSILON * a.abs().max(1.0)) {
        conflicts.push(("alpha", a.to_string(), data.alpha.to_string()));
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_restores_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/rbm.json");
        let rbm = Rbm::with_seed(6, 3, 0.05, 12).unwrap();

        save_checkpoint(&rbm, &path, 4, -1.5).unwrap();
        let (data, restored) = load_checkpoint(&path, Some(1)).unwrap();

        assert_eq!(data.epoch, 4);
        assert_eq!(data.avg_energy, Some(-1.5));
        assert_eq!(restored.weight(), rbm.weight());
        assert_eq!(restored.visible_bias(), rbm.visible_bias());
        assert_eq!(restored.hidden_bias(), rbm.hidden_bias());
        assert!((restored.alpha() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_nan_energy_stored_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rbm.json");
        let rbm = Rbm::with_seed(2, 2, 0.01, 0).unwrap();
        save_checkpoint(&rbm, &path, 1, f32::NAN).unwrap();
        let (data, _) = load_checkpoint(&path, None).unwrap();
        assert_eq!(data.avg_energy, None);
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rbm.json");
        let rbm = Rbm::with_seed(4, 3, 0.01, 0).unwrap();
        save_checkpoint(&rbm, &path, 1, 0.5).unwrap();

        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        json["n_hidden"] = serde_json::json!(5);
        fs::write(&path, json.to_string()).unwrap();

        let err = load_checkpoint(&path, None).unwrap_err();
        assert!(matches!(err, RbmError::IncompatibleShape(_)));
    }

    #[test]
    fn test_resume_conflicts() {
        let rbm = Rbm::with_seed(4, 3, 0.05, 0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rbm.json");
        save_checkpoint(&rbm, &path, 2, 0.0).unwrap();
        let (data, _) = load_checkpoint(&path, None).unwrap();

        assert!(resume_conflicts(&data, None, None).is_empty());
        assert!(resume_conflicts(&data, Some(3), Some(0.05)).is_empty());

        let conflicts = resume_conflicts(&data, Some(8), Some(0.1));
        let names: Vec<&str> = conflicts.iter().map(|c| c.0).collect();
        assert_eq!(names, vec!["n_hidden", "alpha"]);
        assert_eq!(conflicts[0].1, "8");
        assert_eq!(conflicts[0].2, "3");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_checkpoint(&dir.path().join("absent.json"), None).unwrap_err();
        assert!(matches!(err, crate::core::RbmError::Io(_)));
    }
}
