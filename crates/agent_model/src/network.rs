//! Network - one module together with its parameter store

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::model::BatchModule;

/// Owns exactly one module and the `VarMap` holding its parameters.
///
/// Checkpoints are the `VarMap` serialized as safetensors, keyed by
/// parameter name, so they never depend on how the network was run.
pub struct Network<M: BatchModule> {
    module: M,
    varmap: VarMap,
    config: M::Config,
    device: Device,
    training: bool,
}

fn lock_error() -> candle_core::Error {
    candle_core::Error::Msg("VarMap lock poisoned".to_string())
}

impl<M: BatchModule> Network<M> {
    pub fn new(config: M::Config, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let module = M::load(&config, vb)
            .with_context(|| format!("Failed to build {}", M::NAME))?;
        Ok(Self {
            module,
            varmap,
            config,
            device: device.clone(),
            training: true,
        })
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn config(&self) -> &M::Config {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn forward(&self, batch: &M::Batch) -> candle_core::Result<M::Output> {
        self.module.forward(batch, self.training)
    }

    pub fn predict(&self, batch: &M::Batch) -> candle_core::Result<M::Prediction> {
        self.module.predict(batch)
    }

    /// Parameters sorted by name.
    pub fn named_parameters(&self) -> Vec<(String, Var)> {
        let data = self.varmap.data().lock().expect("Failed to lock VarMap");
        let mut params: Vec<(String, Var)> =
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        params.sort_by(|a, b| a.0.cmp(&b.0));
        params
    }

    pub fn parameters(&self) -> Vec<Var> {
        self.named_parameters().into_iter().map(|(_, v)| v).collect()
    }

    pub fn num_parameters(&self) -> usize {
        self.named_parameters()
            .iter()
            .map(|(_, v)| v.as_tensor().elem_count())
            .sum()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .save(path)
            .with_context(|| format!("Failed to save {} to {:?}", M::NAME, path))
    }

    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .load(path)
            .with_context(|| format!("Failed to load {} from {:?}", M::NAME, path))
    }

    /// Loads a checkpoint of a sub-module into the parameters under `prefix.`.
    ///
    /// Every parameter under the prefix must be present in the checkpoint.
    /// Returns the number of tensors loaded.
    pub fn load_pretrained<P: AsRef<Path>>(&mut self, path: P, prefix: &str) -> Result<usize> {
        let path = path.as_ref();
        let tensors = candle_core::safetensors::load(path, &self.device)
            .with_context(|| format!("Failed to read pretrained weights {:?}", path))?;

        let data = self.varmap.data().lock().map_err(|_| lock_error())?;
        let expected = data
            .keys()
            .filter(|k| k.starts_with(&format!("{prefix}.")))
            .count();

        let mut loaded = 0;
        for (name, tensor) in tensors.iter() {
            let key = format!("{prefix}.{name}");
            let var = data
                .get(&key)
                .with_context(|| format!("Pretrained tensor '{}' has no slot '{}'", name, key))?;
            var.set(tensor)
                .with_context(|| format!("Pretrained tensor '{}' does not fit", name))?;
            loaded += 1;
        }

        if loaded != expected {
            anyhow::bail!(
                "Pretrained weights {:?} cover {} of {} parameters under '{}'",
                path,
                loaded,
                expected,
                prefix
            );
        }
        tracing::info!("Loaded {} pretrained tensors into '{}' from {:?}", loaded, prefix, path);
        Ok(loaded)
    }

    /// Builds a copy of the module on `device` whose parameters are
    /// differentiable copies of the master parameters.
    pub fn replicate(&self, device: &Device) -> candle_core::Result<M> {
        let tensors: HashMap<String, Tensor> = {
            let data = self.varmap.data().lock().map_err(|_| lock_error())?;
            data.iter()
                .map(|(k, v)| Ok((k.clone(), v.as_tensor().to_device(device)?)))
                .collect::<candle_core::Result<_>>()?
        };
        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        M::load(&self.config, vb)
    }
}

impl<M: BatchModule> fmt::Display for Network<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} parameters, {:?}, {})",
            M::NAME,
            self.num_parameters(),
            self.device,
            if self.training { "train" } else { "eval" }
        )?;
        for (name, var) in self.named_parameters() {
            writeln!(f, "  {}: {:?}", name, var.as_tensor().dims())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlanPredictor, PlanPredictorConfig};

    fn config() -> PlanPredictorConfig {
        PlanPredictorConfig {
            vocab_size: 6,
            embedding_dim: 4,
            hidden_dim: 4,
            cell_feature_dim: 2,
            dropout: 0.0,
        }
    }

    #[test]
    fn test_named_parameters_sorted_and_complete() -> Result<()> {
        let network = Network::<PlanPredictor>::new(config(), &Device::Cpu)?;
        let names: Vec<String> = network.named_parameters().into_iter().map(|(n, _)| n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"encoder.embedding.weight".to_string()));
        assert_eq!(network.parameters().len(), names.len());
        assert!(network.num_parameters() > 0);
        Ok(())
    }

    #[test]
    fn test_mode_toggle() -> Result<()> {
        let mut network = Network::<PlanPredictor>::new(config(), &Device::Cpu)?;
        assert!(network.is_training());
        network.eval();
        assert!(!network.is_training());
        assert!(network.to_string().contains("eval"));
        network.train();
        assert!(network.is_training());
        Ok(())
    }

    #[test]
    fn test_load_rejects_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut network = Network::<PlanPredictor>::new(config(), &Device::Cpu)?;
        assert!(network.load(dir.path().join("missing.safetensors")).is_err());
        Ok(())
    }
}
