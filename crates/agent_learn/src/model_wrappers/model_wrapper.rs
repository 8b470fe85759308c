//! ModelWrapper - uniform lifecycle over the task-specific networks
//!
//! A wrapper owns exactly one network. Whether that network runs data
//! parallel is decided once, from the device topology, when the wrapper is
//! built. Parameter access, checkpoints and inference always go through the
//! unwrapped network, so callers never see the device layout and checkpoint
//! files are identical however many devices trained them.

use agent_model::{BatchModule, DeviceTopology, ModelArgs, ModuleContainer, Network, Task};
use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{EvaluationArgs, GameArgs, TrainingArgs};
use crate::data::{GameDataset, InstructionExample};
use crate::experiment::ExperimentLog;
use crate::learning::auxiliary::{Auxiliary, AuxiliaryData};

/// State shared by every wrapper.
pub struct WrapperBase<M: BatchModule> {
    args: ModelArgs,
    task: Task,
    parallelized: bool,
    model: ModuleContainer<M>,
    logger: Option<Arc<dyn ExperimentLog>>,
}

impl<M: BatchModule> WrapperBase<M> {
    /// Takes ownership of `network`, wrapping it for data-parallel execution
    /// when `topology` has more than one device.
    pub fn new(
        args: &ModelArgs,
        network: Network<M>,
        topology: &DeviceTopology,
        logger: Option<Arc<dyn ExperimentLog>>,
    ) -> Self {
        let parallelized = topology.is_multi_device();
        let model = if parallelized {
            tracing::info!("Using {} devices", topology.count());
            ModuleContainer::data_parallel(network, topology)
        } else {
            ModuleContainer::single(network)
        };
        tracing::info!("Model parameters on {:?}", model.module().device());

        Self {
            args: args.clone(),
            task: args.get_task(),
            parallelized,
            model,
            logger,
        }
    }

    /// The possibly-parallel container, for training forwards.
    pub fn model(&self) -> &ModuleContainer<M> {
        &self.model
    }

    pub fn device(&self) -> &Device {
        self.model.module().device()
    }

    /// Sends a scalar to the experiment session, if the wrapper has one.
    pub fn log_scalar(&self, metric: &str, value: f64, step: usize) -> Result<()> {
        match &self.logger {
            Some(logger) => logger.add_scalar_value(metric, value, step),
            None => Ok(()),
        }
    }
}

impl<M: BatchModule> fmt::Display for WrapperBase<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.model)
    }
}

pub trait ModelWrapper: fmt::Display {
    type Module: BatchModule;

    fn base(&self) -> &WrapperBase<Self::Module>;

    fn base_mut(&mut self) -> &mut WrapperBase<Self::Module>;

    /// Runs the full optimization and returns the best checkpoint's path.
    /// The path is always loadable with [`ModelWrapper::load`].
    fn train_loop(
        &mut self,
        dataset: &GameDataset,
        game_arguments: &GameArgs,
        evaluation_arguments: &EvaluationArgs,
        training_arguments: &TrainingArgs,
        experiment: &dyn ExperimentLog,
    ) -> Result<PathBuf>;

    /// Differentiable objective for a batch, plus each auxiliary's value.
    fn loss(&self, examples: &[&InstructionExample]) -> Result<(Tensor, AuxiliaryData)>;

    /// Active auxiliary objectives and their weights.
    fn get_auxiliaries(&self) -> BTreeMap<Auxiliary, f64>;

    fn named_parameters(&self) -> Vec<(String, Var)> {
        self.base().model.module().named_parameters()
    }

    fn parameters(&self) -> Vec<Var> {
        self.base().model.module().parameters()
    }

    fn train(&mut self) -> &mut ModuleContainer<Self::Module> {
        self.base_mut().model.train()
    }

    fn eval(&mut self) -> &mut ModuleContainer<Self::Module> {
        self.base_mut().model.eval()
    }

    fn save(&self, filename: &Path) -> Result<()> {
        self.base().model.module().save(filename)
    }

    fn load(&mut self, filename: &Path) -> Result<()> {
        self.base_mut().model.module_mut().load(filename)
    }

    /// Inference on a single device, bypassing any parallel wrapping.
    fn get_predictions(
        &self,
        batch: &<Self::Module as BatchModule>::Batch,
    ) -> Result<<Self::Module as BatchModule>::Prediction> {
        Ok(self.base().model.module().predict(batch)?)
    }

    fn get_task(&self) -> Task {
        self.base().task
    }

    fn get_arguments(&self) -> &ModelArgs {
        &self.base().args
    }

    fn is_parallelized(&self) -> bool {
        self.base().parallelized
    }
}
