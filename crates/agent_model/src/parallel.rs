//! Data-parallel execution of a network across several devices

use candle_core::{Device, Result};
use std::fmt;

use crate::device_utils::DeviceTopology;
use crate::model::{BatchModule, Gather, Scatter};
use crate::network::Network;

/// Splits each batch's rows over the devices and runs one replica per device.
///
/// Replicas are rebuilt on every forward from device copies of the master
/// parameters, so they always see the latest weights and gradients flow
/// back to the master variables through the copies.
pub struct DataParallel<M: BatchModule> {
    network: Network<M>,
    devices: Vec<Device>,
}

impl<M: BatchModule> DataParallel<M> {
    pub fn new(network: Network<M>, devices: Vec<Device>) -> Self {
        Self { network, devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn forward(&self, batch: &M::Batch) -> Result<M::Output> {
        let rows = batch.batch_size();
        let shards = self.devices.len().min(rows);
        if shards <= 1 {
            return self.network.forward(batch);
        }

        let chunk = rows.div_ceil(shards);
        let train = self.network.is_training();
        let mut outputs = Vec::with_capacity(shards);
        for (i, device) in self.devices.iter().enumerate() {
            let start = i * chunk;
            if start >= rows {
                break;
            }
            let len = chunk.min(rows - start);
            let shard = batch.narrow(start, len)?.to_device(device)?;

            let output = if i == 0 {
                self.network.module().forward(&shard, train)?
            } else {
                self.network.replicate(device)?.forward(&shard, train)?
            };
            outputs.push(output);
        }

        tracing::debug!("Scattered {} rows over {} devices", rows, outputs.len());
        <M::Output as Gather>::gather(outputs, self.network.device())
    }
}

/// The owned network, optionally wrapped for data-parallel execution.
pub enum ModuleContainer<M: BatchModule> {
    Single(Network<M>),
    DataParallel(DataParallel<M>),
}

impl<M: BatchModule> ModuleContainer<M> {
    /// Wraps `network` for data-parallel execution over every device of `topology`.
    pub fn data_parallel(network: Network<M>, topology: &DeviceTopology) -> Self {
        ModuleContainer::DataParallel(DataParallel::new(network, topology.devices().to_vec()))
    }

    pub fn single(network: Network<M>) -> Self {
        ModuleContainer::Single(network)
    }

    pub fn is_data_parallel(&self) -> bool {
        matches!(self, ModuleContainer::DataParallel(_))
    }

    /// The underlying network, regardless of wrapping.
    pub fn module(&self) -> &Network<M> {
        match self {
            ModuleContainer::Single(network) => network,
            ModuleContainer::DataParallel(dp) => &dp.network,
        }
    }

    pub fn module_mut(&mut self) -> &mut Network<M> {
        match self {
            ModuleContainer::Single(network) => network,
            ModuleContainer::DataParallel(dp) => &mut dp.network,
        }
    }

    pub fn forward(&self, batch: &M::Batch) -> Result<M::Output> {
        match self {
            ModuleContainer::Single(network) => network.forward(batch),
            ModuleContainer::DataParallel(dp) => dp.forward(batch),
        }
    }

    pub fn train(&mut self) -> &mut Self {
        self.module_mut().train();
        self
    }

    pub fn eval(&mut self) -> &mut Self {
        self.module_mut().eval();
        self
    }
}

impl<M: BatchModule> fmt::Display for ModuleContainer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleContainer::Single(network) => write!(f, "{}", network),
            ModuleContainer::DataParallel(dp) => {
                writeln!(f, "DataParallel over {} devices", dp.devices.len())?;
                write!(f, "{}", dp.network)
            }
        }
    }
}
