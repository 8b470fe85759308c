//! Experiment logging - named streams of scalar training metrics
//!
//! Scalars go to a crayon server over HTTP when one is configured, otherwise
//! to a JSON-lines file in the save directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::TrainingArgs;

pub const LOCAL_LOG_FILENAME: &str = "scalars.jsonl";

pub trait ExperimentLog: Send + Sync {
    fn name(&self) -> &str;

    fn add_scalar_value(&self, metric: &str, value: f64, step: usize) -> Result<()>;
}

fn wall_time() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

pub struct CrayonClient {
    agent: ureq::Agent,
    base_url: String,
}

impl CrayonClient {
    pub fn new(hostname: &str, port: u16) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            agent,
            base_url: format!("http://{}:{}", hostname, port),
        }
    }

    pub fn create_experiment(&self, name: &str) -> Result<CrayonExperiment> {
        let url = format!("{}/data", self.base_url);
        self.agent
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&serde_json::to_string(name)?)
            .with_context(|| format!("Failed to create experiment '{}' at {}", name, url))?;
        tracing::info!("Created experiment '{}' at {}", name, self.base_url);
        Ok(CrayonExperiment {
            agent: self.agent.clone(),
            base_url: self.base_url.clone(),
            name: name.to_string(),
        })
    }
}

pub struct CrayonExperiment {
    agent: ureq::Agent,
    base_url: String,
    name: String,
}

impl ExperimentLog for CrayonExperiment {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_scalar_value(&self, metric: &str, value: f64, step: usize) -> Result<()> {
        let body = serde_json::to_string(&(wall_time(), step, value))?;
        self.agent
            .post(&format!("{}/data/scalars", self.base_url))
            .query("xp", &self.name)
            .query("name", metric)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .with_context(|| format!("Failed to log scalar '{}'", metric))?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScalarRecord {
    pub experiment: String,
    pub metric: String,
    pub step: usize,
    pub value: f64,
    pub wall_time: f64,
}

/// Appends one [`ScalarRecord`] per line to a local file.
pub struct LocalExperiment {
    name: String,
    path: PathBuf,
    file: Mutex<File>,
}

impl LocalExperiment {
    pub fn create<P: AsRef<Path>>(name: &str, directory: P) -> Result<Self> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create {:?}", directory))?;
        let path = directory.join(LOCAL_LOG_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        Ok(Self {
            name: name.to_string(),
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ExperimentLog for LocalExperiment {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_scalar_value(&self, metric: &str, value: f64, step: usize) -> Result<()> {
        let record = ScalarRecord {
            experiment: self.name.clone(),
            metric: metric.to_string(),
            step,
            value,
            wall_time: wall_time(),
        };
        let line = serde_json::to_string(&record)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("Scalar log lock poisoned"))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Opens the experiment session for a training run, keyed by its name.
pub fn open_experiment(training: &TrainingArgs) -> Result<Arc<dyn ExperimentLog>> {
    let name = training.get_experiment_name();
    tracing::info!("Starting experiment: {}", name);
    match &training.experiment_server {
        Some(hostname) => {
            let client = CrayonClient::new(hostname, training.experiment_port);
            Ok(Arc::new(client.create_experiment(name)?))
        }
        None => {
            let local = LocalExperiment::create(name, training.get_save_directory())?;
            tracing::info!("Logging scalars to {:?}", local.path());
            Ok(Arc::new(local))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn test_local_experiment_appends_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let training = TrainingArgs {
            experiment_name: "exp".to_string(),
            save_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let experiment = open_experiment(&training)?;
        assert_eq!(experiment.name(), "exp");
        experiment.add_scalar_value("loss", 1.5, 0)?;
        experiment.add_scalar_value("loss", 0.5, 1)?;

        let file = File::open(dir.path().join("exp").join(LOCAL_LOG_FILENAME))?;
        let records: Vec<ScalarRecord> = BufReader::new(file)
            .lines()
            .map(|l| Ok(serde_json::from_str(&l?)?))
            .collect::<Result<_>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].step, 1);
        assert_eq!(records[1].value, 0.5);
        Ok(())
    }
}
