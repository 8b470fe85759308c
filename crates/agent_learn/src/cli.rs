use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ProgramArgs;
use crate::data::DatasetSplit;

#[derive(Parser)]
#[command(author, version, about = "Instruction-following agent toolchain", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model from a configuration file
    Train(TrainCommand),

    /// Evaluate a finished training run
    Evaluate(EvaluateCommand),
}

#[derive(Args, Debug, Clone)]
pub struct TrainCommand {
    /// Program configuration (JSON)
    #[arg(long)]
    pub config: PathBuf,

    #[arg(long)]
    pub experiment_name: Option<String>,

    #[arg(long)]
    pub save_directory: Option<PathBuf>,

    /// Send progress messages to Slack
    #[arg(long, action)]
    pub slack: bool,
}

impl TrainCommand {
    /// The configuration file with the command-line overrides applied.
    pub fn resolve(&self) -> Result<ProgramArgs> {
        let mut args = ProgramArgs::from_file(&self.config)?;
        if let Some(name) = &self.experiment_name {
            args.training.experiment_name = name.clone();
        }
        if let Some(directory) = &self.save_directory {
            args.training.save_directory = directory.clone();
        }
        if self.slack {
            args.training.log_with_slack = true;
        }
        Ok(args)
    }
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateCommand {
    /// Save directory of the run (holds args.json)
    #[arg(long)]
    pub save_directory: PathBuf,

    /// Checkpoint to evaluate instead of the run's best one
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = DatasetSplit::Dev)]
    pub split: DatasetSplit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_on_top_of_the_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"training": {"experiment_name": "from_file"}}"#)?;

        let cli = Cli::try_parse_from([
            "agent_learn",
            "train",
            "--config",
            path.to_str().unwrap_or_default(),
            "--experiment-name",
            "override",
            "--slack",
        ])?;
        let Commands::Train(command) = cli.command else {
            panic!("expected the train command");
        };
        let args = command.resolve()?;
        assert_eq!(args.training.experiment_name, "override");
        assert!(args.training.log_with_slack);
        Ok(())
    }

    #[test]
    fn test_evaluate_defaults_to_dev() -> Result<()> {
        let cli = Cli::try_parse_from(["agent_learn", "evaluate", "--save-directory", "runs/x"])?;
        let Commands::Evaluate(command) = cli.command else {
            panic!("expected the evaluate command");
        };
        assert_eq!(command.split, DatasetSplit::Dev);
        assert!(command.checkpoint.is_none());
        Ok(())
    }
}
