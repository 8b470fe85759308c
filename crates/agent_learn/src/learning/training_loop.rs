//! Training Loop - epoch loop shared by every model wrapper

use anyhow::Result;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::path::PathBuf;
use tracing::info;

use super::checkpoint::{self, TrainingState};
use crate::config::TrainingArgs;
use crate::data::InstructionExample;
use crate::experiment::ExperimentLog;
use crate::model_wrappers::ModelWrapper;

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Mean loss over `examples` in eval mode, without gradient steps.
fn validation_loss<W: ModelWrapper>(
    wrapper: &W,
    examples: &[&InstructionExample],
    batch_size: usize,
) -> Result<f32> {
    let mut total = 0f32;
    let mut batches = 0usize;
    for chunk in examples.chunks(batch_size) {
        let (loss, _) = wrapper.loss(chunk)?;
        total += loss.to_scalar::<f32>()?;
        batches += 1;
    }
    Ok(if batches == 0 { 0.0 } else { total / batches as f32 })
}

/// Trains `wrapper` on `train_examples` with AdamW and returns the path of
/// the checkpoint with the highest `score`.
///
/// `score` is computed on the validation examples after every epoch; higher
/// is better. Training stops early after `patience` epochs without
/// improvement. Only the newest `keep_checkpoints` checkpoints stay on disk,
/// besides the best one.
pub fn run_epochs<W, F>(
    wrapper: &mut W,
    train_examples: &[&InstructionExample],
    validation_examples: &[&InstructionExample],
    training_arguments: &TrainingArgs,
    experiment: &dyn ExperimentLog,
    mut score: F,
) -> Result<PathBuf>
where
    W: ModelWrapper,
    F: FnMut(&W, &[&InstructionExample], usize) -> Result<f64>,
{
    if train_examples.is_empty() {
        anyhow::bail!("The training split contains no examples");
    }
    if validation_examples.is_empty() {
        anyhow::bail!("The validation split contains no examples");
    }
    if training_arguments.patience == 0 {
        anyhow::bail!("patience must be at least 1 epoch");
    }

    let save_directory = training_arguments.get_save_directory();
    std::fs::create_dir_all(&save_directory)?;

    let batch_size = training_arguments.batch_size;
    let num_batches = train_examples.len().div_ceil(batch_size);
    info!(
        "Training on {} examples ({} batches/epoch), validating on {}",
        train_examples.len(),
        num_batches,
        validation_examples.len()
    );

    let params = ParamsAdamW {
        lr: training_arguments.learning_rate,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(wrapper.parameters(), params)?;
    let mut rng = StdRng::seed_from_u64(training_arguments.seed);
    let mut order: Vec<usize> = (0..train_examples.len()).collect();

    let mut best: Option<TrainingState> = None;
    let mut epochs_without_improvement = 0usize;
    let mut kept: VecDeque<usize> = VecDeque::new();
    let mut step = 0usize;

    for epoch in 0..training_arguments.num_epochs {
        wrapper.train();
        order.shuffle(&mut rng);

        let pb = progress_bar(num_batches);
        pb.set_prefix(format!("Epoch {}", epoch));
        let mut epoch_loss = 0f32;
        for chunk in order.chunks(batch_size) {
            let batch: Vec<&InstructionExample> =
                chunk.iter().map(|&i| train_examples[i]).collect();
            let (loss, auxiliaries) = wrapper.loss(&batch)?;
            optimizer.backward_step(&loss)?;

            let loss_value = loss.to_scalar::<f32>()?;
            epoch_loss += loss_value;
            experiment.add_scalar_value("loss", loss_value as f64, step)?;
            for (auxiliary, value) in &auxiliaries {
                experiment.add_scalar_value(&format!("{}_loss", auxiliary), *value as f64, step)?;
            }
            step += 1;
            pb.set_message(format!("loss {:.4}", loss_value));
            pb.inc(1);
        }
        pb.finish_and_clear();
        let train_loss = epoch_loss / num_batches as f32;

        wrapper.eval();
        let val_loss = validation_loss(wrapper, validation_examples, batch_size)?;
        let val_score = score(wrapper, validation_examples, epoch)?;
        experiment.add_scalar_value("validation_loss", val_loss as f64, epoch)?;
        experiment.add_scalar_value("validation_score", val_score, epoch)?;

        let state = TrainingState::new(epoch, train_loss, val_loss, val_score);
        let path = save_directory.join(&state.checkpoint);
        checkpoint::save_securely(&path, |p| wrapper.save(p))?;
        checkpoint::save_training_state(&save_directory, &state)?;

        let improved = best
            .as_ref()
            .map_or(true, |b| state.validation_score > b.validation_score);
        info!(
            "Epoch {:3} | Loss: {:.4} | Val Loss: {:.4} | Val Score: {:.4}{}",
            epoch,
            train_loss,
            val_loss,
            val_score,
            if improved { " (best)" } else { "" }
        );
        if improved {
            checkpoint::save_best_state(&save_directory, &state)?;
            best = Some(state);
            epochs_without_improvement = 0;
        } else {
            epochs_without_improvement += 1;
        }

        kept.push_back(epoch);
        let best_epoch = best.as_ref().map(|b| b.epoch);
        while kept.iter().filter(|&&e| Some(e) != best_epoch).count()
            > training_arguments.keep_checkpoints
        {
            let Some(position) = kept.iter().position(|&e| Some(e) != best_epoch) else {
                break;
            };
            if let Some(old) = kept.remove(position) {
                checkpoint::remove_checkpoint(&save_directory, old)?;
            }
        }

        if epochs_without_improvement >= training_arguments.patience {
            info!(
                "No improvement for {} epochs, stopping early",
                epochs_without_improvement
            );
            break;
        }
    }

    match best {
        Some(state) => {
            info!(
                "Best epoch {} with validation score {:.4}",
                state.epoch, state.validation_score
            );
            Ok(save_directory.join(state.checkpoint))
        }
        None => anyhow::bail!("Training ran no epochs (num_epochs = 0)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameArgs;
    use crate::data::Vocabulary;
    use crate::experiment::LocalExperiment;
    use crate::game::{Action, AgentState, Position, Rotation};
    use crate::model_wrappers::PlanPredictorModelWrapper;
    use agent_model::{DeviceTopology, ModelArgs};
    use std::path::Path;

    fn examples() -> Vec<InstructionExample> {
        (0..4)
            .map(|i| InstructionExample {
                example_id: format!("e{i}"),
                instruction: if i % 2 == 0 { "go north" } else { "turn right" }.to_string(),
                initial_state: AgentState {
                    position: Position::new(1, 1),
                    rotation: Rotation::North,
                },
                obstacles: vec![],
                target_actions: if i % 2 == 0 {
                    vec![Action::Forward]
                } else {
                    vec![Action::TurnRight]
                },
            })
            .collect()
    }

    fn wrapper() -> Result<PlanPredictorModelWrapper> {
        let model_args = ModelArgs {
            embedding_size: 8,
            hidden_size: 8,
            dropout: 0.0,
            ..Default::default()
        };
        let game = GameArgs {
            board_width: 3,
            board_height: 3,
        };
        let vocabulary = Vocabulary::from_words(["go", "north", "turn", "right"].map(String::from))?;
        PlanPredictorModelWrapper::new(&model_args, &game, &vocabulary, &DeviceTopology::cpu(), None)
    }

    fn training_args(root: &Path, num_epochs: usize, patience: usize, keep: usize) -> TrainingArgs {
        TrainingArgs {
            experiment_name: "loop".to_string(),
            save_directory: root.to_path_buf(),
            num_epochs,
            batch_size: 2,
            patience,
            keep_checkpoints: keep,
            ..Default::default()
        }
    }

    /// Trains with validation scores taken from `scores`, one per epoch.
    fn run_scripted(args: &TrainingArgs, scores: &[f64]) -> Result<(PathBuf, usize)> {
        let examples = examples();
        let examples: Vec<&InstructionExample> = examples.iter().collect();
        let experiment = LocalExperiment::create("loop", args.get_save_directory())?;
        let mut model = wrapper()?;
        let mut epochs_run = 0;
        let best = run_epochs(&mut model, &examples, &examples, args, &experiment, |_, _, epoch| {
            epochs_run += 1;
            Ok(scores[epoch])
        })?;
        Ok((best, epochs_run))
    }

    fn saved_checkpoints(directory: &Path) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(directory)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".safetensors"))
            .collect();
        names.sort();
        Ok(names)
    }

    #[test]
    fn test_early_stop_keeps_only_the_best_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let args = training_args(dir.path(), 10, 3, 0);
        // Epoch 3 ties the best score, which is not an improvement.
        let scores = [0.1, 0.5, 0.3, 0.5, 0.2, 0.9, 0.9, 0.9, 0.9, 0.9];

        let (best, epochs_run) = run_scripted(&args, &scores)?;

        let save_directory = args.get_save_directory();
        assert_eq!(epochs_run, 5);
        assert_eq!(best, save_directory.join("model_1.safetensors"));
        assert_eq!(saved_checkpoints(&save_directory)?, vec!["model_1.safetensors"]);

        let best_state = checkpoint::load_best_state(&save_directory)?;
        assert_eq!(best_state.epoch, 1);
        assert_eq!(best_state.checkpoint, "model_1.safetensors");
        assert_eq!(checkpoint::load_training_state(&save_directory)?.epoch, 4);
        Ok(())
    }

    #[test]
    fn test_rotation_never_removes_the_best_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let args = training_args(dir.path(), 6, 10, 2);
        let scores = [0.9, 0.1, 0.2, 0.3, 0.4, 0.5];

        let (best, epochs_run) = run_scripted(&args, &scores)?;

        let save_directory = args.get_save_directory();
        assert_eq!(epochs_run, 6);
        assert_eq!(best, save_directory.join("model_0.safetensors"));
        assert_eq!(
            saved_checkpoints(&save_directory)?,
            vec!["model_0.safetensors", "model_4.safetensors", "model_5.safetensors"]
        );
        assert!(!save_directory.join("model_3.json").exists());
        assert!(save_directory.join("model_5.json").exists());
        Ok(())
    }

    #[test]
    fn test_zero_patience_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let args = training_args(dir.path(), 3, 0, 1);
        assert!(run_scripted(&args, &[0.0; 3]).is_err());
        Ok(())
    }
}
