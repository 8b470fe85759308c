use agent_learn::config::{GameArgs, ProgramArgs, Task};
use agent_learn::data::{Game, InstructionExample, Vocabulary};
use agent_learn::evaluation::action_generator_metrics::{
    POSITION_ACCURACY, SEQUENCE_ACCURACY, STATE_ACCURACY,
};
use agent_learn::evaluation::evaluate_saved_run;
use agent_learn::game::{Action, AgentState, Position, Rotation};
use agent_learn::learning::training::evaluate_on_dev;
use agent_learn::model_wrappers::{
    get_model_wrapper, AgentModel, ModelWrapper, PlanPredictorModelWrapper,
};
use agent_learn::{run_training, DevEvaluation};
use agent_model::DeviceTopology;
use anyhow::Result;
use candle_core::Device;
use std::path::Path;

const INSTRUCTIONS: [(&str, &[Action]); 4] = [
    ("go forward", &[Action::Forward]),
    ("turn right then go forward", &[Action::TurnRight, Action::Forward]),
    ("turn left then go forward", &[Action::TurnLeft, Action::Forward]),
    ("go forward twice", &[Action::Forward, Action::Forward]),
];

fn games(prefix: &str, count: usize) -> Vec<Game> {
    (0..count)
        .map(|g| Game {
            game_id: format!("{prefix}{g}"),
            examples: INSTRUCTIONS
                .iter()
                .enumerate()
                .map(|(i, (text, actions))| InstructionExample {
                    example_id: format!("{prefix}{g}-{i}"),
                    instruction: text.to_string(),
                    initial_state: AgentState {
                        position: Position::new(1, 2),
                        rotation: Rotation::North,
                    },
                    obstacles: if g % 2 == 0 {
                        vec![Position::new(0, 0)]
                    } else {
                        vec![]
                    },
                    target_actions: actions.to_vec(),
                })
                .collect(),
        })
        .collect()
}

fn write_data(directory: &Path) -> Result<()> {
    std::fs::create_dir_all(directory)?;
    std::fs::write(directory.join("train.json"), serde_json::to_string(&games("t", 3))?)?;
    std::fs::write(directory.join("dev.json"), serde_json::to_string(&games("d", 1))?)?;
    Ok(())
}

fn program_args(root: &Path, experiment: &str, task: Task) -> ProgramArgs {
    let mut args = ProgramArgs::default();
    args.data.data_directory = root.join("data");
    args.game = GameArgs {
        board_width: 3,
        board_height: 3,
    };
    args.model.task = task;
    args.model.embedding_size = 8;
    args.model.hidden_size = 8;
    args.model.dropout = 0.0;
    args.training.experiment_name = experiment.to_string();
    args.training.save_directory = root.join("runs");
    args.training.num_epochs = 2;
    args.training.batch_size = 4;
    args.training.learning_rate = 1e-2;
    args.evaluation.maximum_generation_length = 4;
    args
}

fn cpus(count: usize) -> Result<DeviceTopology> {
    DeviceTopology::from_devices(vec![Device::Cpu; count])
}

#[test]
fn test_plan_predictor_run_derives_and_saves_vocabulary() -> Result<()> {
    let root = tempfile::tempdir()?;
    write_data(&root.path().join("data"))?;
    let args = program_args(root.path(), "plan", Task::PlanPredictor);

    let outcome = run_training(&args, &cpus(1)?)?;
    let save_directory = args.training.get_save_directory();

    assert!(outcome.best_checkpoint.exists());
    assert!(outcome.best_checkpoint.starts_with(&save_directory));
    for name in ["args.json", "tokenizer.json", "validation_ids.json", "best_state.json", "scalars.jsonl"] {
        assert!(save_directory.join(name).exists(), "missing {}", name);
    }

    assert!(outcome.vocabulary.source().is_none());
    assert_eq!(Vocabulary::load(&save_directory)?, outcome.vocabulary);
    assert!(matches!(outcome.evaluation, DevEvaluation::Plan(_)));
    assert_eq!(outcome.model.get_task(), Task::PlanPredictor);
    assert!(!outcome.model.is_parallelized());
    Ok(())
}

#[test]
fn test_end_to_end_action_generator_reuses_pretrained_vocabulary() -> Result<()> {
    let root = tempfile::tempdir()?;
    write_data(&root.path().join("data"))?;
    let plan_args = program_args(root.path(), "plan", Task::PlanPredictor);
    let plan = run_training(&plan_args, &cpus(1)?)?;

    let mut args = program_args(root.path(), "actions", Task::ActionGenerator);
    args.model.decoder.end_to_end = true;
    args.model.decoder.pretrained_plan_predictor_filepath = Some(plan.best_checkpoint.clone());

    let outcome = run_training(&args, &cpus(2)?)?;

    let pretrained_directory = plan_args.training.get_save_directory();
    assert_eq!(outcome.vocabulary.source(), Some(pretrained_directory.as_path()));
    assert_eq!(outcome.vocabulary, plan.vocabulary);
    assert!(!args.training.get_save_directory().join("tokenizer.json").exists());

    assert!(outcome.model.is_parallelized());
    let DevEvaluation::Execution(results) = outcome.evaluation else {
        panic!("action generator must report execution accuracies");
    };
    for metric in [SEQUENCE_ACCURACY, POSITION_ACCURACY, STATE_ACCURACY] {
        assert!((0.0..=1.0).contains(&results[metric]));
    }
    Ok(())
}

#[test]
fn test_parallel_decision_is_fixed_at_construction() -> Result<()> {
    let root = tempfile::tempdir()?;
    let args = program_args(root.path(), "decision", Task::ActionGenerator);
    let vocabulary = Vocabulary::from_words(["go", "forward"].map(String::from))?;

    let AgentModel::ActionGenerator(mut single) =
        get_model_wrapper(&args.model, &args.game, &vocabulary, &cpus(1)?, None, false)?
    else {
        panic!("expected an action generator");
    };
    let AgentModel::ActionGenerator(mut parallel) =
        get_model_wrapper(&args.model, &args.game, &vocabulary, &cpus(3)?, None, false)?
    else {
        panic!("expected an action generator");
    };

    assert!(!single.is_parallelized());
    assert!(parallel.is_parallelized());
    for _ in 0..2 {
        assert!(parallel.eval().is_data_parallel());
        assert!(parallel.train().is_data_parallel());
        assert!(!single.train().is_data_parallel());
    }
    assert!(parallel.is_parallelized());
    assert_eq!(parallel.get_task(), Task::ActionGenerator);
    assert_eq!(parallel.get_arguments(), &args.model);
    assert!(parallel.get_auxiliaries().is_empty());
    Ok(())
}

fn assert_same_parameters(expected: &impl ModelWrapper, actual: &impl ModelWrapper) -> Result<()> {
    let expected = expected.named_parameters();
    let actual = actual.named_parameters();
    assert_eq!(expected.len(), actual.len());
    for ((n1, v1), (n2, v2)) in expected.iter().zip(actual.iter()) {
        assert_eq!(n1, n2);
        let diff = (v1.as_tensor() - v2.as_tensor())?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0, "parameter {} differs", n1);
    }
    Ok(())
}

#[test]
fn test_checkpoints_round_trip_across_parallelism() -> Result<()> {
    let root = tempfile::tempdir()?;
    let args = program_args(root.path(), "round_trip", Task::PlanPredictor);
    let vocabulary = Vocabulary::from_words(["go", "forward", "twice"].map(String::from))?;
    let build = |devices: usize| -> Result<PlanPredictorModelWrapper> {
        match get_model_wrapper(&args.model, &args.game, &vocabulary, &cpus(devices)?, None, false)? {
            AgentModel::PlanPredictor(wrapper) => Ok(wrapper),
            other => panic!("expected a plan predictor, got {}", other),
        }
    };
    let dev = games("d", 1);
    let examples: Vec<&InstructionExample> = dev[0].examples.iter().collect();

    // Parallel to single.
    let parallel = build(2)?;
    let mut single = build(1)?;
    let path = root.path().join("parallel.safetensors");
    parallel.save(&path)?;
    single.load(&path)?;
    assert_same_parameters(&parallel, &single)?;
    assert_eq!(parallel.parameters().len(), single.named_parameters().len());

    // Single to parallel, and single to single.
    let source = build(1)?;
    let mut wide = build(3)?;
    let mut narrow = build(1)?;
    let path = root.path().join("single.safetensors");
    source.save(&path)?;
    wide.load(&path)?;
    narrow.load(&path)?;
    assert!(wide.is_parallelized());
    assert_same_parameters(&source, &wide)?;
    assert_same_parameters(&source, &narrow)?;

    let expected = source.predict(&examples)?;
    assert_eq!(wide.predict(&examples)?, expected);
    assert_eq!(narrow.predict(&examples)?, expected);
    Ok(())
}

#[test]
fn test_dev_evaluation_follows_the_task() -> Result<()> {
    let root = tempfile::tempdir()?;
    let vocabulary = Vocabulary::from_words(["go", "forward"].map(String::from))?;
    let dev = games("d", 1);
    let examples: Vec<&InstructionExample> = dev[0].examples.iter().collect();

    for task in [Task::PlanPredictor, Task::ActionGenerator] {
        let args = program_args(root.path(), "branch", task);
        let model = get_model_wrapper(&args.model, &args.game, &vocabulary, &cpus(1)?, None, false)?;
        match (task, evaluate_on_dev(&model, &args, &examples)?) {
            (Task::PlanPredictor, DevEvaluation::Plan(metrics)) => {
                assert_eq!(metrics.num_examples, examples.len())
            }
            (Task::ActionGenerator, DevEvaluation::Execution(results)) => {
                assert_eq!(results.len(), 3)
            }
            (task, evaluation) => panic!("{} produced {:?}", task, evaluation),
        }
    }
    Ok(())
}

#[test]
fn test_saved_run_reevaluates_to_the_same_metrics() -> Result<()> {
    let root = tempfile::tempdir()?;
    write_data(&root.path().join("data"))?;
    let args = program_args(root.path(), "reevaluate", Task::PlanPredictor);
    let outcome = run_training(&args, &cpus(1)?)?;

    let evaluation = evaluate_saved_run(
        &args.training.get_save_directory(),
        None,
        agent_learn::data::DatasetSplit::Dev,
        &cpus(1)?,
    )?;
    assert_eq!(evaluation, outcome.evaluation);
    Ok(())
}
