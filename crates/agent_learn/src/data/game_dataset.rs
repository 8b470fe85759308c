//! GameDataset - games grouped by split, plus the artifacts derived from them

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::vocabulary::{self, Vocabulary};
use super::{DatasetSplit, Game, InstructionExample};
use crate::config::DataArgs;

pub const VALIDATION_SPLIT_FILENAME: &str = "validation_ids.json";

pub struct GameDataset {
    games: BTreeMap<DatasetSplit, Vec<Game>>,
    data_args: DataArgs,
    num_games: usize,
}

impl GameDataset {
    /// Groups `train_games` and `dev_games` into splits.
    ///
    /// With `randomly_split_trainval`, a seeded shuffle moves
    /// `validation_proportion` of the training games into validation.
    /// Otherwise every train or dev game listed in `validation_ids` is
    /// validation, and listed training games leave the train split. An empty
    /// list makes the dev games the validation split.
    pub fn new(
        train_games: Vec<Game>,
        dev_games: Vec<Game>,
        validation_ids: &HashSet<String>,
        data_args: &DataArgs,
        randomly_split_trainval: bool,
    ) -> Result<Self> {
        let num_games = train_games.len() + dev_games.len();

        let (train, validation) = if randomly_split_trainval {
            let mut train = train_games;
            let mut rng = StdRng::seed_from_u64(data_args.split_seed);
            train.shuffle(&mut rng);
            let held_out = ((train.len() as f64) * data_args.validation_proportion).round() as usize;
            let held_out = held_out.min(train.len().saturating_sub(1));
            let validation = train.split_off(train.len() - held_out);
            (train, validation)
        } else if validation_ids.is_empty() {
            (train_games, dev_games.clone())
        } else {
            let (validation, train): (Vec<Game>, Vec<Game>) = train_games
                .into_iter()
                .partition(|g| validation_ids.contains(&g.game_id));
            let mut validation = validation;
            validation.extend(
                dev_games
                    .iter()
                    .filter(|g| validation_ids.contains(&g.game_id))
                    .cloned(),
            );
            if validation.len() != validation_ids.len() {
                tracing::warn!(
                    "{} of {} validation ids matched no game",
                    validation_ids.len() - validation.len(),
                    validation_ids.len()
                );
            }
            (train, validation)
        };

        tracing::debug!(
            "Split games: {} train, {} dev, {} validation",
            train.len(),
            dev_games.len(),
            validation.len()
        );

        let games = BTreeMap::from([
            (DatasetSplit::Train, train),
            (DatasetSplit::Dev, dev_games),
            (DatasetSplit::Validation, validation),
        ]);
        Ok(Self {
            games,
            data_args: data_args.clone(),
            num_games,
        })
    }

    pub fn get_games(&self, split: DatasetSplit) -> &[Game] {
        self.games.get(&split).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Examples of `split`, keyed by example id.
    pub fn get_examples(&self, split: DatasetSplit) -> BTreeMap<String, InstructionExample> {
        self.get_games(split)
            .iter()
            .flat_map(|g| g.examples.iter())
            .map(|e| (e.example_id.clone(), e.clone()))
            .collect()
    }

    /// Number of games loaded, across train and dev.
    pub fn len(&self) -> usize {
        self.num_games
    }

    pub fn is_empty(&self) -> bool {
        self.num_games == 0
    }

    /// Sorted words seen at least `minimum_word_occurrence` times in
    /// training instructions, behind the special tokens.
    pub fn get_instruction_vocabulary(&self) -> Result<Vocabulary> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for example in self
            .get_games(DatasetSplit::Train)
            .iter()
            .flat_map(|g| g.examples.iter())
        {
            for word in vocabulary::words(&example.instruction) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }

        let mut words: Vec<String> = counts
            .into_iter()
            .filter(|(_, c)| *c >= self.data_args.minimum_word_occurrence)
            .map(|(w, _)| w)
            .collect();
        words.sort();
        Vocabulary::from_words(words)
    }

    /// Derives the instruction vocabulary and writes it to `directory`.
    pub fn save_vocabulary<P: AsRef<Path>>(&self, directory: P) -> Result<Vocabulary> {
        let vocabulary = self.get_instruction_vocabulary()?;
        vocabulary.save(directory)?;
        Ok(vocabulary)
    }

    /// Writes the validation game ids to `<directory>/validation_ids.json`.
    pub fn save_validation_split<P: AsRef<Path>>(&self, directory: P) -> Result<PathBuf> {
        let directory = directory.as_ref();
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create {:?}", directory))?;
        let ids: Vec<&str> = self
            .get_games(DatasetSplit::Validation)
            .iter()
            .map(|g| g.game_id.as_str())
            .collect();

        let path = directory.join(VALIDATION_SPLIT_FILENAME);
        let file = File::create(&path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(file, &ids)?;
        tracing::info!("Saved {} validation game ids to {:?}", ids.len(), path);
        Ok(path)
    }

    pub fn load_validation_split<P: AsRef<Path>>(directory: P) -> Result<HashSet<String>> {
        let path = directory.as_ref().join(VALIDATION_SPLIT_FILENAME);
        let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
        let ids: Vec<String> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(ids.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Action, AgentState, Position, Rotation};

    fn game(id: &str, instruction: &str) -> Game {
        Game {
            game_id: id.to_string(),
            examples: vec![InstructionExample {
                example_id: format!("{id}-0"),
                instruction: instruction.to_string(),
                initial_state: AgentState {
                    position: Position::new(0, 0),
                    rotation: Rotation::East,
                },
                obstacles: vec![],
                target_actions: vec![Action::Forward],
            }],
        }
    }

    fn games(prefix: &str, n: usize) -> Vec<Game> {
        (0..n).map(|i| game(&format!("{prefix}{i}"), "go right")).collect()
    }

    fn ids(dataset: &GameDataset, split: DatasetSplit) -> Vec<String> {
        dataset.get_games(split).iter().map(|g| g.game_id.clone()).collect()
    }

    #[test]
    fn test_without_resplit_validation_is_dev() -> Result<()> {
        let dataset = GameDataset::new(
            games("t", 3),
            games("d", 2),
            &HashSet::new(),
            &DataArgs::default(),
            false,
        )?;
        assert_eq!(dataset.len(), 5);
        assert_eq!(ids(&dataset, DatasetSplit::Train).len(), 3);
        assert_eq!(ids(&dataset, DatasetSplit::Validation), vec!["d0", "d1"]);
        assert_eq!(dataset.get_examples(DatasetSplit::Dev).len(), 2);
        Ok(())
    }

    #[test]
    fn test_random_split_is_seeded() -> Result<()> {
        let args = DataArgs {
            validation_proportion: 0.3,
            split_seed: 7,
            ..Default::default()
        };
        let a = GameDataset::new(games("t", 10), vec![], &HashSet::new(), &args, true)?;
        let b = GameDataset::new(games("t", 10), vec![], &HashSet::new(), &args, true)?;
        assert_eq!(ids(&a, DatasetSplit::Validation).len(), 3);
        assert_eq!(ids(&a, DatasetSplit::Train).len(), 7);
        assert_eq!(ids(&a, DatasetSplit::Validation), ids(&b, DatasetSplit::Validation));
        Ok(())
    }

    #[test]
    fn test_validation_split_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let listed: HashSet<String> = ["t1".to_string()].into();
        let dataset =
            GameDataset::new(games("t", 3), games("d", 1), &listed, &DataArgs::default(), false)?;
        assert_eq!(ids(&dataset, DatasetSplit::Train), vec!["t0", "t2"]);

        dataset.save_validation_split(dir.path())?;
        assert_eq!(GameDataset::load_validation_split(dir.path())?, listed);
        Ok(())
    }

    #[test]
    fn test_vocabulary_respects_minimum_occurrence() -> Result<()> {
        let args = DataArgs {
            minimum_word_occurrence: 2,
            ..Default::default()
        };
        let train = vec![game("a", "Go right now"), game("b", "go left")];
        let dataset = GameDataset::new(train, vec![], &HashSet::new(), &args, false)?;
        let vocabulary = dataset.get_instruction_vocabulary()?;
        assert_eq!(vocabulary.tokens(), &["<pad>", "<unk>", "go"]);
        Ok(())
    }
}
