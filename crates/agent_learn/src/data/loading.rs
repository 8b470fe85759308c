use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{DatasetSplit, Game, Vocabulary};
use crate::config::{DataArgs, GameArgs};

/// Reads `<data_directory>/<split>.json`, a JSON array of games.
pub fn load_data(split: DatasetSplit, data_args: &DataArgs, game_args: &GameArgs) -> Result<Vec<Game>> {
    let path = data_args
        .data_directory
        .join(format!("{}.json", split.file_stem()));
    if !path.exists() {
        anyhow::bail!("Data for split '{}' not found at {:?}", split, path);
    }

    let file = File::open(&path).with_context(|| format!("Failed to open {:?}", path))?;
    let games: Vec<Game> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {:?}", path))?;

    for example in games.iter().flat_map(|g| g.examples.iter()) {
        example.validate(game_args)?;
    }

    let num_examples: usize = games.iter().map(|g| g.examples.len()).sum();
    tracing::info!(
        "Loaded {} games ({} instructions) for split '{}'",
        games.len(),
        num_examples,
        split
    );
    Ok(games)
}

pub fn load_vocabulary<P: AsRef<Path>>(directory: P) -> Result<Vocabulary> {
    Vocabulary::load(directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_split_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = DataArgs {
            data_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = load_data(DatasetSplit::Dev, &args, &GameArgs::default()).unwrap_err();
        assert!(err.to_string().contains("dev"));
    }

    #[test]
    fn test_off_board_example_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("train.json"),
            r#"[{"game_id": "g", "examples": [{
                "example_id": "g-0", "instruction": "go",
                "initial_state": {"position": {"x": 5, "y": 0}, "rotation": "north"},
                "target_actions": ["forward"]}]}]"#,
        )?;
        let args = DataArgs {
            data_directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let game = GameArgs {
            board_width: 3,
            board_height: 3,
        };
        assert!(load_data(DatasetSplit::Train, &args, &game).is_err());
        assert_eq!(load_data(DatasetSplit::Train, &args, &GameArgs::default())?.len(), 1);
        Ok(())
    }
}
