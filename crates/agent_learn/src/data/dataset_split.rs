use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum DatasetSplit {
    Train,
    Dev,
    Validation,
}

impl DatasetSplit {
    /// Stem of the split's data file, e.g. `train` for `train.json`.
    pub fn file_stem(self) -> &'static str {
        match self {
            DatasetSplit::Train => "train",
            DatasetSplit::Dev => "dev",
            DatasetSplit::Validation => "validation",
        }
    }
}

impl fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}
