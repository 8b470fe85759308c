//! Data Module - games, instruction examples and their vocabulary
//!
//! - GameDataset: train/dev/validation games with derived artifacts
//! - Vocabulary: word-level tokenizer over instruction text
//! - loading: reading splits and vocabularies from disk
//! - batching: turning examples into model batches

pub mod batching;
pub mod dataset_split;
pub mod example;
pub mod game_dataset;
pub mod loading;
pub mod vocabulary;

pub use dataset_split::DatasetSplit;
pub use example::{Game, InstructionExample};
pub use game_dataset::GameDataset;
pub use vocabulary::Vocabulary;
