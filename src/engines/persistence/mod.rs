pub mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointStore, CHECKPOINT_FORMAT_VERSION};
