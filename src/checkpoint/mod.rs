mod record;

pub use record::{
    latest_checkpoint, list_checkpoints, load_checkpoint, prune_checkpoints, read_checkpoint_data,
    save_checkpoint, CheckpointData, ModelSpec,
};
