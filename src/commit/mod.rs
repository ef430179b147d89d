pub mod pipeline;
pub mod stage;

pub use pipeline::{CommitOptions, CommitReport};
pub use stage::CommitStage;
