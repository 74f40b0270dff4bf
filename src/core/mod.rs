pub mod cell;
pub mod project;
pub mod types;

pub use cell::*;
pub use project::{Project, ProjectData, ProjectDraft, ProjectMetadata};
pub use types::*;
