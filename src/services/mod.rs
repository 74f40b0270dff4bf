pub mod api;
pub mod auto_save;
pub mod cell_loader;
pub mod heatmap;

pub use api::{ApiError, HttpIntersectApi, IntersectApi, Session};
pub use auto_save::{AutoSave, AutoSaveOptions, ProjectFileSaver, SaveHandler, SaveOutcome, SkipReason};
pub use cell_loader::CellLoader;
pub use heatmap::{HeatmapColor, HeatmapScale, Metric, calculate_heatmap_scale, get_heatmap_color};
