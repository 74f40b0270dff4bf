#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]

pub mod config;
pub mod core;
pub mod logging;
pub mod services;
pub mod state;

// Re-export commonly used types
pub use crate::core::{AudienceItem, CellData, CellKey, CellStore, IntersectResult, LoadContext, Project};
pub use services::{CellLoader, HttpIntersectApi, IntersectApi, Metric};
pub use state::{Crosstab, CrosstabSession, CrosstabState, History};
