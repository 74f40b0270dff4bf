pub mod crosstab;
pub mod history;
pub mod session;

pub use crosstab::{Crosstab, CrosstabState, RefreshOutcome, StructuralEdit};
pub use history::{DEFAULT_HISTORY_CAPACITY, History};
pub use session::CrosstabSession;
