use crate::core::Project;
use crate::state::crosstab::{Crosstab, CrosstabState, StructuralEdit};
use crate::state::history::History;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// A crosstab whose structural edits can be undone
pub struct CrosstabSession {
    crosstab: Crosstab,
    history: Mutex<History<CrosstabState>>,
}

impl CrosstabSession {
    pub fn new(crosstab: Crosstab, capacity: usize) -> Self {
        let initial = crosstab.snapshot();
        Self {
            crosstab,
            history: Mutex::new(History::with_capacity(initial, capacity)),
        }
    }

    pub fn crosstab(&self) -> &Crosstab {
        &self.crosstab
    }

    fn history(&self) -> MutexGuard<'_, History<CrosstabState>> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Load a project and start a fresh history from it
    pub fn load_project(&self, project: &Project) {
        self.crosstab.load_project(project);
        let capacity = self.history().capacity();
        *self.history() = History::with_capacity(self.crosstab.snapshot(), capacity);
    }

    /// Apply an edit and commit the result as a new history entry.
    ///
    /// The entry undone to is the state right before the edit, including
    /// cells loaded since the previous commit.
    pub fn apply(&self, edit: StructuralEdit) -> bool {
        let before = self.crosstab.snapshot();
        if !self.crosstab.apply(edit) {
            return false;
        }
        let mut history = self.history();
        history.replace_present(before);
        history.set_state(self.crosstab.snapshot());
        true
    }

    pub fn undo(&self) -> bool {
        let mut history = self.history();
        if !history.undo() {
            return false;
        }
        debug!(past = history.past().len(), "undo");
        self.crosstab.restore(history.present());
        true
    }

    pub fn redo(&self) -> bool {
        let mut history = self.history();
        if !history.redo() {
            return false;
        }
        debug!(future = history.future().len(), "redo");
        self.crosstab.restore(history.present());
        true
    }

    pub fn can_undo(&self) -> bool {
        self.history().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history().can_redo()
    }
}
