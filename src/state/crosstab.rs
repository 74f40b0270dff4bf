//! Row/column ordering and cell store consistency

use crate::core::{
    AudienceItem, CacheKey, CellData, CellKey, CellStore, LoadContext, Project, ProjectDraft,
};
use crate::services::api::BulkCellRequest;
use crate::services::cell_loader::CellLoader;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything the rendering layer needs to paint the grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrosstabState {
    pub rows: Vec<AudienceItem>,
    pub columns: Vec<AudienceItem>,
    pub cells: CellStore,
    pub is_loading: bool,
    /// Filters the cells were computed under
    pub context: LoadContext,
}

impl CrosstabState {
    pub fn has_row(&self, row_id: &str) -> bool {
        self.rows.iter().any(|r| r.id == row_id)
    }

    pub fn has_column(&self, column_id: &str) -> bool {
        self.columns.iter().any(|c| c.id == column_id)
    }

    /// True if the key's row and column both exist
    pub fn is_live(&self, key: &CacheKey) -> bool {
        self.has_row(key.row_id()) && self.has_column(key.column_id())
    }

    /// Layout to persist under the given project name
    pub fn draft(&self, name: &str) -> ProjectDraft {
        ProjectDraft {
            name: name.to_string(),
            rows: self.rows.clone(),
            columns: self.columns.clone(),
        }
    }

    fn identity(&self) -> Identity {
        Identity {
            rows: self.rows.iter().map(|r| r.id.clone()).collect(),
            columns: self.columns.iter().map(|c| c.id.clone()).collect(),
        }
    }
}

/// Row and column id sets, independent of order
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    rows: BTreeSet<String>,
    columns: BTreeSet<String>,
}

impl Identity {
    fn contains(&self, key: &CacheKey) -> bool {
        self.rows.contains(key.row_id()) && self.columns.contains(key.column_id())
    }
}

/// Structural edits, the unit of undo/redo
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralEdit {
    AddRow {
        item: AudienceItem,
        index: Option<usize>,
    },
    AddColumn {
        item: AudienceItem,
        index: Option<usize>,
    },
    RemoveRow(String),
    RemoveColumn(String),
    ReorderRows(Vec<AudienceItem>),
    ReorderColumns(Vec<AudienceItem>),
}

/// Result of `Crosstab::load_all_cells`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No rows or no columns
    Skipped,
    Applied { cells: usize },
    /// Superseded, or invalidated by an edit that drops cells
    Cancelled,
    /// Rows or columns changed while the request was out
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Rows,
    Columns,
}

impl Axis {
    fn segment<'a>(&self, key: &'a CacheKey) -> &'a str {
        match self {
            Axis::Rows => key.row_id(),
            Axis::Columns => key.column_id(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: CrosstabState,
    pending: usize,
    bulk: Option<(u64, CancellationToken)>,
    next_bulk: u64,
}

impl Inner {
    fn begin_load(&mut self) {
        self.pending += 1;
        self.state.is_loading = true;
    }

    fn end_load(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.state.is_loading = self.pending > 0;
    }

    fn items_mut(&mut self, axis: Axis) -> &mut Vec<AudienceItem> {
        match axis {
            Axis::Rows => &mut self.state.rows,
            Axis::Columns => &mut self.state.columns,
        }
    }

    fn cancel_bulk(&mut self) {
        if let Some((_, token)) = self.bulk.take() {
            token.cancel();
        }
    }
}

/// Owns the crosstab's rows, columns and cell store
pub struct Crosstab {
    loader: Arc<CellLoader>,
    inner: Mutex<Inner>,
}

impl Crosstab {
    pub fn new(loader: Arc<CellLoader>) -> Self {
        Self {
            loader,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn loader(&self) -> &Arc<CellLoader> {
        &self.loader
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state. Cheap: the cell store is shared, not copied.
    pub fn snapshot(&self) -> CrosstabState {
        self.lock().state.clone()
    }

    pub fn rows(&self) -> Vec<AudienceItem> {
        self.lock().state.rows.clone()
    }

    pub fn columns(&self) -> Vec<AudienceItem> {
        self.lock().state.columns.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().state.is_loading
    }

    pub fn context(&self) -> LoadContext {
        self.lock().state.context.clone()
    }

    /// Replace the filters sent with bulk loads.
    ///
    /// Results computed under other filters are invalid, so a change drops
    /// every cached cell and cancels whatever is in flight.
    pub fn set_context(&self, context: LoadContext) {
        let mut inner = self.lock();
        if inner.state.context == context {
            return;
        }
        inner.state.context = context;
        inner.cancel_bulk();
        inner.state.cells = CellStore::new();
        drop(inner);

        self.loader.cancel_all();
        self.loader.clear_cache();
        info!("load context changed; cell cache cleared");
    }

    /// Reset rows, columns and context from a stored project
    pub fn load_project(&self, project: &Project) {
        self.set_context(project.load_context());
        let mut inner = self.lock();
        inner.cancel_bulk();
        inner.state.rows = project.data.rows.clone();
        inner.state.columns = project.data.columns.clone();
        inner.state.cells = CellStore::new();
        drop(inner);

        self.loader.cancel_all();
        info!(
            project = %project.id,
            rows = project.data.rows.len(),
            columns = project.data.columns.len(),
            "project loaded"
        );
    }

    pub fn add_row(&self, item: AudienceItem, index: Option<usize>) -> bool {
        self.insert(Axis::Rows, item, index)
    }

    pub fn add_column(&self, item: AudienceItem, index: Option<usize>) -> bool {
        self.insert(Axis::Columns, item, index)
    }

    /// Remove a row and every cell that references it
    pub fn remove_row(&self, row_id: &str) -> bool {
        self.remove(Axis::Rows, row_id)
    }

    /// Remove a column and every cell that references it
    pub fn remove_column(&self, column_id: &str) -> bool {
        self.remove(Axis::Columns, column_id)
    }

    pub fn reorder_rows(&self, new_order: Vec<AudienceItem>) -> bool {
        self.reorder(Axis::Rows, new_order)
    }

    pub fn reorder_columns(&self, new_order: Vec<AudienceItem>) -> bool {
        self.reorder(Axis::Columns, new_order)
    }

    /// Run a structural edit; returns false if it changed nothing
    pub fn apply(&self, edit: StructuralEdit) -> bool {
        match edit {
            StructuralEdit::AddRow { item, index } => self.add_row(item, index),
            StructuralEdit::AddColumn { item, index } => self.add_column(item, index),
            StructuralEdit::RemoveRow(id) => self.remove_row(&id),
            StructuralEdit::RemoveColumn(id) => self.remove_column(&id),
            StructuralEdit::ReorderRows(order) => self.reorder_rows(order),
            StructuralEdit::ReorderColumns(order) => self.reorder_columns(order),
        }
    }

    fn insert(&self, axis: Axis, item: AudienceItem, index: Option<usize>) -> bool {
        let mut inner = self.lock();
        let items = inner.items_mut(axis);
        if items.iter().any(|existing| existing.id == item.id) {
            warn!(id = %item.id, ?axis, "ignoring add of duplicate id");
            return false;
        }
        let at = index.map_or(items.len(), |i| i.min(items.len()));
        debug!(id = %item.id, ?axis, at, "adding item");
        items.insert(at, item);
        true
    }

    fn remove(&self, axis: Axis, id: &str) -> bool {
        let mut inner = self.lock();
        let items = inner.items_mut(axis);
        let before = items.len();
        items.retain(|item| item.id != id);
        let removed = items.len() != before;
        let pruned = inner.state.cells.retain(|key, _| axis.segment(key) != id);
        if removed {
            inner.cancel_bulk();
        }
        drop(inner);

        self.loader.cancel_where(|key| axis.segment(key) == id);
        self.loader.evict_where(|key| axis.segment(key) == id);
        debug!(id, ?axis, removed, pruned, "removed item");
        removed
    }

    fn reorder(&self, axis: Axis, new_order: Vec<AudienceItem>) -> bool {
        let mut inner = self.lock();
        let items = inner.items_mut(axis);
        if *items == new_order {
            return false;
        }
        let is_permutation = {
            let old_ids: BTreeSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
            let new_ids: BTreeSet<&str> = new_order.iter().map(|i| i.id.as_str()).collect();
            old_ids == new_ids && new_ids.len() == new_order.len()
        };

        *items = new_order;
        if !is_permutation {
            warn!(?axis, "reorder was not a permutation; pruning orphaned cells");
            let identity = inner.state.identity();
            inner.state.cells.retain(|key, _| identity.contains(key));
            inner.cancel_bulk();
            drop(inner);

            self.loader.cancel_where(|key| !identity.contains(key));
            self.loader.evict_where(|key| !identity.contains(key));
        }
        true
    }

    /// Cached state of one cell, `NotAsked` if absent
    pub fn get_cell_data(&self, row_id: &str, column_id: &str, base_id: Option<&str>) -> CellData {
        let key = CellKey::new(row_id, column_id).with_base(base_id);
        self.lock()
            .state
            .cells
            .get(&key.cache_key())
            .cloned()
            .unwrap_or_default()
    }

    /// Load a single cell unless it is already loading or loaded
    pub async fn load_cell(&self, key: &CellKey) -> CellData {
        let cache_key = key.cache_key();
        {
            let mut inner = self.lock();
            if let Some(existing @ (CellData::Loading | CellData::Success(_))) =
                inner.state.cells.get(&cache_key)
            {
                return existing.clone();
            }
            inner.state.cells.insert(cache_key.clone(), CellData::Loading);
            inner.begin_load();
        }

        let data = self.loader.load_cell(key).await;

        let mut inner = self.lock();
        inner.end_load();
        match &data {
            CellData::NotAsked | CellData::Loading => {
                // A superseding load owns the entry; only clear a dangling marker
                let dangling = matches!(inner.state.cells.get(&cache_key), Some(CellData::Loading))
                    && !self.loader.is_in_flight(key);
                if dangling {
                    inner.state.cells.remove(&cache_key);
                }
            }
            _ if !inner.state.is_live(&cache_key) => {
                debug!(cell = %cache_key, "dropping result for removed row or column");
            }
            _ => {
                inner.state.cells.insert(cache_key, data.clone());
            }
        }
        data
    }

    /// Load several cells concurrently
    pub async fn load_cells(&self, keys: &[CellKey]) -> Vec<CellData> {
        join_all(keys.iter().map(|key| self.load_cell(key))).await
    }

    /// Refresh every cell of the current grid with one bulk request.
    ///
    /// The result replaces the whole store. It is dropped if the row or
    /// column sets changed while the request was out.
    pub async fn load_all_cells(&self) -> RefreshOutcome {
        let (request, identity, ticket, token) = {
            let mut inner = self.lock();
            if inner.state.rows.is_empty() || inner.state.columns.is_empty() {
                return RefreshOutcome::Skipped;
            }
            let request =
                BulkCellRequest::new(&inner.state.rows, &inner.state.columns, &inner.state.context);
            let identity = inner.state.identity();

            inner.cancel_bulk();
            inner.next_bulk += 1;
            let ticket = inner.next_bulk;
            let token = CancellationToken::new();
            inner.bulk = Some((ticket, token.clone()));
            inner.begin_load();
            (request, identity, ticket, token)
        };

        let result = self
            .loader
            .load_bulk_cells_cancellable(&request, &token)
            .await;

        let mut inner = self.lock();
        inner.end_load();
        if matches!(&inner.bulk, Some((current, _)) if *current == ticket) {
            inner.bulk = None;
        }

        let Some(cells) = result else {
            debug!(ticket, "bulk load cancelled");
            return RefreshOutcome::Cancelled;
        };
        if inner.state.identity() != identity {
            warn!(ticket, "discarding bulk result for an outdated grid");
            // A removal can land after the response resolved but before the
            // loader cached it.
            let current = inner.state.identity();
            drop(inner);
            self.loader.evict_where(|key| !current.contains(key));
            return RefreshOutcome::Stale;
        }

        let count = cells.len();
        inner.state.cells = cells;
        RefreshOutcome::Applied { cells: count }
    }

    /// Adopt the rows and columns of a snapshot taken earlier.
    ///
    /// Current cells that are still addressable are kept; successful cells
    /// from the snapshot fill in whatever is missing. The current load
    /// context is kept, so a snapshot taken under other filters contributes
    /// no cells.
    pub fn restore(&self, snapshot: &CrosstabState) {
        let mut inner = self.lock();
        let identity = snapshot.identity();
        let previous = inner.state.identity();

        let mut cells = inner.state.cells.clone();
        cells.retain(|key, _| identity.contains(key));
        if snapshot.context == inner.state.context {
            for (key, data) in &snapshot.cells {
                if data.is_success() && identity.contains(key) && !cells.contains_key(key) {
                    cells.insert(key.clone(), data.clone());
                }
            }
        } else {
            debug!("snapshot taken under another context, not reusing its cells");
        }

        inner.state.rows = snapshot.rows.clone();
        inner.state.columns = snapshot.columns.clone();
        inner.state.cells = cells;
        if previous != identity {
            inner.cancel_bulk();
        }
        drop(inner);

        let dropped = |key: &CacheKey| previous.contains(key) && !identity.contains(key);
        self.loader.cancel_where(dropped);
        self.loader.evict_where(dropped);
    }
}
