use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map;
use std::fmt;
use std::sync::Arc;

/// Base id used when a cell has no explicit base audience
pub const DEFAULT_BASE: &str = "default";

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Identifies one matrix cell
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub row_id: String,
    pub column_id: String,
    pub base_id: Option<String>,
}

impl CellKey {
    pub fn new(row_id: impl Into<String>, column_id: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            column_id: column_id.into(),
            base_id: None,
        }
    }

    pub fn with_base(mut self, base_id: Option<&str>) -> Self {
        self.base_id = base_id.map(str::to_string);
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            row_id: self.row_id.clone(),
            column_id: self.column_id.clone(),
            base_id: self
                .base_id
                .clone()
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| DEFAULT_BASE.to_string()),
        }
    }
}

/// Normalized key of the cell store.
///
/// Renders as `row:column:base`. Separator and escape characters inside ids
/// are escaped, so distinct keys never render to the same string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    row_id: String,
    column_id: String,
    base_id: String,
}

impl CacheKey {
    pub fn row_id(&self) -> &str {
        &self.row_id
    }

    pub fn column_id(&self) -> &str {
        &self.column_id
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    pub fn to_cell_key(&self) -> CellKey {
        let base_id = (self.base_id != DEFAULT_BASE).then(|| self.base_id.clone());
        CellKey {
            row_id: self.row_id.clone(),
            column_id: self.column_id.clone(),
            base_id,
        }
    }

    /// Parse the rendered form back into a key
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = Vec::with_capacity(3);
        let mut current = String::new();
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => current.push(chars.next()?),
                SEPARATOR => parts.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        parts.push(current);
        let [row_id, column_id, base_id]: [String; 3] = parts.try_into().ok()?;
        Some(Self {
            row_id,
            column_id,
            base_id,
        })
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, segment: &str) -> fmt::Result {
    for c in segment.chars() {
        if c == SEPARATOR || c == ESCAPE {
            write!(f, "{ESCAPE}")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.row_id)?;
        write!(f, "{SEPARATOR}")?;
        write_escaped(f, &self.column_id)?;
        write!(f, "{SEPARATOR}")?;
        write_escaped(f, &self.base_id)
    }
}

impl From<&CellKey> for CacheKey {
    fn from(key: &CellKey) -> Self {
        key.cache_key()
    }
}

/// Numbers computed by the analytics API for one intersection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectResult {
    pub sample: f64,
    pub size: f64,
    pub row_percentage: f64,
    pub column_percentage: f64,
    pub index: f64,
}

/// Load state of a single cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellData {
    #[default]
    NotAsked,
    Loading,
    Success(IntersectResult),
    Failure(String),
}

impl CellData {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn result(&self) -> Option<&IntersectResult> {
        match self {
            Self::Success(result) => Some(result),
            _ => None,
        }
    }
}

/// Sparse map from cache key to cell state.
///
/// Clones share storage; writers copy on first mutation, so a clone handed
/// to the history is never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStore(Arc<HashMap<CacheKey, CellData>>);

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CellData> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: CacheKey, data: CellData) -> Option<CellData> {
        Arc::make_mut(&mut self.0).insert(key, data)
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CellData> {
        if !self.0.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.0).remove(key)
    }

    /// Keep only entries matching `keep`; returns how many were dropped
    pub fn retain(&mut self, mut keep: impl FnMut(&CacheKey, &CellData) -> bool) -> usize {
        if self.0.iter().all(|(k, v)| keep(k, v)) {
            return 0;
        }
        let map = Arc::make_mut(&mut self.0);
        let before = map.len();
        map.retain(|k, v| keep(k, &*v));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, CacheKey, CellData> {
        self.0.iter()
    }

    pub fn keys(&self) -> hash_map::Keys<'_, CacheKey, CellData> {
        self.0.keys()
    }

    pub fn values(&self) -> hash_map::Values<'_, CacheKey, CellData> {
        self.0.values()
    }

    /// True when both handles point at the same storage
    pub fn shares_storage_with(&self, other: &CellStore) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl FromIterator<(CacheKey, CellData)> for CellStore {
    fn from_iter<I: IntoIterator<Item = (CacheKey, CellData)>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl From<HashMap<CacheKey, CellData>> for CellStore {
    fn from(map: HashMap<CacheKey, CellData>) -> Self {
        Self(Arc::new(map))
    }
}

impl<'a> IntoIterator for &'a CellStore {
    type Item = (&'a CacheKey, &'a CellData);
    type IntoIter = hash_map::Iter<'a, CacheKey, CellData>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
