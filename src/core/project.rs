use crate::core::types::{AudienceItem, BaseAudience, LoadContext};
use crate::services::heatmap::Metric;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Crosstab project as stored by the projects API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: ProjectMetadata,
    #[serde(default)]
    pub data: ProjectData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub waves: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<BaseAudience>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectData {
    #[serde(default)]
    pub rows: Vec<AudienceItem>,
    #[serde(default)]
    pub columns: Vec<AudienceItem>,
}

impl Project {
    /// Read a project document from a JSON file
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let project = serde_json::from_str(&raw)?;
        Ok(project)
    }

    pub fn load_context(&self) -> LoadContext {
        LoadContext {
            locations: self.metadata.locations.clone(),
            waves: self.metadata.waves.clone(),
            base_audience: self.metadata.base.clone(),
        }
    }

    /// The editable part of the project, as handed to auto-save
    pub fn draft(&self) -> ProjectDraft {
        ProjectDraft {
            name: self.name.clone(),
            rows: self.data.rows.clone(),
            columns: self.data.columns.clone(),
        }
    }

    /// Fold a saved draft back into the project document
    pub fn apply_draft(&mut self, draft: &ProjectDraft) {
        self.name = draft.name.clone();
        self.data.rows = draft.rows.clone();
        self.data.columns = draft.columns.clone();
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

/// Name plus row and column layout. Cell values are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectDraft {
    pub name: String,
    pub rows: Vec<AudienceItem>,
    pub columns: Vec<AudienceItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AudienceDefinition;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_project_deserializes_with_missing_sections() {
        let project: Project = serde_json::from_value(json!({"id": "p1", "name": "Empty"})).unwrap();
        assert!(project.data.rows.is_empty());
        assert_eq!(project.load_context(), LoadContext::default());
    }

    #[test]
    fn test_load_context_comes_from_metadata() {
        let project: Project = serde_json::from_value(json!({
            "id": "p1",
            "name": "Brands",
            "metadata": {
                "locations": ["s2_1"],
                "waves": ["q1_2024"],
                "base": {"id": "base-1"},
                "metrics": ["Size", "Index"]
            },
            "data": {"rows": [], "columns": []}
        }))
        .unwrap();
        let context = project.load_context();
        assert_eq!(context.locations, vec!["s2_1".to_string()]);
        assert_eq!(context.base_id(), Some("base-1"));
        assert_eq!(project.metadata.metrics, vec![Metric::Size, Metric::Index]);
    }

    #[test]
    fn test_draft_round_trips_through_file() {
        let mut project: Project =
            serde_json::from_value(json!({"id": "p1", "name": "Before"})).unwrap();
        let mut draft = project.draft();
        draft.name = "After".to_string();
        draft.rows.push(AudienceItem::with_id(
            "r1",
            AudienceDefinition::Expression {
                expression: json!({"q": "a"}),
            },
            "Row 1",
        ));
        project.apply_draft(&draft);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        project.save_to_path(&path).unwrap();
        let reloaded = Project::from_path(&path).unwrap();
        assert_eq!(reloaded.draft(), draft);
    }
}
