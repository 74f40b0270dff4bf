use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Row or column definition in a crosstab.
///
/// Items are immutable once created. Editing an item replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceItem {
    pub id: String,
    pub definition: AudienceDefinition,
    pub caption: Caption,
}

impl AudienceItem {
    /// Create an item with a freshly generated id
    pub fn new(definition: AudienceDefinition, caption: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), definition, caption)
    }

    pub fn with_id(
        id: impl Into<String>,
        definition: AudienceDefinition,
        caption: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            definition,
            caption: Caption { text: caption.into() },
        }
    }
}

/// Audience expression payload.
///
/// The payloads are forwarded verbatim to the analytics API and never
/// interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AudienceDefinition {
    Expression {
        expression: Value,
    },
    Average {
        average: Value,
    },
    #[serde(rename_all = "camelCase")]
    DeviceBasedUsage {
        device_based_usage: Value,
    },
}

impl AudienceDefinition {
    /// Payload sent as `expression` in bulk requests
    pub fn to_expression(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    pub text: String,
}

impl fmt::Display for Caption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Optional reference population for percentages and index.
///
/// Only `id` is understood locally; the rest is passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseAudience {
    pub id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl BaseAudience {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Filters that scope every bulk load
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadContext {
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub waves: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_audience: Option<BaseAudience>,
}

impl LoadContext {
    pub fn base_id(&self) -> Option<&str> {
        self.base_audience.as_ref().map(|b| b.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_definition_is_tagged() {
        let def = AudienceDefinition::Expression {
            expression: json!({"operator": "And", "expressions": []}),
        };
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "Expression");
        assert_eq!(value["expression"]["operator"], "And");
    }

    #[test]
    fn test_device_based_usage_uses_camel_case() {
        let raw = json!({"type": "DeviceBasedUsage", "deviceBasedUsage": {"device": "tv"}});
        let def: AudienceDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(
            def,
            AudienceDefinition::DeviceBasedUsage {
                device_based_usage: json!({"device": "tv"})
            }
        );
    }

    #[test]
    fn test_new_items_get_distinct_ids() {
        let def = AudienceDefinition::Average { average: json!({}) };
        let a = AudienceItem::new(def.clone(), "A");
        let b = AudienceItem::new(def, "B");
        assert_ne!(a.id, b.id);
        assert_eq!(a.caption.to_string(), "A");
    }

    #[test]
    fn test_base_audience_keeps_unknown_fields() {
        let raw = json!({"id": "base-1", "expression": {"operator": "Or"}});
        let base: BaseAudience = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(base.id, "base-1");
        assert_eq!(serde_json::to_value(&base).unwrap(), raw);
    }
}
