//! # MembershipEdge
//! "Actor A likes subject S" is stored as one row in the edges collection, unique on (subject, actor).
//! The row existing is the only truth about whether A likes S. There is no boolean column to get out of date.
//!
//! Column names come from [`SyncConfig`], so the same type works for any binary relation the schema defines.

use crate::SyncConfig;
use crate::store::Filter;

use super::{ActorId, Row};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MembershipEdge {
    pub subject_id: String,
    pub actor_id: ActorId,
}

impl MembershipEdge {
    pub fn new(subject_id: impl Into<String>, actor_id: ActorId) -> Self {
        Self {
            subject_id: subject_id.into(),
            actor_id,
        }
    }

    pub fn to_row(&self, config: &SyncConfig) -> Row {
        let mut row = serde_json::Map::new();
        row.insert(
            config.subject_column.clone(),
            serde_json::Value::String(self.subject_id.clone()),
        );
        row.insert(
            config.actor_column.clone(),
            serde_json::Value::String(self.actor_id.0.clone()),
        );
        serde_json::Value::Object(row)
    }

    /// Returns None if the row lacks either column (or they aren't strings).
    pub fn from_row(row: &Row, config: &SyncConfig) -> Option<Self> {
        let subject_id = row.get(&config.subject_column)?.as_str()?;
        let actor_id = row.get(&config.actor_column)?.as_str()?;
        Some(Self::new(subject_id, ActorId::from(actor_id)))
    }

    /// Matches exactly this edge's row.
    pub fn filter(&self, config: &SyncConfig) -> Filter {
        Filter::eq(&config.subject_column, self.subject_id.as_str())
            .and_eq(&config.actor_column, self.actor_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_uses_configured_columns() {
        let config = SyncConfig::default();
        let edge = MembershipEdge::new("g1", ActorId::from("u1"));
        let row = edge.to_row(&config);
        assert_eq!(row, serde_json::json!({ "game_id": "g1", "user_id": "u1" }));
        assert_eq!(MembershipEdge::from_row(&row, &config), Some(edge.clone()));
        assert!(edge.filter(&config).matches(&row));
    }

    #[test]
    fn test_from_row_rejects_missing_actor() {
        let config = SyncConfig::default();
        let row = serde_json::json!({ "game_id": "g1", "user_id": null });
        assert_eq!(MembershipEdge::from_row(&row, &config), None);
    }
}
