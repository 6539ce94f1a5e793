//! Which collections and columns the components talk to.
//! The defaults match the hosted schema (`games` + `game_likes`).

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Collection the [`CollectionSynchronizer`](crate::CollectionSynchronizer) mirrors.
    pub items_collection: String,
    /// Column the items are ordered by, newest first.
    pub order_column: String,
    /// Collection holding membership edges (one row per like).
    pub edges_collection: String,
    /// Edge column pointing at the liked item.
    pub subject_column: String,
    /// Edge column pointing at the actor who liked it.
    pub actor_column: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            items_collection: "games".to_string(),
            order_column: "created_at".to_string(),
            edges_collection: "game_likes".to_string(),
            subject_column: "game_id".to_string(),
            actor_column: "user_id".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config =
            SyncConfig::from_json(r#"{ "itemsCollection": "mods", "actorColumn": "profile_id" }"#)
                .unwrap();
        assert_eq!(config.items_collection, "mods");
        assert_eq!(config.actor_column, "profile_id");
        assert_eq!(config.edges_collection, "game_likes");
        assert_eq!(config.order_column, "created_at");
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(SyncConfig::from_json("{}").unwrap(), SyncConfig::default());
    }
}
