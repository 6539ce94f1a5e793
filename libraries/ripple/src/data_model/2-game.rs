//! # Game
//! A game listing, as stored in the `games` collection.
//! `likes_count` and `views_count` are maintained server-side; we read them but never write them.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{Record, Row};

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub struct Game {
    pub id: String,
    pub title: String,
    pub description: String,
    pub game_url: String,
    #[serde(default)]
    pub youtube_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    pub author_id: String,
    pub author_username: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub views_count: u64,
}

/// What the upload form submits. Everything else is assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(target_arch = "wasm32", derive(tsify::Tsify))]
#[cfg_attr(target_arch = "wasm32", tsify(into_wasm_abi, from_wasm_abi))]
pub struct NewGame {
    pub title: String,
    pub description: String,
    pub game_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub author_id: String,
    pub author_username: String,
}

impl Record for Game {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn from_row(row: &Row) -> Result<Self, serde_json::Error> {
        Game::deserialize(row)
    }

    fn to_row(&self) -> Result<Row, serde_json::Error> {
        serde_json::to_value(self)
    }
}
