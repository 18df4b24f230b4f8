//! SQLite-backed deck persistence.
//!
//! Decks are snapshotted immutably at save time: the serialized body
//! embeds full card records so a stored deck renders without catalog
//! access. Timestamps are server-assigned; `created_at` never changes.

use crate::deck::Deck;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A persisted deck row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedDeck {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub format: String,
    pub archetype: Option<String>,
    pub colors: Vec<String>,
    pub deck: Deck,
    pub quality_score: Option<f64>,
    pub improvement_notes: Option<String>,
    pub total_cards: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_id: Option<String>,
}

/// Fields accepted when saving a new deck.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDeck {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub deck: Deck,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub improvement_notes: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeckPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub deck: Option<Deck>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub improvement_notes: Option<String>,
}

/// Filters for listing and counting decks.
#[derive(Debug, Clone, Default)]
pub struct DeckListFilters {
    pub format: Option<String>,
    pub archetype: Option<String>,
    pub user_id: Option<String>,
}

pub struct DeckStore {
    conn: Arc<Mutex<Connection>>,
}

impl DeckStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {parent:?}"))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open deck database {path:?}"))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory deck store")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS decks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                format TEXT NOT NULL,
                archetype TEXT,
                colors TEXT NOT NULL DEFAULT '[]',
                deck_data TEXT NOT NULL,
                quality_score REAL,
                improvement_notes TEXT,
                total_cards INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                user_id TEXT
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_decks_format ON decks(format)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_decks_created ON decks(created_at)",
            [],
        )?;
        Ok(())
    }

    /// Persist a new deck. Returns the assigned UUID.
    pub fn save(&self, new: &NewDeck) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO decks (
                id, name, description, format, archetype, colors, deck_data,
                quality_score, improvement_notes, total_cards,
                created_at, updated_at, user_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                id,
                new.name,
                new.description,
                new.deck.format,
                new.deck.archetype,
                serde_json::to_string(&new.deck.colors)?,
                serde_json::to_string(&new.deck)?,
                new.quality_score,
                new.improvement_notes,
                new.deck.total_cards,
                now.to_rfc3339(),
                now.to_rfc3339(),
                new.user_id,
            ],
        )
        .context("Failed to save deck")?;
        Ok(id)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<SavedDeck>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM decks WHERE id = ?", params![id], row_to_deck)
            .optional()
            .context("Deck lookup failed")
    }

    /// List decks newest first.
    pub fn list(
        &self,
        filters: &DeckListFilters,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SavedDeck>> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, mut args) = filter_clause(filters);
        let sql = format!(
            "SELECT * FROM decks WHERE 1=1{where_clause} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        args.push(Box::new(limit as i64));
        args.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(params.as_slice(), row_to_deck)
            .context("Deck list failed")?;
        let mut decks = Vec::new();
        for row in rows {
            decks.push(row?);
        }
        Ok(decks)
    }

    /// Apply a partial update. Returns false when the id is unknown.
    /// `updated_at` is refreshed on every successful update.
    pub fn update(&self, id: &str, patch: &DeckPatch) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let mut sets = vec!["updated_at = ?".to_string()];
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

        if let Some(name) = &patch.name {
            sets.push("name = ?".to_string());
            args.push(Box::new(name.clone()));
        }
        if let Some(description) = &patch.description {
            sets.push("description = ?".to_string());
            args.push(Box::new(description.clone()));
        }
        if let Some(quality) = patch.quality_score {
            sets.push("quality_score = ?".to_string());
            args.push(Box::new(quality));
        }
        if let Some(notes) = &patch.improvement_notes {
            sets.push("improvement_notes = ?".to_string());
            args.push(Box::new(notes.clone()));
        }
        if let Some(deck) = &patch.deck {
            sets.push("deck_data = ?".to_string());
            args.push(Box::new(serde_json::to_string(deck)?));
            sets.push("format = ?".to_string());
            args.push(Box::new(deck.format.clone()));
            sets.push("archetype = ?".to_string());
            args.push(Box::new(deck.archetype.clone()));
            sets.push("colors = ?".to_string());
            args.push(Box::new(serde_json::to_string(&deck.colors)?));
            sets.push("total_cards = ?".to_string());
            args.push(Box::new(deck.total_cards));
        }

        args.push(Box::new(id.to_string()));
        let sql = format!("UPDATE decks SET {} WHERE id = ?", sets.join(", "));
        let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let changed = conn
            .execute(&sql, params.as_slice())
            .context("Deck update failed")?;
        Ok(changed > 0)
    }

    /// Delete a deck. Returns false when the id is unknown.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute("DELETE FROM decks WHERE id = ?", params![id])
            .context("Deck delete failed")?;
        Ok(changed > 0)
    }

    pub fn count(&self, filters: &DeckListFilters) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, args) = filter_clause(filters);
        let sql = format!("SELECT COUNT(*) FROM decks WHERE 1=1{where_clause}");
        let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, params.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl Clone for DeckStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

fn filter_clause(filters: &DeckListFilters) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clause = String::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(format) = &filters.format {
        clause.push_str(" AND format = ? COLLATE NOCASE");
        args.push(Box::new(format.clone()));
    }
    if let Some(archetype) = &filters.archetype {
        clause.push_str(" AND archetype = ? COLLATE NOCASE");
        args.push(Box::new(archetype.clone()));
    }
    if let Some(user_id) = &filters.user_id {
        clause.push_str(" AND user_id = ?");
        args.push(Box::new(user_id.clone()));
    }
    (clause, args)
}

fn row_to_deck(row: &Row<'_>) -> rusqlite::Result<SavedDeck> {
    let colors_raw: String = row.get("colors")?;
    let deck_raw: String = row.get("deck_data")?;
    let created_raw: String = row.get("created_at")?;
    let updated_raw: String = row.get("updated_at")?;
    Ok(SavedDeck {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        format: row.get("format")?,
        archetype: row.get("archetype")?,
        colors: serde_json::from_str(&colors_raw).unwrap_or_default(),
        deck: serde_json::from_str(&deck_raw).unwrap_or_default(),
        quality_score: row.get("quality_score")?,
        improvement_notes: row.get("improvement_notes")?,
        total_cards: row.get("total_cards")?,
        created_at: DateTime::parse_from_rfc3339(&created_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        user_id: row.get("user_id")?,
    })
}
