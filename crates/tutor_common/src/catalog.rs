//! SQLite-backed card catalog.
//!
//! Persistent keyed store of card records with name/CMC/rarity/set
//! indexes and an FTS5 full-text index over name, oracle text and type
//! line. List-valued card fields are stored as JSON columns, the same
//! shape the ingest dump uses.

use crate::card::MtgCard;
use crate::deck::CardSearchFilters;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    /// Open or create the catalog at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {parent:?}"))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog database {path:?}"))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory catalog for tests and fixtures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory catalog")?;
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
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mana_cost TEXT,
                cmc REAL NOT NULL DEFAULT 0,
                colors TEXT NOT NULL DEFAULT '[]',
                color_identity TEXT NOT NULL DEFAULT '[]',
                type_line TEXT NOT NULL DEFAULT '',
                types TEXT NOT NULL DEFAULT '[]',
                subtypes TEXT NOT NULL DEFAULT '[]',
                oracle_text TEXT,
                power TEXT,
                toughness TEXT,
                loyalty TEXT,
                set_code TEXT NOT NULL DEFAULT '',
                rarity TEXT NOT NULL DEFAULT '',
                legalities TEXT NOT NULL DEFAULT '{}',
                keywords TEXT NOT NULL DEFAULT '[]'
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cards_name ON cards(name COLLATE NOCASE)",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_cards_cmc ON cards(cmc)", [])?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cards_rarity ON cards(rarity)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cards_set ON cards(set_code)",
            [],
        )?;

        conn.execute(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS cards_fts USING fts5(
                id UNINDEXED,
                name,
                type_line,
                oracle_text
            )
            "#,
            [],
        )?;

        Ok(())
    }

    /// Insert or replace cards. Returns the number written.
    pub fn upsert_cards(&self, cards: &[MtgCard]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut count = 0;
        for card in cards {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO cards (
                    id, name, mana_cost, cmc, colors, color_identity,
                    type_line, types, subtypes, oracle_text, power,
                    toughness, loyalty, set_code, rarity, legalities, keywords
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    card.id,
                    card.name,
                    card.mana_cost,
                    card.cmc,
                    serde_json::to_string(&card.colors)?,
                    serde_json::to_string(&card.color_identity)?,
                    card.type_line,
                    serde_json::to_string(&card.types)?,
                    serde_json::to_string(&card.subtypes)?,
                    card.oracle_text,
                    card.power,
                    card.toughness,
                    card.loyalty,
                    card.set_code,
                    card.rarity,
                    serde_json::to_string(&card.legalities)?,
                    serde_json::to_string(&card.keywords)?,
                ],
            )
            .with_context(|| format!("Failed to upsert card {}", card.name))?;

            tx.execute("DELETE FROM cards_fts WHERE id = ?", params![card.id])?;
            tx.execute(
                "INSERT INTO cards_fts (id, name, type_line, oracle_text) VALUES (?, ?, ?, ?)",
                params![
                    card.id,
                    card.name,
                    card.type_line,
                    card.oracle_text.as_deref().unwrap_or(""),
                ],
            )?;
            count += 1;
        }
        tx.commit()?;
        Ok(count)
    }

    /// Fetch by id.
    pub fn get_by_id(&self, id: &str) -> Result<Option<MtgCard>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM cards WHERE id = ?", params![id], row_to_card)
            .optional()
            .context("Catalog lookup by id failed")
    }

    /// Fetch by name, case-insensitive. Name collisions resolve to the
    /// earliest-ingested row.
    pub fn get_by_name(&self, name: &str) -> Result<Option<MtgCard>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM cards WHERE name = ? COLLATE NOCASE ORDER BY rowid ASC LIMIT 1",
            params![name],
            row_to_card,
        )
        .optional()
        .context("Catalog lookup by name failed")
    }

    /// Filtered search. Color and type membership are post-filtered in
    /// Rust because the lists live in JSON columns; the SQL side narrows
    /// by CMC, rarity, legality and full text first. Results order by
    /// name ascending, ties by id.
    pub fn search(&self, filters: &CardSearchFilters, limit: usize) -> Result<Vec<MtgCard>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM cards WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(cmc_min) = filters.cmc_min {
            sql.push_str(" AND cmc >= ?");
            args.push(Box::new(cmc_min));
        }
        if let Some(cmc_max) = filters.cmc_max {
            sql.push_str(" AND cmc <= ?");
            args.push(Box::new(cmc_max));
        }
        if let Some(rarity) = &filters.rarity {
            sql.push_str(" AND rarity = ? COLLATE NOCASE");
            args.push(Box::new(rarity.clone()));
        }
        if let Some(format) = &filters.format_legal {
            // Legalities are stored as a JSON object keyed by lowercase
            // format name.
            sql.push_str(" AND legalities LIKE ?");
            args.push(Box::new(format!(
                "%\"{}\":\"legal\"%",
                format.to_lowercase()
            )));
        }
        if let Some(text) = &filters.text_query {
            sql.push_str(" AND id IN (SELECT id FROM cards_fts WHERE cards_fts MATCH ?)");
            args.push(Box::new(fts_query(text)));
        }

        sql.push_str(" ORDER BY name ASC, id ASC LIMIT ?");
        // Over-fetch to leave room for the color/type post-filters.
        args.push(Box::new((limit * 4) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(params.as_slice(), row_to_card)
            .context("Catalog search failed")?;

        let mut cards = Vec::new();
        for row in rows {
            let card = row?;
            if let Some(colors) = &filters.colors {
                if !card.colors.is_empty() && !card.colors.iter().any(|c| colors.contains(c)) {
                    continue;
                }
            }
            if let Some(types) = &filters.types {
                if !card.types.iter().any(|t| types.contains(t)) {
                    continue;
                }
            }
            cards.push(card);
            if cards.len() >= limit {
                break;
            }
        }
        Ok(cards)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl Clone for CatalogStore {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

/// Quote each token so user text never reaches the FTS query parser as
/// syntax.
fn fts_query(text: &str) -> String {
    text.split_whitespace()
        .map(|tok| format!("\"{}\"", tok.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_to_card(row: &Row<'_>) -> rusqlite::Result<MtgCard> {
    fn json_list(row: &Row<'_>, idx: &str) -> rusqlite::Result<Vec<String>> {
        let raw: String = row.get(idx)?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    let legalities_raw: String = row.get("legalities")?;
    Ok(MtgCard {
        id: row.get("id")?,
        name: row.get("name")?,
        mana_cost: row.get("mana_cost")?,
        cmc: row.get("cmc")?,
        colors: json_list(row, "colors")?,
        color_identity: json_list(row, "color_identity")?,
        type_line: row.get("type_line")?,
        types: json_list(row, "types")?,
        subtypes: json_list(row, "subtypes")?,
        oracle_text: row.get("oracle_text")?,
        power: row.get("power")?,
        toughness: row.get("toughness")?,
        loyalty: row.get("loyalty")?,
        set_code: row.get("set_code")?,
        rarity: row.get("rarity")?,
        legalities: serde_json::from_str(&legalities_raw).unwrap_or_default(),
        keywords: json_list(row, "keywords")?,
    })
}
