//! Card records.
//!
//! Cards are ingested once and never mutated by the service; the
//! repository hands out `Arc<MtgCard>` so cache tiers and decks share the
//! same allocation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single card from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtgCard {
    /// Unique card identifier.
    pub id: String,
    /// Card name, case-insensitive-unique by convention.
    pub name: String,
    /// Mana cost string, e.g. `{2}{U}{U}`.
    #[serde(default)]
    pub mana_cost: Option<String>,
    /// Converted mana cost.
    #[serde(default)]
    pub cmc: f64,
    /// Colors, subset of W/U/B/R/G.
    #[serde(default)]
    pub colors: Vec<String>,
    /// Color identity, superset of `colors`.
    #[serde(default)]
    pub color_identity: Vec<String>,
    /// Full type line, e.g. `Legendary Creature — Goblin Wizard`.
    pub type_line: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub subtypes: Vec<String>,
    /// Rules text.
    #[serde(default)]
    pub oracle_text: Option<String>,
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub toughness: Option<String>,
    #[serde(default)]
    pub loyalty: Option<String>,
    #[serde(default)]
    pub set_code: String,
    #[serde(default)]
    pub rarity: String,
    /// Format name (lowercase) to legality string, e.g. `"standard": "legal"`.
    #[serde(default)]
    pub legalities: HashMap<String, String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl MtgCard {
    pub fn is_land(&self) -> bool {
        self.types.iter().any(|t| t == "Land")
    }

    pub fn is_basic_land(&self) -> bool {
        self.is_land() && self.type_line.contains("Basic")
    }

    pub fn is_legendary(&self) -> bool {
        self.type_line.contains("Legendary")
    }

    pub fn is_creature(&self) -> bool {
        self.types.iter().any(|t| t == "Creature")
    }

    /// Legality check against the catalog's format→legality mapping.
    /// Cards with no entry for the format are treated as not legal.
    pub fn is_legal_in(&self, format: &str) -> bool {
        self.legalities
            .get(&format.to_lowercase())
            .map(|v| v.eq_ignore_ascii_case("legal"))
            .unwrap_or(false)
    }

    /// Whether the card's color identity fits inside `colors`.
    pub fn identity_within(&self, colors: &[String]) -> bool {
        self.color_identity.iter().all(|c| colors.contains(c))
    }

    /// Synthesize a basic land for a color code. Used when the catalog
    /// has no row for the land (empty repository, fixtures).
    pub fn basic_land(color: &str) -> MtgCard {
        let name = basic_land_name(color);
        MtgCard {
            id: name.to_lowercase(),
            name: name.to_string(),
            mana_cost: None,
            cmc: 0.0,
            colors: vec![],
            color_identity: if color_code_valid(color) {
                vec![color.to_string()]
            } else {
                vec![]
            },
            type_line: format!("Basic Land — {name}"),
            types: vec!["Land".to_string()],
            subtypes: vec![name.to_string()],
            oracle_text: None,
            power: None,
            toughness: None,
            loyalty: None,
            set_code: String::new(),
            rarity: "common".to_string(),
            legalities: HashMap::new(),
            keywords: vec![],
        }
    }
}

/// Basic land name for a color code. Unknown codes map to Wastes.
pub fn basic_land_name(color: &str) -> &'static str {
    match color {
        "W" => "Plains",
        "U" => "Island",
        "B" => "Swamp",
        "R" => "Mountain",
        "G" => "Forest",
        _ => "Wastes",
    }
}

fn color_code_valid(color: &str) -> bool {
    matches!(color, "W" | "U" | "B" | "R" | "G")
}

/// Spoken color word to color code, used by the chat parser.
pub fn color_word_to_code(word: &str) -> Option<&'static str> {
    match word {
        "white" => Some("W"),
        "blue" => Some("U"),
        "black" => Some("B"),
        "red" => Some("R"),
        "green" => Some("G"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(type_line: &str, types: &[&str]) -> MtgCard {
        MtgCard {
            id: "t1".into(),
            name: "Test".into(),
            mana_cost: None,
            cmc: 2.0,
            colors: vec!["R".into()],
            color_identity: vec!["R".into()],
            type_line: type_line.into(),
            types: types.iter().map(|s| s.to_string()).collect(),
            subtypes: vec![],
            oracle_text: None,
            power: None,
            toughness: None,
            loyalty: None,
            set_code: "tst".into(),
            rarity: "common".into(),
            legalities: HashMap::from([("standard".to_string(), "legal".to_string())]),
            keywords: vec![],
        }
    }

    #[test]
    fn test_land_detection() {
        let land = MtgCard::basic_land("R");
        assert!(land.is_land());
        assert!(land.is_basic_land());
        assert_eq!(land.name, "Mountain");
        assert_eq!(land.cmc, 0.0);

        let creature = card("Creature — Goblin", &["Creature"]);
        assert!(!creature.is_land());
        assert!(!creature.is_basic_land());
    }

    #[test]
    fn test_legendary_detection() {
        let c = card("Legendary Creature — Human Wizard", &["Creature"]);
        assert!(c.is_legendary());
        let c = card("Creature — Human Wizard", &["Creature"]);
        assert!(!c.is_legendary());
    }

    #[test]
    fn test_legality() {
        let c = card("Instant", &["Instant"]);
        assert!(c.is_legal_in("Standard"));
        assert!(c.is_legal_in("standard"));
        assert!(!c.is_legal_in("Modern"));
    }

    #[test]
    fn test_identity_within() {
        let c = card("Creature — Goblin", &["Creature"]);
        assert!(c.identity_within(&["R".to_string(), "G".to_string()]));
        assert!(!c.identity_within(&["U".to_string()]));
    }

    #[test]
    fn test_unknown_color_gets_wastes() {
        let land = MtgCard::basic_land("X");
        assert_eq!(land.name, "Wastes");
        assert!(land.color_identity.is_empty());
    }
}
