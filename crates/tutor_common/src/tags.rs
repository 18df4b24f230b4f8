//! Strategic tag generation and embedding text assembly.
//!
//! Tags are derived by plain substring matching over the oracle text and
//! type line. The same card always yields the same tags in the same
//! order, so embedding text is stable across runs and the analyzer can
//! cluster on them.

use crate::card::MtgCard;

/// A tag rule: emitted tag plus the lowercase needles that trigger it.
struct TagRule {
    tag: &'static str,
    needles: &'static [&'static str],
}

// Synergy themes.
const SYNERGY_RULES: &[TagRule] = &[
    TagRule { tag: "synergy:graveyard", needles: &["from your graveyard", "return target creature card", "mill ", "mills ", "into your graveyard"] },
    TagRule { tag: "synergy:counters", needles: &["+1/+1 counter", "proliferate"] },
    TagRule { tag: "synergy:artifacts", needles: &["artifact you control", "artifacts you control", "create a treasure", "affinity"] },
    TagRule { tag: "synergy:tokens", needles: &["create a", "token"] },
    TagRule { tag: "synergy:lifegain", needles: &["you gain", "gain life", "lifelink"] },
    TagRule { tag: "synergy:spells-matter", needles: &["whenever you cast an instant", "whenever you cast a sorcery", "prowess", "magecraft"] },
    TagRule { tag: "synergy:sacrifice", needles: &["sacrifice a creature", "sacrifice another", "whenever a creature you control dies"] },
];

// Effects that undercut common themes.
const ANTI_SYNERGY_RULES: &[TagRule] = &[
    TagRule { tag: "anti:graveyard-hate", needles: &["exile all cards from", "exile each opponent's graveyard", "exile all graveyards", "cards in graveyards can't"] },
    TagRule { tag: "anti:symmetric-discard", needles: &["each player discards"] },
    TagRule { tag: "anti:mass-land", needles: &["destroy all lands", "each player sacrifices a land"] },
];

// Functional roles.
const ROLE_RULES: &[TagRule] = &[
    TagRule { tag: "role:removal", needles: &["destroy target", "exile target", "deals damage to target creature", "deals damage to any target", "-x/-x", "fight target"] },
    TagRule { tag: "role:sweeper", needles: &["destroy all creatures", "deals damage to each creature", "exile all creatures"] },
    TagRule { tag: "role:counterspell", needles: &["counter target spell", "counter target"] },
    TagRule { tag: "role:ramp", needles: &["search your library for a land", "add one mana", "add two mana", "add {", "additional land"] },
    TagRule { tag: "role:card-advantage", needles: &["draw a card", "draw two cards", "draw three cards", "look at the top"] },
    TagRule { tag: "role:tutor", needles: &["search your library for a card", "search your library for a creature", "search your library for an"] },
];

/// Compute strategic tags for a card. Pure and deterministic.
pub fn strategic_tags(card: &MtgCard) -> Vec<String> {
    let oracle = card
        .oracle_text
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let type_line = card.type_line.to_lowercase();

    let mut tags = Vec::new();

    for group in [SYNERGY_RULES, ANTI_SYNERGY_RULES, ROLE_RULES] {
        for rule in group {
            if rule.needles.iter().any(|n| oracle.contains(n)) {
                tags.push(rule.tag.to_string());
            }
        }
    }

    // Finishers: big bodies or explicit win text.
    let is_big = card
        .power
        .as_deref()
        .and_then(|p| p.parse::<i32>().ok())
        .map(|p| p >= 5)
        .unwrap_or(false);
    if is_big || oracle.contains("you win the game") || oracle.contains("loses the game") {
        tags.push("role:finisher".to_string());
    }

    // Tribal tags from creature subtypes.
    if type_line.contains("creature") {
        for subtype in &card.subtypes {
            tags.push(format!("tribal:{}", subtype.to_lowercase()));
        }
    }

    // Format fit from the legality map.
    for format in ["standard", "modern", "commander"] {
        if card.is_legal_in(format) {
            tags.push(format!("format:{format}"));
        }
    }

    tags
}

/// Deterministic text used to embed a card into the vector index.
pub fn embedding_text(card: &MtgCard) -> String {
    let colors: Vec<&str> = card
        .colors
        .iter()
        .map(|c| color_word(c))
        .collect();
    let tags = strategic_tags(card);

    format!(
        "Name: {}\nType: {}\nCost: {} (CMC {})\nColors: {}\nText: {}\nKeywords: {}\nTags: {}",
        card.name,
        card.type_line,
        card.mana_cost.as_deref().unwrap_or("-"),
        card.cmc,
        if colors.is_empty() { "colorless".to_string() } else { colors.join(", ") },
        card.oracle_text.as_deref().unwrap_or(""),
        card.keywords.join(", "),
        tags.join(", "),
    )
}

fn color_word(code: &str) -> &'static str {
    match code {
        "W" => "white",
        "U" => "blue",
        "B" => "black",
        "R" => "red",
        "G" => "green",
        _ => "colorless",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn card_with_text(text: &str) -> MtgCard {
        MtgCard {
            id: "x".into(),
            name: "Test Card".into(),
            mana_cost: Some("{1}{R}".into()),
            cmc: 2.0,
            colors: vec!["R".into()],
            color_identity: vec!["R".into()],
            type_line: "Instant".into(),
            types: vec!["Instant".into()],
            subtypes: vec![],
            oracle_text: Some(text.into()),
            power: None,
            toughness: None,
            loyalty: None,
            set_code: "tst".into(),
            rarity: "common".into(),
            legalities: HashMap::from([("modern".to_string(), "legal".to_string())]),
            keywords: vec![],
        }
    }

    #[test]
    fn test_removal_tag() {
        let card = card_with_text("Lightning Bolt deals 3 damage to any target.");
        let tags = strategic_tags(&card);
        assert!(tags.contains(&"role:removal".to_string()));
        assert!(tags.contains(&"format:modern".to_string()));
    }

    #[test]
    fn test_graveyard_synergy_tag() {
        let card = card_with_text("Return target creature card from your graveyard to your hand.");
        let tags = strategic_tags(&card);
        assert!(tags.contains(&"synergy:graveyard".to_string()));
    }

    #[test]
    fn test_tribal_tags() {
        let mut card = card_with_text("Haste");
        card.type_line = "Creature — Goblin Warrior".into();
        card.types = vec!["Creature".into()];
        card.subtypes = vec!["Goblin".into(), "Warrior".into()];
        let tags = strategic_tags(&card);
        assert!(tags.contains(&"tribal:goblin".to_string()));
        assert!(tags.contains(&"tribal:warrior".to_string()));
    }

    #[test]
    fn test_finisher_from_power() {
        let mut card = card_with_text("Trample");
        card.power = Some("7".into());
        assert!(strategic_tags(&card).contains(&"role:finisher".to_string()));
    }

    #[test]
    fn test_tags_deterministic() {
        let card = card_with_text("Destroy target creature. Draw a card.");
        assert_eq!(strategic_tags(&card), strategic_tags(&card));
    }

    #[test]
    fn test_embedding_text_includes_tags_and_colors() {
        let card = card_with_text("Destroy target creature.");
        let text = embedding_text(&card);
        assert!(text.contains("Name: Test Card"));
        assert!(text.contains("red"));
        assert!(text.contains("role:removal"));
    }
}
