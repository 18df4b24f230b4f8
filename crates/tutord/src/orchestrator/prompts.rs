//! Format-aware prompt assembly.
//!
//! Prompts pull deck size, copy limits, land counts and curve targets
//! straight from the format rule tables so the model never sees numbers
//! that disagree with what the analyzer scores against.

use tutor_common::deck::Deck;
use tutor_common::format_rules;

fn curve_lines(format: &str) -> String {
    format_rules::curve_buckets(format)
        .iter()
        .map(|b| format!("- {} CMC: ~{}% of nonland cards", b.label, (b.fraction * 100.0) as u32))
        .collect::<Vec<_>>()
        .join("\n")
}

fn quantity_rules(format: &str) -> String {
    let rules = format_rules::rules_for(format);
    if rules.singleton {
        "CARD QUANTITY RULES (SINGLETON FORMAT):\n\
         - All non-basic-land cards: EXACTLY 1 copy\n\
         - Basic lands: unlimited copies\n\
         - Build redundancy through similar effects, not duplicate cards"
            .to_string()
    } else {
        format!(
            "CARD QUANTITY RULES:\n\
             - Non-legendary cards: maximum {} copies\n\
             - Legendary cards: maximum {} copy\n\
             - Basic lands: unlimited copies\n\
             - Prefer 3-4 copies of the cards the deck leans on",
            rules.copy_limit, rules.legendary_max
        )
    }
}

const TOOL_CONTRACT: &str = "\
TOOLS:\n\
You may request catalog lookups before committing to a plan. Respond with\n\
a JSON object. To call tools:\n\
  {\"tool_requests\": [\n\
    {\"tool\": \"search_cards\", \"semantic_query\": \"cheap red removal\", \"colors\": [\"R\"], \"cmc_max\": 2, \"limit\": 20},\n\
    {\"tool\": \"get_card_details\", \"name_or_id\": \"Lightning Bolt\"}\n\
  ]}\n\
Tool results arrive in the next message. Only name cards you have seen in\n\
tool results.";

/// System prompt for the initial construction agent.
pub fn builder_system_prompt(format: &str, archetype: &str) -> String {
    let rules = format_rules::rules_for(format);
    let lands = format_rules::land_count(format, archetype);
    format!(
        "You are an expert Magic: The Gathering deck builder.\n\n\
         FORMAT: {} ({} cards)\n\
         ARCHETYPE: {} (target {} lands; lands are added for you, select SPELLS only)\n\n\
         MANA CURVE TARGETS:\n{}\n\n\
         {}\n\n\
         {}\n\n\
         When your research is done, respond with the final plan:\n\
           {{\"strategy\": \"...\", \"card_selections\": [\n\
             {{\"card_name\": \"...\", \"quantity\": 4, \"reasoning\": \"...\"}}\n\
           ]}}\n\
         Select enough spells to fill {} nonland slots. Every card must fit\n\
         the deck's colors and be legal in {}.",
        rules.name,
        rules.deck_size,
        archetype,
        lands,
        curve_lines(format),
        quantity_rules(format),
        TOOL_CONTRACT,
        rules.deck_size - lands,
        rules.name,
    )
}

/// System prompt for the refinement agent.
pub fn refine_system_prompt(format: &str) -> String {
    let rules = format_rules::rules_for(format);
    format!(
        "You are an expert Magic: The Gathering deck optimizer.\n\n\
         Improve the deck with targeted, high-impact changes: fix curve\n\
         problems, cut cards that fight the strategy, add interaction and\n\
         card advantage where missing.\n\n\
         FORMAT: {} ({} cards)\n\n\
         MANA CURVE TARGETS:\n{}\n\n\
         {}\n\n\
         {}\n\n\
         When your research is done, respond with the final plan:\n\
           {{\"analysis\": \"...\", \"actions\": [\n\
             {{\"type\": \"remove\", \"card_name\": \"...\", \"quantity\": 2, \"reasoning\": \"...\"}},\n\
             {{\"type\": \"replace\", \"card_name\": \"...\", \"quantity\": 2, \"replacement\": \"...\", \"reasoning\": \"...\"}},\n\
             {{\"type\": \"add\", \"card_name\": \"...\", \"quantity\": 4, \"reasoning\": \"...\"}}\n\
           ]}}",
        rules.name,
        rules.deck_size,
        curve_lines(format),
        quantity_rules(format),
        TOOL_CONTRACT,
    )
}

/// System prompt for the analyzer's improvement-plan call.
pub fn analyzer_system_prompt(format: &str) -> String {
    let rules = format_rules::rules_for(format);
    format!(
        "You are an expert Magic: The Gathering deck analyzer.\n\n\
         Produce a concrete improvement plan for the deck you are given:\n\
         which cards to remove, which to add, and why. Respect {} legality,\n\
         the deck's color identity and a {}-card deck size.\n\n\
         MANA CURVE TARGETS:\n{}\n\n\
         {}\n\n\
         Respond with JSON only:\n\
           {{\"removals\": [{{\"card_name\": \"...\", \"reason\": \"...\", \"quantity\": 2}}],\n\
            \"additions\": [{{\"card_name\": \"...\", \"reason\": \"...\", \"quantity\": 4}}],\n\
            \"analysis\": \"...\"}}\n\
         Give 2-5 removals and 2-5 additions with specific reasoning.",
        rules.name,
        rules.deck_size,
        curve_lines(format),
        quantity_rules(format),
    )
}

/// System prompt for intent classification.
pub fn intent_parser_prompt(format: &str) -> String {
    let rules = format_rules::rules_for(format);
    format!(
        "You classify user requests to modify a Magic: The Gathering deck.\n\n\
         FORMAT CONTEXT: {} (copy limit {})\n\n\
         INTENT TYPES:\n\
         - ADD: add cards, by name (\"add 4x Lightning Bolt\") or by kind (\"more removal\")\n\
         - REMOVE: remove cards, by name or by condition (\"remove all cards with CMC >= 6\")\n\
         - REPLACE: swap named cards for named replacements\n\
         - OPTIMIZE: improve quality without a specific card in mind\n\
         - STRATEGY_SHIFT: change the deck's overall strategy\n\n\
         Respond with JSON only:\n\
           {{\"intent_type\": \"ADD|REMOVE|REPLACE|OPTIMIZE|STRATEGY_SHIFT\",\n\
            \"description\": \"...\",\n\
            \"card_changes\": [{{\"card_name\": null, \"replacement\": null, \"quantity\": 4,\n\
                               \"search_query\": null, \"cmc_min\": null, \"cmc_max\": null}}],\n\
            \"constraints\": [],\n\
            \"confidence\": 0.9}}\n\
         Use search_query for abstract requests, cmc_min/cmc_max for CMC\n\
         conditions, and card_name for specific cards. Extract every change\n\
         the user mentions.",
        rules.name, rules.copy_limit,
    )
}

/// Render the deck as a list the model can read.
pub fn render_decklist(deck: &Deck) -> String {
    deck.cards
        .iter()
        .map(|dc| {
            format!(
                "{}x {} (CMC {}, {})",
                dc.quantity, dc.card.name, dc.card.cmc, dc.card.type_line
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_prompt_reflects_format() {
        let standard = builder_system_prompt("Standard", "Aggro");
        assert!(standard.contains("Standard (60 cards)"));
        assert!(standard.contains("target 22 lands"));
        assert!(standard.contains("maximum 4 copies"));

        let commander = builder_system_prompt("Commander", "Midrange");
        assert!(commander.contains("Commander (100 cards)"));
        assert!(commander.contains("SINGLETON"));
    }

    #[test]
    fn test_intent_prompt_lists_all_kinds() {
        let prompt = intent_parser_prompt("Standard");
        for kind in ["ADD", "REMOVE", "REPLACE", "OPTIMIZE", "STRATEGY_SHIFT"] {
            assert!(prompt.contains(kind), "{kind}");
        }
    }
}
