//! Chat message parameter extraction.
//!
//! The chat surface is free text; format, colors and archetype are
//! pulled out by substring matching with fixed defaults, and `context`
//! fields override whatever the text yields. Routing between the
//! new-deck and modification flows is decided by request shape alone
//! (presence of `existing_deck`), never by guessing at the text.

use serde_json::Value;
use tutor_common::card::color_word_to_code;
use tutor_common::deck::{
    default_max_iterations, default_quality_threshold, DeckBuildRequest,
};

const FORMATS: [&str; 6] = ["Standard", "Modern", "Commander", "Legacy", "Vintage", "Pioneer"];
const ARCHETYPES: [&str; 4] = ["Aggro", "Control", "Midrange", "Combo"];
const COLOR_WORDS: [&str; 5] = ["white", "blue", "black", "red", "green"];
const COLOR_CODES: [&str; 5] = ["W", "U", "B", "R", "G"];

/// Extract build parameters from a chat message plus optional context.
pub fn parse_build_request(message: &str, context: Option<&Value>) -> DeckBuildRequest {
    let lower = message.to_lowercase();

    let format = FORMATS
        .iter()
        .find(|f| lower.contains(&f.to_lowercase()))
        .unwrap_or(&"Standard")
        .to_string();

    // Spelled-out color words first, then standalone uppercase codes
    // ("a Commander U deck").
    let mut colors: Vec<String> = Vec::new();
    for word in COLOR_WORDS {
        if lower.contains(word) {
            if let Some(code) = color_word_to_code(word) {
                colors.push(code.to_string());
            }
        }
    }
    for token in message.split_whitespace() {
        if COLOR_CODES.contains(&token) {
            colors.push(token.to_string());
        }
    }
    // Dedupe into canonical WUBRG order.
    let mut ordered: Vec<String> = Vec::new();
    for code in COLOR_CODES {
        if colors.iter().any(|c| c == code) {
            ordered.push(code.to_string());
        }
    }
    let mut colors = ordered;

    let mut archetype = ARCHETYPES
        .iter()
        .find(|a| lower.contains(&a.to_lowercase()))
        .map(|a| a.to_string());

    let mut quality_threshold = default_quality_threshold();
    let mut max_iterations = default_max_iterations();

    if let Some(context) = context {
        if colors.is_empty() {
            if let Some(ctx_colors) = context.get("colors").and_then(|v| v.as_array()) {
                colors = ctx_colors
                    .iter()
                    .filter_map(|c| c.as_str().map(|s| s.to_string()))
                    .collect();
            }
        }
        if archetype.is_none() {
            archetype = context
                .get("archetype")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
        }
        if let Some(threshold) = context.get("quality_threshold").and_then(|v| v.as_f64()) {
            quality_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(iterations) = context.get("max_iterations").and_then(|v| v.as_u64()) {
            max_iterations = iterations as u32;
        }
    }

    if colors.is_empty() {
        colors = vec!["R".to_string()];
    }

    DeckBuildRequest {
        format,
        colors,
        archetype: archetype.unwrap_or_else(|| "Aggro".to_string()),
        strategy: Some(message.to_string()),
        quality_threshold,
        max_iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_standard_red_aggro() {
        let request = parse_build_request("Build a Standard red aggro deck", None);
        assert_eq!(request.format, "Standard");
        assert_eq!(request.colors, vec!["R".to_string()]);
        assert_eq!(request.archetype, "Aggro");
        assert_eq!(request.quality_threshold, 0.7);
        assert_eq!(request.max_iterations, 5);
    }

    #[test]
    fn test_parse_commander_letter_code() {
        let request = parse_build_request("Build a Commander U deck", None);
        assert_eq!(request.format, "Commander");
        assert_eq!(request.colors, vec!["U".to_string()]);
    }

    #[test]
    fn test_parse_defaults() {
        let request = parse_build_request("Make me something fun", None);
        assert_eq!(request.format, "Standard");
        assert_eq!(request.colors, vec!["R".to_string()]);
        assert_eq!(request.archetype, "Aggro");
    }

    #[test]
    fn test_parse_multicolor_in_wubrg_order() {
        let request = parse_build_request("green and white midrange for Modern", None);
        assert_eq!(request.format, "Modern");
        assert_eq!(request.colors, vec!["W".to_string(), "G".to_string()]);
        assert_eq!(request.archetype, "Midrange");
    }

    #[test]
    fn test_context_overrides() {
        let context = json!({
            "colors": ["B", "U"],
            "archetype": "Control",
            "quality_threshold": 0.85,
            "max_iterations": 2
        });
        let request = parse_build_request("Build a deck", Some(&context));
        assert_eq!(request.colors, vec!["B".to_string(), "U".to_string()]);
        assert_eq!(request.archetype, "Control");
        assert_eq!(request.quality_threshold, 0.85);
        assert_eq!(request.max_iterations, 2);
    }

    #[test]
    fn test_message_beats_context() {
        let context = json!({"archetype": "Control"});
        let request = parse_build_request("Build a red aggro deck", Some(&context));
        assert_eq!(request.archetype, "Aggro");
        assert_eq!(request.colors, vec!["R".to_string()]);
    }
}
