//! Format rule tables.
//!
//! Single source of truth for per-format constraints: deck size, copy
//! limits, singleton rules, archetype land counts, curve shape and the
//! land-ratio band. Both the analyzer and the builder consult these
//! tables; nothing else hardcodes a format constant.

/// Rules for one format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatRules {
    pub name: &'static str,
    pub deck_size: u32,
    /// Max copies of any non-basic-land card.
    pub copy_limit: u32,
    pub singleton: bool,
    /// Max copies of a legendary non-basic-land card.
    pub legendary_max: u32,
    /// Ideal fraction of the deck that is lands.
    pub land_ratio: f64,
}

/// One CMC bucket of the ideal curve. `max` is inclusive; `None` means
/// unbounded (the `6+` bucket).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveBucket {
    pub label: &'static str,
    pub min: u32,
    pub max: Option<u32>,
    pub fraction: f64,
}

const SIXTY_CARD_CURVE: [CurveBucket; 4] = [
    CurveBucket { label: "0-1", min: 0, max: Some(1), fraction: 0.15 },
    CurveBucket { label: "2-3", min: 2, max: Some(3), fraction: 0.40 },
    CurveBucket { label: "4-5", min: 4, max: Some(5), fraction: 0.30 },
    CurveBucket { label: "6+", min: 6, max: None, fraction: 0.15 },
];

const COMMANDER_CURVE: [CurveBucket; 4] = [
    CurveBucket { label: "0-1", min: 0, max: Some(1), fraction: 0.08 },
    CurveBucket { label: "2-3", min: 2, max: Some(3), fraction: 0.25 },
    CurveBucket { label: "4-5", min: 4, max: Some(5), fraction: 0.30 },
    CurveBucket { label: "6+", min: 6, max: None, fraction: 0.37 },
];

const FORMATS: [FormatRules; 7] = [
    FormatRules { name: "Standard", deck_size: 60, copy_limit: 4, singleton: false, legendary_max: 1, land_ratio: 0.40 },
    FormatRules { name: "Modern", deck_size: 60, copy_limit: 4, singleton: false, legendary_max: 1, land_ratio: 0.40 },
    FormatRules { name: "Pioneer", deck_size: 60, copy_limit: 4, singleton: false, legendary_max: 1, land_ratio: 0.40 },
    FormatRules { name: "Legacy", deck_size: 60, copy_limit: 4, singleton: false, legendary_max: 1, land_ratio: 0.40 },
    FormatRules { name: "Vintage", deck_size: 60, copy_limit: 4, singleton: false, legendary_max: 1, land_ratio: 0.40 },
    FormatRules { name: "Brawl", deck_size: 60, copy_limit: 4, singleton: false, legendary_max: 1, land_ratio: 0.40 },
    FormatRules { name: "Commander", deck_size: 100, copy_limit: 1, singleton: true, legendary_max: 1, land_ratio: 0.37 },
];

/// Look up rules by format name, case-insensitive. Unknown formats fall
/// back to Standard so a misparsed request still builds a legal deck.
pub fn rules_for(format: &str) -> FormatRules {
    FORMATS
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(format))
        .copied()
        .unwrap_or(FORMATS[0])
}

/// Whether the format name is one of the known tables.
pub fn is_known_format(format: &str) -> bool {
    FORMATS.iter().any(|f| f.name.eq_ignore_ascii_case(format))
}

pub fn deck_size(format: &str) -> u32 {
    rules_for(format).deck_size
}

pub fn copy_limit(format: &str) -> u32 {
    rules_for(format).copy_limit
}

pub fn is_singleton(format: &str) -> bool {
    rules_for(format).singleton
}

pub fn legendary_max(format: &str) -> u32 {
    rules_for(format).legendary_max
}

pub fn land_ratio(format: &str) -> f64 {
    rules_for(format).land_ratio
}

/// Ideal curve buckets for a format.
pub fn curve_buckets(format: &str) -> &'static [CurveBucket] {
    if rules_for(format).deck_size == 100 {
        &COMMANDER_CURVE
    } else {
        &SIXTY_CARD_CURVE
    }
}

/// Recommended land count for a format and archetype. Archetypes outside
/// the core four (tempo, ramp, other) use the midrange number.
pub fn land_count(format: &str, archetype: &str) -> u32 {
    let commander = rules_for(format).deck_size == 100;
    match archetype.to_lowercase().as_str() {
        "aggro" => {
            if commander {
                35
            } else {
                22
            }
        }
        "control" => {
            if commander {
                38
            } else {
                26
            }
        }
        "combo" => {
            if commander {
                35
            } else {
                23
            }
        }
        _ => {
            if commander {
                36
            } else {
                24
            }
        }
    }
}

/// The effective copy cap for one concrete card in one format.
pub fn copy_cap(format: &str, is_basic_land: bool, is_legendary: bool) -> u32 {
    if is_basic_land {
        return u32::MAX;
    }
    let rules = rules_for(format);
    if rules.singleton {
        return 1;
    }
    if is_legendary {
        return rules.legendary_max;
    }
    rules.copy_limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deck_sizes() {
        assert_eq!(deck_size("Standard"), 60);
        assert_eq!(deck_size("commander"), 100);
        assert_eq!(deck_size("MODERN"), 60);
    }

    #[test]
    fn test_unknown_format_defaults_to_standard() {
        assert_eq!(deck_size("Penny Dreadful"), 60);
        assert_eq!(copy_limit("Penny Dreadful"), 4);
        assert!(!is_known_format("Penny Dreadful"));
        assert!(is_known_format("pioneer"));
    }

    #[test]
    fn test_singleton_implies_copy_limit_one() {
        for f in ["Standard", "Modern", "Pioneer", "Legacy", "Vintage", "Brawl", "Commander"] {
            if is_singleton(f) {
                assert_eq!(copy_limit(f), 1, "{f}");
                assert_eq!(copy_cap(f, false, false), 1, "{f}");
                assert_eq!(copy_cap(f, false, true), 1, "{f}");
            }
        }
    }

    #[test]
    fn test_copy_cap() {
        assert_eq!(copy_cap("Standard", false, false), 4);
        assert_eq!(copy_cap("Standard", false, true), 1);
        assert_eq!(copy_cap("Standard", true, false), u32::MAX);
        assert_eq!(copy_cap("Commander", true, false), u32::MAX);
        assert_eq!(copy_cap("Commander", false, false), 1);
    }

    #[test]
    fn test_land_counts() {
        assert_eq!(land_count("Standard", "Aggro"), 22);
        assert_eq!(land_count("Standard", "Control"), 26);
        assert_eq!(land_count("Standard", "Tempo"), 24);
        assert_eq!(land_count("Commander", "Midrange"), 36);
    }

    #[test]
    fn test_curve_fractions_sum_to_one() {
        for format in ["Standard", "Commander"] {
            let total: f64 = curve_buckets(format).iter().map(|b| b.fraction).sum();
            assert!((total - 1.0).abs() < 1e-9, "{format}: {total}");
        }
    }

    #[test]
    fn test_curve_buckets_cover_all_cmcs() {
        let buckets = curve_buckets("Standard");
        for cmc in 0..12u32 {
            let hits = buckets
                .iter()
                .filter(|b| cmc >= b.min && b.max.map(|m| cmc <= m).unwrap_or(true))
                .count();
            assert_eq!(hits, 1, "cmc {cmc}");
        }
    }
}
