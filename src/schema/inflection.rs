//! English pluralization for derived relationship names
//!
//! Collection names are camelCase, so only the trailing word is inflected.

const UNCOUNTABLE: &[&str] = &[
    "data",
    "equipment",
    "feedback",
    "information",
    "media",
    "metadata",
    "news",
    "series",
    "sheep",
    "species",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("child", "children"),
    ("foot", "feet"),
    ("goose", "geese"),
    ("man", "men"),
    ("mouse", "mice"),
    ("person", "people"),
    ("tooth", "teeth"),
    ("woman", "women"),
];

/// Plural form of a (possibly camelCase) collection name
pub fn pluralize(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    let split = last_word_start(name);
    let (head, word) = name.split_at(split);
    let lower = word.to_lowercase();

    if UNCOUNTABLE.contains(&lower.as_str()) {
        return name.to_string();
    }

    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return format!("{}{}", head, match_case(word, plural));
    }

    let plural_word = if ends_with_any(&lower, &["s", "x", "z", "ch", "sh"]) {
        format!("{}es", word)
    } else if lower.ends_with('y') && !ends_with_vowel_y(&lower) {
        format!("{}ies", &word[..word.len() - 1])
    } else if lower.ends_with("fe") {
        format!("{}ves", &word[..word.len() - 2])
    } else if lower.ends_with('f') && !lower.ends_with("ff") {
        format!("{}ves", &word[..word.len() - 1])
    } else {
        format!("{}s", word)
    };

    format!("{}{}", head, plural_word)
}

/// Byte offset where the trailing camelCase word begins
fn last_word_start(name: &str) -> usize {
    name.char_indices()
        .filter(|(i, c)| *i > 0 && c.is_uppercase())
        .map(|(i, _)| i)
        .last()
        .unwrap_or(0)
}

fn ends_with_any(word: &str, suffixes: &[&str]) -> bool {
    suffixes.iter().any(|suffix| word.ends_with(suffix))
}

fn ends_with_vowel_y(word: &str) -> bool {
    let mut chars = word.chars().rev();
    chars.next();
    matches!(chars.next(), Some('a' | 'e' | 'i' | 'o' | 'u'))
}

fn match_case(original: &str, replacement: &str) -> String {
    match original.chars().next() {
        Some(first) if first.is_uppercase() => {
            let mut chars = replacement.chars();
            chars
                .next()
                .map(|c| c.to_uppercase().chain(chars).collect())
                .unwrap_or_default()
        }
        _ => replacement.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_plurals() {
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("newsletter"), "newsletters");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("key"), "keys");
    }

    #[test]
    fn test_camel_case_inflects_last_word() {
        assert_eq!(pluralize("userEmail"), "userEmails");
        assert_eq!(pluralize("newsletterSubscription"), "newsletterSubscriptions");
        assert_eq!(pluralize("teamPerson"), "teamPeople");
        assert_eq!(pluralize("pageEntry"), "pageEntries");
    }

    #[test]
    fn test_irregular_and_uncountable() {
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("child"), "children");
        assert_eq!(pluralize("media"), "media");
        assert_eq!(pluralize("userMetadata"), "userMetadata");
    }
}
