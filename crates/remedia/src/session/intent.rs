//! Deterministic classification of inbound content.
//!
//! This is a rule evaluator, not NLU: configured affirmative tokens and
//! termination phrases are matched case- and diacritic-insensitively, and
//! anything unmatched is `Other` — never an error.

use remedia_channel_protocol::InboundContent;

use super::machine::EventClass;

/// Classifies inbound content into exactly one [`EventClass`].
///
/// An image attachment takes precedence over any text that accompanies it.
/// Termination is an exact match against a configured phrase; consent is a
/// whole-word match against a configured token. Both lists are normalized
/// once at construction.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    affirmative_tokens: Vec<String>,
    termination_phrases: Vec<String>,
}

impl IntentClassifier {
    pub fn new(affirmative_tokens: &[String], termination_phrases: &[String]) -> Self {
        Self {
            affirmative_tokens: affirmative_tokens
                .iter()
                .map(|t| normalize(t))
                .filter(|t| !t.is_empty())
                .collect(),
            termination_phrases: termination_phrases
                .iter()
                .map(|p| normalize(p))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Classify one inbound content. Deterministic and side-effect-free.
    pub fn classify(&self, content: &InboundContent) -> EventClass {
        if let Some(image_ref) = &content.image_ref {
            return EventClass::Image {
                image_ref: image_ref.clone(),
            };
        }

        let Some(text) = content.text.as_deref() else {
            return EventClass::Other;
        };
        let normalized = normalize(text);
        if normalized.is_empty() {
            return EventClass::Other;
        }

        if self.termination_phrases.iter().any(|p| *p == normalized) {
            return EventClass::Termination;
        }

        if self
            .affirmative_tokens
            .iter()
            .any(|t| contains_phrase(&normalized, t))
        {
            return EventClass::ConsentAffirmative;
        }

        EventClass::Other
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Lowercase, fold Spanish diacritics, drop punctuation, collapse whitespace.
fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(fold_char)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

/// Whole-word containment: `needle` must appear on word boundaries.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}
