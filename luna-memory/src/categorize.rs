//! Keyword categorisation and emotion tagging for stored text.

use serde::{Deserialize, Serialize};

/// Coarse category assigned to a memory when the caller gives none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Something to do or remember at a given time.
    Task,
    /// Likes, dislikes and habits.
    Preference,
    /// Facts about the user and their circle.
    Personal,
    /// Statements dominated by a feeling.
    Emotion,
    /// General knowledge.
    Fact,
    /// Anything else.
    General,
}

impl MemoryCategory {
    /// Returns the label written into record metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Preference => "preference",
            Self::Personal => "personal",
            Self::Emotion => "emotion",
            Self::Fact => "fact",
            Self::General => "general",
        }
    }
}

// Checked in order; the first category with a matching phrase wins.
const CATEGORY_PHRASES: &[(MemoryCategory, &[&str])] = &[
    (
        MemoryCategory::Task,
        &[
            "remind me", "todo", "to do", "need to", "have to", "appointment", "meeting",
            "deadline", "schedule", "tomorrow",
        ],
    ),
    (
        MemoryCategory::Preference,
        &[
            "i like", "i love", "i prefer", "i hate", "i enjoy", "i dislike", "favorite",
            "favourite",
        ],
    ),
    (
        MemoryCategory::Personal,
        &[
            "my name", "i am", "i'm", "i live", "my wife", "my husband", "my family",
            "my birthday", "my job", "i work",
        ],
    ),
];

const FACT_PHRASES: &[&str] = &[
    "is the", "are the", "was born", "capital of", "located in", "consists of", "means",
];

const EMOTION_WORDS: &[(&str, &[&str])] = &[
    ("joy", &["happy", "glad", "excited", "joy", "delighted", "thrilled"]),
    ("sadness", &["sad", "unhappy", "depressed", "lonely", "miserable", "down"]),
    ("anger", &["angry", "furious", "annoyed", "mad", "irritated"]),
    ("fear", &["afraid", "scared", "anxious", "worried", "nervous"]),
    ("surprise", &["surprised", "shocked", "amazed", "astonished"]),
];

/// Assigns a category from keyword matches.
#[must_use]
pub fn categorize(text: &str) -> MemoryCategory {
    let normalized = normalize(text);
    for (category, phrases) in CATEGORY_PHRASES {
        if phrases.iter().any(|phrase| contains_phrase(&normalized, phrase)) {
            return *category;
        }
    }
    if !detect_emotions(text).is_empty() {
        return MemoryCategory::Emotion;
    }
    if FACT_PHRASES
        .iter()
        .any(|phrase| contains_phrase(&normalized, phrase))
    {
        return MemoryCategory::Fact;
    }
    MemoryCategory::General
}

/// Returns the emotion labels whose words appear in `text`, in a fixed order.
#[must_use]
pub fn detect_emotions(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    EMOTION_WORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|word| contains_phrase(&normalized, word)))
        .map(|(label, _)| (*label).to_owned())
        .collect()
}

// Lowercased words separated by single spaces, padded so phrase matching
// respects word boundaries.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect();
    format!(" {} ", words.join(" "))
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    normalized.contains(&format!(" {phrase} "))
}
