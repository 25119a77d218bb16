use std::collections::BTreeSet;

use globaliq_core::config::CollectorConfig;

use crate::router::{tokenize, tokenize_all};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyIntent {
    Affirmative,
    Negative,
    Cancel,
    /// Anything that carries information. Treated as a correction while confirming.
    Content,
}

const AFFIRMATIVE: &[&str] = &[
    "yes", "y", "yeah", "yep", "yup", "ok", "okay", "sure", "correct", "confirm", "confirmed",
    "proceed", "start", "right", "good", "great", "perfect", "fine", "absolutely", "exactly",
];

const NEGATIVE: &[&str] = &["no", "nope", "nah", "not", "wrong", "incorrect", "different"];

const CANCEL: &[&str] =
    &["cancel", "stop", "quit", "abort", "exit", "start over", "never mind", "nevermind", "forget it"];

// Words that may surround a token without turning the reply into content.
const FILLER: &[&str] = &[
    "please", "go", "ahead", "that", "thats", "s", "is", "it", "its", "all", "looks", "sounds",
    "thanks", "thank", "you", "the", "this", "these", "are", "details", "let", "lets", "do", "and",
    "just", "oh", "well", "so", "very", "quite", "seems", "those", "sir",
];

/// Explicit token sets that classify a short reply. Entries may be multi-word phrases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyTokens {
    affirmative: Vec<Vec<String>>,
    negative: Vec<Vec<String>>,
    cancel: Vec<Vec<String>>,
    filler: BTreeSet<String>,
}

impl Default for ReplyTokens {
    fn default() -> Self {
        Self {
            affirmative: tokenize_all(&owned(AFFIRMATIVE)),
            negative: tokenize_all(&owned(NEGATIVE)),
            cancel: tokenize_all(&owned(CANCEL)),
            filler: FILLER.iter().map(|word| word.to_string()).collect(),
        }
    }
}

impl ReplyTokens {
    pub fn from_config(config: &CollectorConfig) -> Self {
        let mut tokens = Self::default();
        if let Some(affirmative) = &config.affirmative_tokens {
            tokens.affirmative = tokenize_all(affirmative);
        }
        if let Some(negative) = &config.negative_tokens {
            tokens.negative = tokenize_all(negative);
        }
        if let Some(cancel) = &config.cancel_tokens {
            tokens.cancel = tokenize_all(cancel);
        }
        tokens
    }

    pub fn classify(&self, utterance: &str) -> ReplyIntent {
        let words = tokenize(utterance);
        if self.covers(&words, &self.cancel) {
            ReplyIntent::Cancel
        } else if self.covers(&words, &self.negative) {
            ReplyIntent::Negative
        } else if self.covers(&words, &self.affirmative) {
            ReplyIntent::Affirmative
        } else {
            ReplyIntent::Content
        }
    }

    /// True when every word belongs to a token entry or the filler set, with at least one entry hit.
    fn covers(&self, words: &[String], entries: &[Vec<String>]) -> bool {
        let mut index = 0;
        let mut hit = false;
        while index < words.len() {
            let longest = entries
                .iter()
                .filter(|entry| words[index..].starts_with(entry))
                .map(Vec::len)
                .max();
            match longest {
                Some(length) => {
                    hit = true;
                    index += length;
                }
                None if self.filler.contains(&words[index]) => index += 1,
                None => return false,
            }
        }
        hit
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
