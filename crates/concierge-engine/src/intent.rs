use std::collections::BTreeMap;

use serde::Serialize;

/// Which capability categories a request appears to need.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntentAnalysis {
    pub flags: BTreeMap<String, bool>,
    /// In `[0, 1]`.
    pub confidence: f64,
}

impl IntentAnalysis {
    pub fn requires(&self, category: &str) -> bool {
        self.flags.get(category).copied().unwrap_or(false)
    }

    /// Categories flagged as required, in name order.
    pub fn required(&self) -> Vec<String> {
        self.flags
            .iter()
            .filter(|(_, &on)| on)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Classifies free text into required capability categories. Advisory only.
pub trait IntentAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> IntentAnalysis;
}

/// Case-insensitive substring matching against fixed keyword sets.
#[derive(Clone, Debug)]
pub struct KeywordIntentAnalyzer {
    categories: Vec<(String, Vec<String>)>,
    weight: f64,
}

impl KeywordIntentAnalyzer {
    pub fn new(categories: Vec<(String, Vec<String>)>, weight: f64) -> Self {
        Self { categories, weight }
    }

    /// Flights, hotels, eSIM and activities; each matched category adds 0.25.
    pub fn travel() -> Self {
        let set = |name: &str, words: &[&str]| {
            (
                name.to_string(),
                words.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
            )
        };
        Self::new(
            vec![
                set(
                    "flights",
                    &["flight", "fly", "airline", "airport", "departure", "arrival"],
                ),
                set(
                    "hotels",
                    &["hotel", "accommodation", "stay", "room", "check-in", "check-out"],
                ),
                set(
                    "esim",
                    &["esim", "sim card", "data plan", "mobile data", "internet"],
                ),
                set(
                    "activities",
                    &["activity", "tour", "attraction", "sightseeing", "experience"],
                ),
            ],
            0.25,
        )
    }
}

impl IntentAnalyzer for KeywordIntentAnalyzer {
    fn analyze(&self, text: &str) -> IntentAnalysis {
        let folded = text.to_lowercase();
        let mut flags = BTreeMap::new();
        let mut matched = 0usize;
        for (name, keywords) in &self.categories {
            let hit = keywords.iter().any(|k| folded.contains(k.as_str()));
            if hit {
                matched += 1;
            }
            flags.insert(name.clone(), hit);
        }
        IntentAnalysis {
            flags,
            confidence: (matched as f64 * self.weight).min(1.0),
        }
    }
}
