use std::collections::BTreeMap;

use polyrag_core::types::{Modality, Route};

const IMAGE_KEYWORDS: &[&str] = &[
    "image", "images", "picture", "pictures", "photo", "photos", "photograph", "screenshot", "diagram",
    "illustration", "drawing", "visual", "show me", "looks like", "look like", "what does it look",
];

const STRUCTURED_KEYWORDS: &[&str] = &[
    "table", "tables", "csv", "spreadsheet", "column", "columns", "row", "rows", "record", "records", "inventory",
    "statistics", "average", "total", "count", "how many", "how much", "list all",
];

const TEXT_KEYWORDS: &[&str] = &[
    "document", "documents", "article", "manual", "guide", "notes", "explain", "describe", "summary", "summarize",
    "what is", "how to", "how do", "why does", "instructions",
];

/// Keyword-based modality routing.
#[derive(Debug, Clone)]
pub struct ModalityDetector {
    default: Modality,
    auto_detect: bool,
    keywords: BTreeMap<Modality, Vec<String>>,
}

impl Default for ModalityDetector {
    fn default() -> Self {
        Self::new(Modality::Text, true)
    }
}

impl ModalityDetector {
    pub fn new(default: Modality, auto_detect: bool) -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| (*w).to_string()).collect::<Vec<_>>();
        let mut keywords = BTreeMap::new();
        keywords.insert(Modality::Text, owned(TEXT_KEYWORDS));
        keywords.insert(Modality::Image, owned(IMAGE_KEYWORDS));
        keywords.insert(Modality::Structured, owned(STRUCTURED_KEYWORDS));
        Self { default, auto_detect, keywords }
    }

    pub fn with_keywords(mut self, modality: Modality, words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords.insert(modality, words.into_iter().map(|w| w.into().to_lowercase()).collect());
        self
    }

    pub fn default_modality(&self) -> Modality {
        self.default
    }

    /// Keywords of `modality` found in `query`, words and phrases alike.
    pub fn matches(&self, query: &str, modality: Modality) -> Vec<&str> {
        let padded = padded_tokens(query);
        self.keywords
            .get(&modality)
            .map(|words| words.iter().filter(|w| padded.contains(&format!(" {w} "))).map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Modalities with at least one keyword hit, in modality order.
    pub fn matching_modalities(&self, query: &str) -> Vec<Modality> {
        self.keywords.keys().copied().filter(|m| !self.matches(query, *m).is_empty()).collect()
    }

    pub fn detect(&self, query: &str) -> Route {
        if !self.auto_detect {
            return Route::Single(self.default);
        }
        let mut hits = self.matching_modalities(query);
        match hits.len() {
            0 => Route::Single(self.default),
            1 => Route::Single(hits.remove(0)),
            _ => Route::Multi(hits),
        }
    }

    /// An explicit modality always wins over detection.
    pub fn resolve(&self, query: &str, explicit: Option<Modality>) -> Route {
        match explicit {
            Some(m) => Route::Single(m),
            None => self.detect(query),
        }
    }
}

fn padded_tokens(query: &str) -> String {
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
    format!(" {} ", tokens.join(" "))
}
