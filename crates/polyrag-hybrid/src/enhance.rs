//! Query enhancement: classification, expansion and hypothetical documents.
//!
//! Every step is best effort. A failed step is logged, recorded in
//! [`RoutingInfo::failed_steps`] and the pipeline carries on with the last good
//! query.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use polyrag_core::error::Result;
use polyrag_core::types::{
    FusionMethod, Modality, ModalityWeights, QueryType, RetrievalTuning, Route, RoutingDecision,
};

use crate::modality::ModalityDetector;

pub trait QueryClassifier: Send + Sync {
    fn classify(&self, query: &str) -> Result<RoutingDecision>;
}

pub trait QueryExpander: Send + Sync {
    /// Paraphrases of `query`; the first becomes the working query.
    fn expand(&self, query: &str) -> Result<Vec<String>>;
}

pub trait HypotheticalDocumentGenerator: Send + Sync {
    fn generate(&self, query: &str, query_type: QueryType) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementStep {
    Classification,
    Expansion,
    Hyde,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub original: String,
    pub query_type: QueryType,
    pub route: Option<Route>,
    pub confidence: f32,
    pub weights: Option<ModalityWeights>,
    pub fusion_method: Option<FusionMethod>,
    pub alternates: Vec<String>,
    pub hypothetical_docs: Vec<String>,
    pub hyde_adopted: bool,
    pub failed_steps: Vec<EnhancementStep>,
}

impl RoutingInfo {
    fn unclassified(original: &str) -> Self {
        Self {
            original: original.to_string(),
            query_type: QueryType::General,
            route: None,
            confidence: 0.0,
            weights: None,
            fusion_method: None,
            alternates: Vec::new(),
            hypothetical_docs: Vec::new(),
            hyde_adopted: false,
            failed_steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedQuery {
    pub query: String,
    pub routing: RoutingInfo,
}

pub struct QueryEnhancer {
    classifier: Box<dyn QueryClassifier>,
    expander: Box<dyn QueryExpander>,
    hyde: Box<dyn HypotheticalDocumentGenerator>,
}

impl QueryEnhancer {
    pub fn new(
        classifier: Box<dyn QueryClassifier>,
        expander: Box<dyn QueryExpander>,
        hyde: Box<dyn HypotheticalDocumentGenerator>,
    ) -> Self {
        Self { classifier, expander, hyde }
    }

    /// Rule-based helpers only; no model or service is needed.
    pub fn rule_based(detector: ModalityDetector) -> Self {
        Self::new(
            Box::new(KeywordQueryClassifier::new(detector)),
            Box::new(SynonymQueryExpander::default()),
            Box::new(TemplateHydeGenerator),
        )
    }

    pub fn enhance(&self, query: &str) -> EnhancedQuery {
        let mut routing = RoutingInfo::unclassified(query);
        let mut working = query.to_string();

        match self.classifier.classify(query) {
            Ok(decision) => {
                routing.query_type = decision.query_type;
                routing.route = Some(decision.route);
                routing.confidence = decision.confidence;
                routing.weights = decision.tuning.weights;
                routing.fusion_method = decision.tuning.fusion_method;
            }
            Err(e) => {
                warn!(error = %e, "query classification failed");
                routing.failed_steps.push(EnhancementStep::Classification);
            }
        }

        match self.expander.expand(&working) {
            Ok(mut paraphrases) if !paraphrases.is_empty() => {
                working = paraphrases.remove(0);
                routing.alternates = paraphrases;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "query expansion failed");
                routing.failed_steps.push(EnhancementStep::Expansion);
            }
        }

        match self.hyde.generate(&working, routing.query_type) {
            Ok(docs) => {
                if let Some(best) = docs.iter().max_by_key(|d| content_terms(d).len()) {
                    if content_terms(best).len() > content_terms(&working).len() {
                        working = best.clone();
                        routing.hyde_adopted = true;
                    }
                }
                routing.hypothetical_docs = docs;
            }
            Err(e) => {
                warn!(error = %e, "hypothetical document generation failed");
                routing.failed_steps.push(EnhancementStep::Hyde);
            }
        }

        debug!(query_type = ?routing.query_type, hyde = routing.hyde_adopted, failed = routing.failed_steps.len(), "query enhanced");
        EnhancedQuery { query: working, routing }
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "i", "in", "is", "it", "me",
    "my", "of", "on", "or", "the", "to", "what", "when", "where", "which", "who", "why", "with",
];

/// Distinct lowercase terms that are not stop words.
pub fn content_terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn contains_phrase(query: &str, phrase: &str) -> bool {
    let lowered = query.to_lowercase();
    let tokens: Vec<&str> = lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
    format!(" {} ", tokens.join(" ")).contains(&format!(" {phrase} "))
}

const TYPE_KEYWORDS: &[(QueryType, &[&str])] = &[
    (QueryType::Comparative, &["compare", "comparison", "versus", "vs", "difference", "differences", "better than"]),
    (QueryType::Procedural, &["how to", "how do", "how can", "steps", "step by step", "install", "build", "fix"]),
    (QueryType::Conceptual, &["why", "explain", "concept", "overview", "understand", "meaning"]),
    (QueryType::Factual, &["what is", "what are", "who", "when", "where", "which", "define"]),
];

/// Intent keywords plus modality detection.
pub struct KeywordQueryClassifier {
    detector: ModalityDetector,
}

impl KeywordQueryClassifier {
    pub fn new(detector: ModalityDetector) -> Self {
        Self { detector }
    }
}

impl QueryClassifier for KeywordQueryClassifier {
    fn classify(&self, query: &str) -> Result<RoutingDecision> {
        let route = self.detector.detect(query);
        let (query_type, hits) = match &route {
            Route::Single(Modality::Image) => (QueryType::Visual, self.detector.matches(query, Modality::Image).len()),
            Route::Single(Modality::Structured) => {
                (QueryType::Tabular, self.detector.matches(query, Modality::Structured).len())
            }
            _ => TYPE_KEYWORDS
                .iter()
                .map(|(ty, words)| (*ty, words.iter().filter(|w| contains_phrase(query, w)).count()))
                .find(|(_, n)| *n > 0)
                .unwrap_or((QueryType::General, 0)),
        };
        let confidence = if hits == 0 { 0.3 } else { (0.5 + 0.15 * hits as f32).min(0.95) };
        let tuning = match query_type {
            QueryType::Visual => RetrievalTuning { weights: Some(ModalityWeights::new(0.2, 0.7, 0.1)), fusion_method: None },
            QueryType::Tabular => RetrievalTuning { weights: Some(ModalityWeights::new(0.2, 0.1, 0.7)), fusion_method: None },
            QueryType::Comparative => RetrievalTuning {
                weights: Some(ModalityWeights::new(0.5, 0.2, 0.3)),
                fusion_method: Some(FusionMethod::ReciprocalRank),
            },
            _ => RetrievalTuning::default(),
        };
        Ok(RoutingDecision { route, query_type, confidence, tuning })
    }
}

const SYNONYMS: &[(&str, &[&str])] = &[
    ("photo", &["picture", "image"]),
    ("picture", &["photo", "image"]),
    ("car", &["vehicle", "automobile"]),
    ("fix", &["repair", "troubleshoot"]),
    ("repair", &["fix", "maintenance"]),
    ("garden", &["planting", "vegetable", "beds"]),
    ("water", &["irrigation", "watering"]),
    ("soil", &["compost", "dirt"]),
    ("table", &["spreadsheet", "records"]),
    ("cost", &["price", "expense"]),
    ("storage", &["pantry", "preserving"]),
    ("power", &["electricity", "solar", "energy"]),
    ("animal", &["livestock"]),
    ("error", &["failure", "fault"]),
];

/// Appends related terms from a fixed synonym map.
pub struct SynonymQueryExpander {
    max_added_terms: usize,
}

impl Default for SynonymQueryExpander {
    fn default() -> Self {
        Self { max_added_terms: 5 }
    }
}

impl SynonymQueryExpander {
    fn lookup(word: &str) -> Option<&'static [&'static str]> {
        let lowered = word.to_lowercase();
        let singular = lowered.strip_suffix('s').unwrap_or(&lowered);
        SYNONYMS.iter().find(|(w, _)| *w == lowered || *w == singular).map(|(_, syns)| *syns)
    }
}

impl QueryExpander for SynonymQueryExpander {
    /// `[query + related terms, one substitution per expandable word...]`, or
    /// just `[query]` when nothing expands.
    fn expand(&self, query: &str) -> Result<Vec<String>> {
        let words: Vec<&str> = query.split_whitespace().collect();
        let mut added: Vec<&str> = Vec::new();
        let mut substitutions = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
            let Some(syns) = Self::lookup(trimmed) else { continue };
            for syn in syns {
                if !words.iter().any(|w| w.eq_ignore_ascii_case(syn)) && !added.contains(syn) {
                    added.push(*syn);
                }
            }
            let mut variant = words.clone();
            variant[i] = syns[0];
            substitutions.push(variant.join(" "));
        }
        if added.is_empty() {
            return Ok(vec![query.to_string()]);
        }
        added.truncate(self.max_added_terms);
        let mut out = vec![format!("{} {}", query, added.join(" "))];
        out.extend(substitutions);
        Ok(out)
    }
}

/// Drafts a short answer-shaped passage per query type.
pub struct TemplateHydeGenerator;

impl HypotheticalDocumentGenerator for TemplateHydeGenerator {
    fn generate(&self, query: &str, query_type: QueryType) -> Result<Vec<String>> {
        let query = query.trim().trim_end_matches('?');
        let doc = match query_type {
            QueryType::General => return Ok(Vec::new()),
            QueryType::Factual => format!("{query}: a reference entry with the key facts, definitions and details."),
            QueryType::Procedural => {
                format!("Step-by-step instructions for {query}, including required tools, materials and common mistakes.")
            }
            QueryType::Conceptual => format!("Background on {query}: the underlying principles, causes and explanation."),
            QueryType::Comparative => {
                format!("A comparison covering {query}, listing similarities, differences, tradeoffs and recommendations.")
            }
            QueryType::Visual => format!("A photo or diagram showing {query}, with a caption describing what is pictured."),
            QueryType::Tabular => format!("A table of records about {query}, with columns, counts and totals."),
        };
        Ok(vec![doc])
    }
}
