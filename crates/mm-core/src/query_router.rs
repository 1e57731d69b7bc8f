//! QueryRouter (C9): classifies a raw query string into a `QueryPlan` — a
//! query type plus per-modality weights and, for person queries, a
//! pre-resolved set of candidate files — before the FusionRanker runs.
//!
//! Classification is a small keyword-rule cascade rather than a learned
//! classifier, following the keyword-trigger dispatch the query layer this
//! grew from used to pick between its embedding and keyword-search paths.

use std::collections::HashMap;

use uuid::Uuid;

use crate::catalog::Catalog;
use crate::constants::PERSON_MIN_COVERAGE;
use crate::error::StorageError;
use crate::fusion::WeightMap;
use crate::model::Modality;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Generic,
    Visual,
    Audio,
    Speech,
    Person,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub query_type: QueryType,
    pub query_text: String,
    pub weights: WeightMap,
    /// Populated only for `Person` queries: files known to contain the named
    /// person, used to restrict or boost the fused results.
    pub candidate_files: Vec<Uuid>,
}

const VISUAL_KEYWORDS: &[&str] = &["looks like", "wearing", "picture of", "photo of", "scene", "image of"];
const AUDIO_KEYWORDS: &[&str] = &["sounds like", "music", "song", "playing", "soundtrack"];
const SPEECH_KEYWORDS: &[&str] = &["said", "says", "talking about", "mentioned", "conversation"];
const PERSON_PREFIXES: &[&str] = &["who is", "find ", "videos with ", "photos with "];

pub struct QueryRouter<'a> {
    catalog: &'a Catalog,
}

impl<'a> QueryRouter<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    pub fn plan(&self, query_text: &str) -> Result<QueryPlan, StorageError> {
        let lower = query_text.to_lowercase();

        if let Some(name) = extract_person_name(&lower, query_text) {
            let candidate_files = self.catalog.get_files_containing_person(&name)?;
            // A thin or empty whitelist can't carry face/visual-heavy weights
            // responsibly; fall back to a generic classification instead.
            if candidate_files.len() >= PERSON_MIN_COVERAGE {
                return Ok(QueryPlan {
                    query_type: QueryType::Person,
                    query_text: query_text.to_string(),
                    weights: weights_for(QueryType::Person),
                    candidate_files,
                });
            }
        }

        let query_type = classify_type(&lower);
        Ok(QueryPlan {
            query_type,
            query_text: query_text.to_string(),
            weights: weights_for(query_type),
            candidate_files: Vec::new(),
        })
    }
}

fn classify_type(lower: &str) -> QueryType {
    if SPEECH_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        QueryType::Speech
    } else if AUDIO_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        QueryType::Audio
    } else if VISUAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        QueryType::Visual
    } else {
        QueryType::Generic
    }
}

/// If the query names a person, return the name portion with the trigger
/// prefix stripped. Crude but cheap; false positives just fall back to a
/// normal search since `candidate_files` stays empty when the name matches
/// nobody in the Catalog.
fn extract_person_name(lower: &str, original: &str) -> Option<String> {
    for prefix in PERSON_PREFIXES {
        if let Some(rest) = lower.strip_prefix(prefix) {
            let start = original.len() - rest.len();
            let name = original[start..].trim().trim_end_matches('?').trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn weights_for(query_type: QueryType) -> WeightMap {
    let mut w = HashMap::new();
    match query_type {
        QueryType::Generic => {
            w.insert(Modality::Text, 0.3);
            w.insert(Modality::Image, 0.25);
            w.insert(Modality::VisualFrame, 0.25);
            w.insert(Modality::AudioSpeech, 0.2);
        }
        QueryType::Visual => {
            w.insert(Modality::Image, 0.5);
            w.insert(Modality::VisualFrame, 0.4);
            w.insert(Modality::Text, 0.1);
        }
        QueryType::Audio => {
            w.insert(Modality::AudioMusic, 0.7);
            w.insert(Modality::AudioSpeech, 0.3);
        }
        QueryType::Speech => {
            w.insert(Modality::AudioSpeech, 0.7);
            w.insert(Modality::Text, 0.3);
        }
        QueryType::Person => {
            w.insert(Modality::Face, 0.6);
            w.insert(Modality::VisualFrame, 0.3);
            w.insert(Modality::Image, 0.1);
        }
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_keyword_routes_to_visual_type() {
        let catalog = Catalog::in_memory().unwrap();
        let router = QueryRouter::new(&catalog);
        let plan = router.plan("a photo of a mountain at sunset").unwrap();
        assert_eq!(plan.query_type, QueryType::Visual);
        assert!(plan.weights[&Modality::Image] > 0.0);
    }

    #[test]
    fn speech_keyword_routes_to_speech_type() {
        let catalog = Catalog::in_memory().unwrap();
        let router = QueryRouter::new(&catalog);
        let plan = router.plan("the part where she said goodbye").unwrap();
        assert_eq!(plan.query_type, QueryType::Speech);
    }

    #[test]
    fn unmatched_query_falls_back_to_generic() {
        let catalog = Catalog::in_memory().unwrap();
        let router = QueryRouter::new(&catalog);
        let plan = router.plan("summer vacation").unwrap();
        assert_eq!(plan.query_type, QueryType::Generic);
    }

    #[test]
    fn person_prefix_with_no_registered_candidates_falls_back_to_generic() {
        let catalog = Catalog::in_memory().unwrap();
        let router = QueryRouter::new(&catalog);
        let plan = router.plan("who is Alice").unwrap();
        assert_eq!(plan.query_type, QueryType::Generic);
        assert!(plan.candidate_files.is_empty());
    }

    #[test]
    fn person_prefix_with_registered_candidates_routes_to_person() {
        let mut catalog = Catalog::in_memory().unwrap();
        let file = crate::model::File {
            file_id: Uuid::new_v4(),
            content_hash: "abc".into(),
            path: "/tmp/a.jpg".into(),
            ref_paths: vec![],
            size: 1,
            file_type: "image".into(),
            mtime: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
        };
        catalog.insert_file_with_segments(&file, &[], &[]).unwrap();
        let person_id = catalog.register_person("Alice", &[]).unwrap();
        catalog.tag_person_in_file(person_id, file.file_id).unwrap();

        let router = QueryRouter::new(&catalog);
        let plan = router.plan("who is Alice").unwrap();
        assert_eq!(plan.query_type, QueryType::Person);
        assert_eq!(plan.candidate_files, vec![file.file_id]);
        assert!(plan.weights[&Modality::Face] > 0.0);
    }
}
