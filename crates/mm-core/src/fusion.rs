//! FusionRanker (C10): groups per-modality nearest-neighbor hits by
//! `file_id`, computes a weighted score, and localizes the best-matching
//! time window per file.
//!
//! The group-by-`file_id`/weighted-average shape mirrors the multimodal
//! fusion stage of the system this grew from (per-modality results tagged,
//! grouped by file id, weighted-averaged, re-sorted); the temporal
//! clustering step is new.

use std::collections::HashMap;

use uuid::Uuid;

use crate::constants::{ACCURACY_REQUIREMENT_MS, SYNC_TOLERANCE_MS};
use crate::model::Modality;
use crate::vector_store::SearchHit;

/// Per-modality weight driving how much a hit in that modality contributes
/// to a file's fused score. Weights need not sum to 1 but usually do.
pub type WeightMap = HashMap<Modality, f32>;

/// A single modality's raw hit against one file, carrying enough context to
/// both score and temporally localize the match.
#[derive(Debug, Clone)]
pub struct ModalityHit {
    pub modality: Modality,
    pub score: f32,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// A cluster of temporally-adjacent hits within one file.
#[derive(Debug, Clone)]
pub struct TimeCluster {
    pub start_ms: i64,
    pub end_ms: i64,
    pub confidence: f32,
    pub modalities: Vec<Modality>,
    /// Whether every cross-modal pair of hits inside this cluster also
    /// satisfies the narrower `SYNC_TOLERANCE_MS` alignment guarantee, not
    /// just the looser `ACCURACY_REQUIREMENT_MS` gap used to form it.
    pub synced: bool,
}

/// A fused result for one file.
#[derive(Debug, Clone)]
pub struct FusedResult {
    pub file_id: Uuid,
    pub score: f32,
    pub modality_scores: HashMap<Modality, f32>,
    pub clusters: Vec<TimeCluster>,
    pub best_cluster: Option<TimeCluster>,
}

/// Convert raw per-modality search hits into fused, file-grouped results.
///
/// `hits_by_modality` maps each queried modality to the raw k-NN hits
/// against that modality's collection, already resolved to `(file_id,
/// ModalityHit)` pairs by the caller (typically via
/// `Catalog::resolve_vector_to_timestamp`).
pub fn fuse(
    hits_by_modality: &HashMap<Modality, Vec<(Uuid, ModalityHit)>>,
    weights: &WeightMap,
) -> Vec<FusedResult> {
    let mut by_file: HashMap<Uuid, Vec<ModalityHit>> = HashMap::new();
    for hits in hits_by_modality.values() {
        for (file_id, hit) in hits {
            by_file.entry(*file_id).or_default().push(hit.clone());
        }
    }

    let mut results: Vec<FusedResult> = by_file
        .into_iter()
        .map(|(file_id, hits)| fuse_one_file(file_id, hits, weights))
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ca = a.best_cluster.as_ref().map_or(0.0, |c| c.confidence);
                let cb = b.best_cluster.as_ref().map_or(0.0, |c| c.confidence);
                cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    results
}

fn fuse_one_file(file_id: Uuid, hits: Vec<ModalityHit>, weights: &WeightMap) -> FusedResult {
    // Base score: sum over modalities of w_m * max(score in that modality).
    let mut best_per_modality: HashMap<Modality, f32> = HashMap::new();
    for hit in &hits {
        let entry = best_per_modality.entry(hit.modality).or_insert(0.0);
        if hit.score > *entry {
            *entry = hit.score;
        }
    }
    let score: f32 = best_per_modality
        .iter()
        .map(|(m, s)| weights.get(m).copied().unwrap_or(0.0) * s)
        .sum();

    let clusters = cluster_by_time(&hits, weights);
    let best_cluster = clusters
        .iter()
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
        .cloned();

    FusedResult {
        file_id,
        score,
        modality_scores: best_per_modality,
        clusters,
        best_cluster,
    }
}

/// 1-D agglomerative merge of hits by proximity: sort by start time, then
/// greedily extend the current cluster while the gap to the next hit is
/// within the accuracy requirement. This is the general clustering bound;
/// `SYNC_TOLERANCE_MS` is a narrower, separate guarantee checked per-cluster
/// afterward via `is_cross_modal_synced`, not the merge criterion itself.
fn cluster_by_time(hits: &[ModalityHit], weights: &WeightMap) -> Vec<TimeCluster> {
    if hits.is_empty() {
        return Vec::new();
    }

    let tolerance = ACCURACY_REQUIREMENT_MS as i64;

    let mut sorted: Vec<&ModalityHit> = hits.iter().collect();
    sorted.sort_by_key(|h| h.start_ms);

    let mut clusters: Vec<Vec<&ModalityHit>> = Vec::new();
    let mut current: Vec<&ModalityHit> = vec![sorted[0]];

    for hit in &sorted[1..] {
        let last = current.last().unwrap();
        if hit.start_ms - last.end_ms <= tolerance {
            current.push(hit);
        } else {
            clusters.push(current);
            current = vec![hit];
        }
    }
    clusters.push(current);

    clusters
        .into_iter()
        .map(|group| {
            let start_ms = group.iter().map(|h| h.start_ms).min().unwrap_or(0);
            let end_ms = group.iter().map(|h| h.end_ms).max().unwrap_or(0);
            let confidence: f32 = group
                .iter()
                .map(|h| weights.get(&h.modality).copied().unwrap_or(0.0) * h.score)
                .sum();
            let mut modalities: Vec<Modality> = group.iter().map(|h| h.modality).collect();
            modalities.dedup();
            let synced = is_cross_modal_synced(&group);
            TimeCluster {
                start_ms,
                end_ms,
                confidence,
                modalities,
                synced,
            }
        })
        .collect()
}

/// Whether every cross-modal pair of hits in this cluster falls within
/// `SYNC_TOLERANCE_MS` of each other — a narrower guarantee than the
/// `ACCURACY_REQUIREMENT_MS` gap used to form the cluster itself. `group` is
/// sorted ascending by `start_ms`, so only forward pairs need checking.
fn is_cross_modal_synced(group: &[&ModalityHit]) -> bool {
    for i in 0..group.len() {
        for j in (i + 1)..group.len() {
            if group[i].modality == group[j].modality {
                continue;
            }
            if group[j].start_ms - group[i].end_ms > SYNC_TOLERANCE_MS {
                return false;
            }
        }
    }
    true
}

/// Drop hits below `threshold` before fusion, mirroring `VectorStore::Search`'s
/// own score filter for callers that pool hits from several collections.
pub fn filter_by_score(hits: Vec<SearchHit>, threshold: f32) -> Vec<SearchHit> {
    hits.into_iter().filter(|h| h.score >= threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> WeightMap {
        let mut w = HashMap::new();
        w.insert(Modality::VisualFrame, 0.5);
        w.insert(Modality::AudioSpeech, 0.5);
        w
    }

    #[test]
    fn single_modality_file_scores_as_weight_times_score() {
        let file_id = Uuid::new_v4();
        let mut hits = HashMap::new();
        hits.insert(
            Modality::VisualFrame,
            vec![(
                file_id,
                ModalityHit {
                    modality: Modality::VisualFrame,
                    score: 0.8,
                    start_ms: 0,
                    end_ms: 0,
                },
            )],
        );

        let results = fuse(&hits, &weights());
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.4).abs() < 1e-6);
    }

    #[test]
    fn cross_modal_hits_merge_when_within_sync_tolerance() {
        let file_id = Uuid::new_v4();
        let mut hits = HashMap::new();
        hits.insert(
            Modality::VisualFrame,
            vec![(
                file_id,
                ModalityHit {
                    modality: Modality::VisualFrame,
                    score: 0.9,
                    start_ms: 1000,
                    end_ms: 1000,
                },
            )],
        );
        hits.insert(
            Modality::AudioSpeech,
            vec![(
                file_id,
                ModalityHit {
                    modality: Modality::AudioSpeech,
                    score: 0.7,
                    start_ms: 1100,
                    end_ms: 1300,
                },
            )],
        );

        let results = fuse(&hits, &weights());
        assert_eq!(results[0].clusters.len(), 1);
        assert_eq!(results[0].clusters[0].modalities.len(), 2);
        assert!(results[0].clusters[0].synced);
    }

    #[test]
    fn cross_modal_hits_merge_within_accuracy_requirement_but_outside_sync_tolerance() {
        let file_id = Uuid::new_v4();
        let mut hits = HashMap::new();
        hits.insert(
            Modality::AudioSpeech,
            vec![(
                file_id,
                ModalityHit {
                    modality: Modality::AudioSpeech,
                    score: 0.7,
                    start_ms: 42_000,
                    end_ms: 42_800,
                },
            )],
        );
        hits.insert(
            Modality::VisualFrame,
            vec![(
                file_id,
                ModalityHit {
                    modality: Modality::VisualFrame,
                    score: 0.9,
                    start_ms: 43_100,
                    end_ms: 43_100,
                },
            )],
        );

        let results = fuse(&hits, &weights());
        assert_eq!(results[0].clusters.len(), 1);
        assert!(results[0].clusters[0].modalities.contains(&Modality::AudioSpeech));
        assert!(results[0].clusters[0].modalities.contains(&Modality::VisualFrame));
        assert!(!results[0].clusters[0].synced);
    }

    #[test]
    fn distant_hits_form_separate_clusters() {
        let file_id = Uuid::new_v4();
        let mut hits = HashMap::new();
        hits.insert(
            Modality::AudioSpeech,
            vec![
                (
                    file_id,
                    ModalityHit {
                        modality: Modality::AudioSpeech,
                        score: 0.6,
                        start_ms: 0,
                        end_ms: 100,
                    },
                ),
                (
                    file_id,
                    ModalityHit {
                        modality: Modality::AudioSpeech,
                        score: 0.6,
                        start_ms: 50_000,
                        end_ms: 50_100,
                    },
                ),
            ],
        );

        let results = fuse(&hits, &weights());
        assert_eq!(results[0].clusters.len(), 2);
    }

    #[test]
    fn results_sort_by_score_descending() {
        let file_a = Uuid::new_v4();
        let file_b = Uuid::new_v4();
        let mut hits = HashMap::new();
        hits.insert(
            Modality::VisualFrame,
            vec![
                (
                    file_a,
                    ModalityHit {
                        modality: Modality::VisualFrame,
                        score: 0.3,
                        start_ms: 0,
                        end_ms: 0,
                    },
                ),
                (
                    file_b,
                    ModalityHit {
                        modality: Modality::VisualFrame,
                        score: 0.9,
                        start_ms: 0,
                        end_ms: 0,
                    },
                ),
            ],
        );

        let results = fuse(&hits, &weights());
        assert_eq!(results[0].file_id, file_b);
    }
}
