//! Vector similarity utilities.

use cadence_core::memory::EmbeddingEntry;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank entries by cosine similarity to `query`, best first, with `score`
/// set on each returned entry.
pub fn rank_by_similarity(
    entries: &[EmbeddingEntry],
    query: &[f32],
    limit: usize,
    min_score: f32,
) -> Vec<EmbeddingEntry> {
    let mut scored: Vec<EmbeddingEntry> = entries
        .iter()
        .filter_map(|entry| {
            let sim = cosine_similarity(&entry.vector, query);
            (sim >= min_score).then(|| {
                let mut e = entry.clone();
                e.score = sim;
                e
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}
