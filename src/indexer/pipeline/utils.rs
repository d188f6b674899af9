use crate::indexer::extract::StructuralEntity;

/// Text handed to the embedder for one entity: a `kind name` header over the
/// source, cut to `max_chars` characters.
pub fn embedding_text(entity: &StructuralEntity, max_chars: usize) -> String {
    let text = format!("{} {}\n{}", entity.kind.as_str(), entity.name, entity.content);
    truncate_chars(&text, max_chars).to_string()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Similarity in (0, 1] from an L2 distance; identical vectors score 1.
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}
