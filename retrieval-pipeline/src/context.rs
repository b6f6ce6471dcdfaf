use common::storage::index::RetrievalResult;

const BLOCK_SEPARATOR: &str = "\n\n";

/// Joins surviving passages into the prompt context, highest score first.
///
/// When the budget runs out, the lowest-scoring tail is dropped whole; a kept
/// passage is never cut mid-text, so citations stay intact. The top result is
/// always kept even if it alone exceeds the budget. Returns the context
/// string together with the results that made it in.
pub fn assemble_context(
    results: &[RetrievalResult],
    budget_chars: usize,
) -> (String, Vec<RetrievalResult>) {
    let mut kept = Vec::new();
    let mut blocks: Vec<String> = Vec::new();
    let mut used = 0usize;

    for result in results {
        let label = result
            .text_unit
            .metadata
            .get("collection_display")
            .cloned()
            .unwrap_or_else(|| result.text_unit.collection.clone());
        let block = format!(
            "[{label} | {id}]\n{text}",
            id = result.unit_id,
            text = result.text_unit.normalized_text
        );
        let separator = if blocks.is_empty() {
            0
        } else {
            BLOCK_SEPARATOR.chars().count()
        };
        let cost = block.chars().count() + separator;
        if !kept.is_empty() && used + cost > budget_chars {
            break;
        }
        used += cost;
        blocks.push(block);
        kept.push(result.clone());
    }

    (blocks.join(BLOCK_SEPARATOR), kept)
}
