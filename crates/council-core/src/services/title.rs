use crate::models::conversation::DEFAULT_TITLE;

/// Title shown for a freshly created conversation until the server sends a
/// generated one.
///
/// Whitespace is collapsed, and input longer than `max_chars` characters is
/// cut at the last word boundary that fits and suffixed with `...`.
pub fn provisional_title(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }

    let cut = collapsed
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(collapsed.len());
    let head = &collapsed[..cut];

    // Fall back to a hard cut when the first word alone is too long
    let head = match head.rfind(' ') {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };

    format!("{}...", head.trim_end())
}
