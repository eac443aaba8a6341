//! Alternate spellings of a resource path's file extension.
//!
//! Content packs are authored on case-insensitive filesystems, so a catalog
//! may reference `cat.jpg` while the file on the server is `cat.JPG`. The
//! fetcher falls back to these candidates only after an exact lookup misses.

/// Candidate paths for `path`, original spelling first.
///
/// The lowercase, uppercase and capitalized extension forms follow, each only
/// when it differs from every candidate already listed. A path whose final
/// segment has no extension yields just itself.
pub fn case_variants(path: &str) -> Vec<String> {
    let mut variants = vec![path.to_string()];

    let Some((stem, extension)) = split_extension(path) else {
        return variants;
    };

    let lower = extension.to_lowercase();
    let upper = extension.to_uppercase();
    let capitalized = capitalize(&lower);

    for candidate_extension in [lower, upper, capitalized] {
        let candidate = format!("{stem}.{candidate_extension}");
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }

    variants
}

/// Split `path` at the extension dot of its final segment.
///
/// Dot-files (`/.well-known`) and trailing dots have no extension.
fn split_extension(path: &str) -> Option<(&str, &str)> {
    let segment_start = path.rfind('/').map_or(0, |idx| idx + 1);
    let dot = segment_start + path[segment_start..].rfind('.')?;

    if dot == segment_start || dot + 1 == path.len() {
        return None;
    }

    Some((&path[..dot], &path[dot + 1..]))
}

fn capitalize(lower: &str) -> String {
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
