//! Dependency paths.
//!
//! A path is the root-to-leaf list of keys joined with [`SEPARATOR`]. Computed
//! caches get a shadow segment that cannot collide with a data key.

use std::rc::Rc;

pub(crate) const SEPARATOR: char = '\u{1f}';
const SHADOW: char = '\u{0}';

pub(crate) fn join(keys: &[Rc<str>], leaf: &str) -> String {
    let mut out = String::with_capacity(keys.iter().map(|k| k.len() + 1).sum::<usize>() + leaf.len());
    for k in keys {
        out.push_str(k);
        out.push(SEPARATOR);
    }
    out.push_str(leaf);
    out
}

/// Shadow segment for the cache of computed property `key`.
pub(crate) fn shadow(key: &str) -> String {
    format!("{SHADOW}{key}")
}

/// True when `path` is `prefix` itself or nested under it.
pub(crate) fn is_within(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(SEPARATOR),
        None => false,
    }
}

/// Human-readable rendering: `items.0.title`, with computed caches as `#key`.
pub fn display(path: &str) -> String {
    path.split(SEPARATOR)
        .map(|seg| match seg.strip_prefix(SHADOW) {
            Some(key) => format!("#{key}"),
            None => seg.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Largest sequence length; indices stop one below it.
pub(crate) const MAX_LENGTH: usize = u32::MAX as usize;

/// Canonical decimal index (`"0"`, `"12"`; not `"01"` or `"+1"`) below
/// [`MAX_LENGTH`].
pub(crate) fn parse_index(key: &str) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key.len() == 1 || !key.starts_with('0'));
    if !canonical {
        return None;
    }
    key.parse::<u32>()
        .ok()
        .map(|i| i as usize)
        .filter(|i| *i < MAX_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_keys_root_to_leaf() {
        let keys: Vec<Rc<str>> = vec!["items".into(), "0".into()];
        let p = join(&keys, "title");
        assert_eq!(display(&p), "items.0.title");
        assert_eq!(join(&[], "a"), "a");
    }

    #[test]
    fn prefix_matching_respects_segments() {
        let a = join(&[], "a");
        let ab = join(&["a".into()], "b");
        let abc = join(&[], "abc");
        assert!(is_within(&a, &a));
        assert!(is_within(&ab, &a));
        assert!(!is_within(&abc, &a));
    }

    #[test]
    fn shadow_segments_render_with_hash() {
        let p = join(&["user".into()], &shadow("full"));
        assert_eq!(display(&p), "user.#full");
    }

    #[test]
    fn only_canonical_indices_parse() {
        assert_eq!(parse_index("0"), Some(0));
        assert_eq!(parse_index("42"), Some(42));
        assert_eq!(parse_index("04"), None);
        assert_eq!(parse_index("-1"), None);
        assert_eq!(parse_index("length"), None);
        assert_eq!(parse_index(""), None);
        assert_eq!(parse_index("4294967294"), Some(4_294_967_294));
        assert_eq!(parse_index("4294967295"), None);
        assert_eq!(parse_index("18446744073709551615"), None);
    }
}
