//! Identifier scrubbing.

/// Characters that never survive into an identifier.
pub const FORBIDDEN_CHARS: &[char] = &[';', '(', ')', '"', '\'', '%', '*'];

fn is_forbidden(c: char) -> bool {
    FORBIDDEN_CHARS.contains(&c)
}

/// Remove every forbidden character from `s`.
///
/// This scrubs identifiers that are embedded textually into statements.
/// Values are bound as parameters and never go through here.
///
/// ```
/// assert_eq!(layersync_sql::sanitize("drop;table(x)"), "droptablex");
/// ```
pub fn sanitize(s: &str) -> String {
    s.chars().filter(|&c| !is_forbidden(c)).collect()
}

/// Replace every forbidden character in `s` with `replacement`.
///
/// The replacement is sanitized first, so it cannot reintroduce a
/// forbidden character.
///
/// ```
/// assert_eq!(layersync_sql::sanitize_with_replacement("a;b", "_"), "a_b");
/// assert_eq!(layersync_sql::sanitize_with_replacement("a;b", "'"), "ab");
/// ```
pub fn sanitize_with_replacement(s: &str, replacement: &str) -> String {
    let replacement = sanitize(replacement);
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if is_forbidden(c) {
            out.push_str(&replacement);
        } else {
            out.push(c);
        }
    }
    out
}
