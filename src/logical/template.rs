// Query Text Helpers
//
// Variable-aware search and substitution over SPARQL text. A variable `?x`
// only matches when it is not the prefix of a longer name such as `?xy`.

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte offsets of every occurrence of `?var` in `text`
fn occurrences(text: &str, var: &str) -> Vec<usize> {
    let needle = format!("?{}", var);
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(pos) = text[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        if !text[end..].chars().next().is_some_and(is_name_char) {
            found.push(start);
        }
        from = end;
    }
    found
}

/// True when `text` mentions the variable `?var`
pub fn mentions_var(text: &str, var: &str) -> bool {
    !occurrences(text, var).is_empty()
}

/// Replace the first `limit` occurrences of `?var` (all of them when
/// `limit` is `None`) with `replacement`.
pub fn substitute_var(text: &str, var: &str, replacement: &str, limit: Option<usize>) -> String {
    let needle_len = var.len() + 1;
    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for (n, start) in occurrences(text, var).into_iter().enumerate() {
        if limit.is_some_and(|l| n >= l) {
            break;
        }
        result.push_str(&text[last..start]);
        result.push_str(replacement);
        last = start + needle_len;
    }
    result.push_str(&text[last..]);
    result
}
