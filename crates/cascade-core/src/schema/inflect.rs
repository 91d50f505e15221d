/// English plural of an association or type name.
///
/// Only the regular suffix rules; association names in practice are snake_case
/// nouns and irregular plurals are declared explicitly.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    if word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }
    let mut chars = word.chars().rev();
    let last = chars.next().unwrap_or_default();
    let before = chars.next();
    match last {
        's' | 'x' | 'z' => format!("{word}es"),
        'y' if before.is_some_and(|c| !is_vowel(c)) => {
            format!("{}ies", &word[..word.len() - 1])
        }
        _ => format!("{word}s"),
    }
}

/// Inverse of [`pluralize`] for the same regular suffixes.
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["ches", "shes", "ses", "xes", "zes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    match word.strip_suffix('s') {
        Some(stem) if !stem.is_empty() && !stem.ends_with(['s', 'u']) => stem.to_string(),
        _ => word.to_string(),
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}
