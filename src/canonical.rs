use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

pub fn normalize_statement(statement: &str) -> String {
    let folded: String = statement.nfc().collect::<String>().to_lowercase();
    let collapsed = collapse_whitespace(&folded);
    collapsed
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
        .to_string()
}

pub fn canonical_id_for_statement(statement: &str) -> String {
    derive_id("hyp", normalize_statement(statement).as_bytes())
}

pub fn canonical_node_id(node_key: &str, statement: &str) -> String {
    let normalized = format!("{}|{}", node_key, normalize_statement(statement));
    derive_id("node", normalized.as_bytes())
}

pub fn fingerprint_value(prefix: &str, value: &serde_json::Value) -> String {
    derive_id(prefix, canonicalize_json(value).to_string().as_bytes())
}

fn derive_id(prefix: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let hex = format!("{:x}", digest);
    format!("{}:{}", prefix, &hex[..24])
}

pub fn canonicalize_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys = map.keys().cloned().collect::<Vec<_>>();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(item) = map.get(&key) {
                    sorted.insert(key, canonicalize_json(item));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize_json).collect())
        }
        primitive => primitive.clone(),
    }
}

pub fn normalize_quote(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    let mapped: String = nfc
        .chars()
        .filter(|ch| !is_zero_width_or_control(*ch))
        .map(map_typographic)
        .collect();
    collapse_whitespace(&mapped).to_lowercase()
}

fn is_zero_width_or_control(ch: char) -> bool {
    matches!(
        ch,
        '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}'
    ) || (ch.is_control() && !ch.is_whitespace())
}

fn map_typographic(ch: char) -> char {
    match ch {
        '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
        '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
        '\u{00A0}' => ' ',
        other => other,
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_gap = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_gap {
                out.push(' ');
                in_gap = true;
            }
        } else {
            out.push(ch);
            in_gap = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{
        canonical_id_for_statement, canonicalize_json, normalize_quote, normalize_statement,
    };

    #[test]
    fn normalization_folds_case_whitespace_and_trailing_punctuation() {
        assert_eq!(
            normalize_statement("  The   Alpha\tMechanism.  "),
            "the alpha mechanism"
        );
        assert_eq!(normalize_statement("Beta?!"), "beta");
    }

    #[test]
    fn canonical_ids_are_stable_across_presentation_variants() {
        let a = canonical_id_for_statement("Alpha mechanism");
        let b = canonical_id_for_statement("  alpha   MECHANISM. ");
        assert_eq!(a, b);
        assert!(a.starts_with("hyp:"));
        assert_eq!(a.len(), "hyp:".len() + 24);
    }

    #[test]
    fn distinct_statements_get_distinct_ids() {
        assert_ne!(
            canonical_id_for_statement("alpha mechanism"),
            canonical_id_for_statement("beta mechanism")
        );
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = serde_json::json!({"b": {"z": 1, "a": 2}, "a": [ {"k": 1, "j": 2} ]});
        assert_eq!(
            canonicalize_json(&value).to_string(),
            r#"{"a":[{"j":2,"k":1}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn quote_normalization_strips_zero_width_and_maps_typography() {
        assert_eq!(
            normalize_quote("\u{201C}Fuel\u{200B} was \u{2014} low\u{201D}"),
            "\"fuel was - low\""
        );
    }
}
