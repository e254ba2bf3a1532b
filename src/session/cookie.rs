//! Parsing and merging of `Cookie` header values.
//!
//! The catalog API answers login and refresh calls with raw `Set-Cookie`
//! fragments (`MUSIC_U=..; Max-Age=..; Path=/;;__csrf=..`). Only the
//! `name=value` pairs are kept; cookie attributes are dropped.

/// Claves que son atributos de cookie y no valores de sesión
const ATTRIBUTE_KEYS: [&str; 7] = [
    "expires", "path", "domain", "max-age", "secure", "httponly", "samesite",
];

/// Pares `nombre=valor` en orden de aparición
///
/// Si una clave se repite gana la última aparición, conservando la posición
/// de la primera.
pub fn parse_cookie(raw: &str) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    for part in raw.split(';') {
        let (key, value) = match part.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (part.trim(), ""),
        };

        if key.is_empty() || is_attribute(key) {
            continue;
        }

        match pairs.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => pairs.push((key.to_string(), value.to_string())),
        }
    }

    pairs
}

pub fn format_cookie(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Limpia una cookie recibida del API dejando solo los pares de sesión
pub fn normalize_cookie(raw: &str) -> String {
    format_cookie(&parse_cookie(raw))
}

/// Combina la cookie actual con un fragmento nuevo
///
/// Las claves del fragmento reemplazan a las existentes con el mismo nombre y
/// el resto se conserva.
pub fn merge_cookie(current: &str, fresh: &str) -> String {
    let mut pairs = parse_cookie(current);

    for (key, value) in parse_cookie(fresh) {
        match pairs.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => pairs.push((key, value)),
        }
    }

    format_cookie(&pairs)
}

fn is_attribute(key: &str) -> bool {
    ATTRIBUTE_KEYS
        .iter()
        .any(|attribute| attribute.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn as_map(cookie: &str) -> HashMap<String, String> {
        parse_cookie(cookie).into_iter().collect()
    }

    #[test]
    fn test_merge_overrides_and_preserves() {
        let merged = merge_cookie("a=1; b=2", "b=3; c=4");
        assert_eq!(merged, "a=1; b=3; c=4");

        let expected: HashMap<String, String> = [("a", "1"), ("b", "3"), ("c", "4")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(as_map(&merged), expected);
    }

    #[test]
    fn test_attributes_are_dropped() {
        let fragment = "MUSIC_U=abc; Max-Age=1296000; Expires=Tue, 01 Jan 2030 00:00:00 GMT; Path=/;;__csrf=xyz; HTTPOnly";
        assert_eq!(normalize_cookie(fragment), "MUSIC_U=abc; __csrf=xyz");
    }

    #[test]
    fn test_values_may_contain_equals() {
        let pairs = parse_cookie("token=a=b==; x=1");
        assert_eq!(pairs[0], ("token".to_string(), "a=b==".to_string()));
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(merge_cookie("", ""), "");
        assert_eq!(merge_cookie("", "a=1"), "a=1");
        assert_eq!(merge_cookie("a=1", ";;"), "a=1");
    }
}
