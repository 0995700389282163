//! Query string and path decoding.

use std::borrow::Cow;
use std::collections::HashMap;

/// Decoded query parameters. A key may repeat; values keep their order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    values: HashMap<String, Vec<String>>,
}

impl QueryParams {
    /// Decodes `a=1&b=2&a=3` using `application/x-www-form-urlencoded` rules
    /// (`+` is a space, percent escapes are decoded, invalid UTF-8 is
    /// replaced).
    pub fn parse(query: &str) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            values
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        Self { values }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values for `key`, empty when the key is absent.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Splits a request target into its path and optional query string.
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Percent-decodes a path. `+` is kept literally, unlike in query strings.
///
/// Returns `None` when an escape is truncated or not hex, or when the
/// decoded bytes are not valid UTF-8.
pub fn decode_path(path: &str) -> Option<Cow<'_, str>> {
    let malformed = path.split('%').skip(1).any(|rest| {
        !rest
            .as_bytes()
            .get(..2)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    });
    if malformed {
        return None;
    }
    urlencoding::decode(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_keep_order() {
        let query = QueryParams::parse("tag=a&limit=10&tag=b");

        assert_eq!(query.get("tag"), Some("a"));
        assert_eq!(query.get_all("tag"), ["a".to_string(), "b".to_string()]);
        assert_eq!(query.get("limit"), Some("10"));
        assert!(query.get_all("missing").is_empty());
    }

    #[test]
    fn form_decoding() {
        let query = QueryParams::parse("q=hello+world&name=J%C3%BCrgen&flag");

        assert_eq!(query.get("q"), Some("hello world"));
        assert_eq!(query.get("name"), Some("Jürgen"));
        assert_eq!(query.get("flag"), Some(""));
    }

    #[test]
    fn target_split() {
        assert_eq!(split_target("/search?q=rust"), ("/search", Some("q=rust")));
        assert_eq!(split_target("/plain"), ("/plain", None));
        assert_eq!(split_target("/empty?"), ("/empty", Some("")));
    }

    #[test]
    fn path_decoding() {
        assert_eq!(decode_path("/a%20b").as_deref(), Some("/a b"));
        assert_eq!(decode_path("/a+b").as_deref(), Some("/a+b"));
        assert_eq!(decode_path("/bad%2").as_deref(), None);
        assert_eq!(decode_path("/bad%zz").as_deref(), None);
        assert_eq!(decode_path("/bad%ff").as_deref(), None);
        assert_eq!(decode_path("/caf%C3%A9%2Fx").as_deref(), Some("/café/x"));
    }
}
