//! Parameter codec: RFC 3986 percent-encoding, query parsing, URI
//! normalization, and serialization of parameter maps
//!
//! Every OAuth1 signature and every form body goes through here, so the
//! encoding must be byte-exact: only the unreserved set `ALPHA DIGIT - . _ ~`
//! passes through, everything else becomes `%XX` with uppercase hex.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use url::{Url, form_urlencoded};

/// Characters encoded by `percent_encode`: everything except RFC 3986 unreserved.
const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Request parameters, unique keys. Built fresh per request.
pub type ParamMap = BTreeMap<String, String>;

/// How `serialize` renders a parameter map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamMode {
    /// `key="value"` joined by `,`; only `oauth_` parameters
    Header,
    /// `key=value` joined by `&`; form body / query string
    Body,
    /// `key=value` joined by `&`; third component of the signature base
    SignatureBase,
}

pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, ENCODE_SET).to_string()
}

/// Decode `%XX` escapes. `+` is left alone; invalid UTF-8 is replaced.
pub fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Parse `k=v&k2=v2` as `application/x-www-form-urlencoded` into a map.
///
/// `+` decodes to a space, as query strings and form bodies are signed
/// (RFC 5849 §3.4.1.3.1). A leading `?` is tolerated, empty segments are
/// skipped, and a segment without `=` yields an empty value. Later
/// duplicates win.
pub fn parse_query(query: &str) -> ParamMap {
    let query = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Split `uri` into its query-less base and its decoded query parameters.
///
/// The fragment is dropped. The base is normalized (lower-case scheme and
/// host, default port removed); a URI that does not parse is returned as-is.
pub fn normalize_uri(uri: &str) -> (String, ParamMap) {
    let without_fragment = uri.split_once('#').map_or(uri, |(before, _)| before);
    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, parse_query(query)),
        None => (without_fragment, ParamMap::new()),
    };

    let base = match Url::parse(base) {
        Ok(url) => url.to_string(),
        Err(_) => base.to_string(),
    };
    (base, query)
}

/// Render a parameter map.
///
/// Keys and values are percent-encoded and entries are ordered by the full
/// encoded `key=value` token, which is not the same as ordering by key when
/// one key is a prefix of another.
pub fn serialize(params: &ParamMap, mode: ParamMode) -> String {
    let mut tokens: Vec<(String, String, String)> = params
        .iter()
        .filter(|(key, _)| mode != ParamMode::Header || key.starts_with("oauth_"))
        .map(|(key, value)| {
            let key = percent_encode(key);
            let value = percent_encode(value);
            (format!("{key}={value}"), key, value)
        })
        .collect();
    tokens.sort_by(|a, b| a.0.cmp(&b.0));

    match mode {
        ParamMode::Header => tokens
            .iter()
            .map(|(_, key, value)| format!("{key}=\"{value}\""))
            .collect::<Vec<_>>()
            .join(","),
        ParamMode::Body | ParamMode::SignatureBase => tokens
            .into_iter()
            .map(|(token, _, _)| token)
            .collect::<Vec<_>>()
            .join("&"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn encodes_only_reserved_characters() {
        assert_eq!(percent_encode("abcXYZ019-._~"), "abcXYZ019-._~");
        assert_eq!(
            percent_encode("Hello Ladies + Gentlemen, a signed OAuth request!"),
            "Hello%20Ladies%20%2B%20Gentlemen%2C%20a%20signed%20OAuth%20request%21"
        );
        assert_eq!(percent_encode("http://127.0.0.1:1/x"), "http%3A%2F%2F127.0.0.1%3A1%2Fx");
        assert_eq!(percent_encode("☃"), "%E2%98%83");
    }

    #[test]
    fn decode_reverses_encode_without_plus_handling() {
        let original = "a b+c/d?e=f&g~☃";
        assert_eq!(percent_decode(&percent_encode(original)), original);
        assert_eq!(percent_decode("a+b"), "a+b");
        assert_eq!(percent_decode("%2B%2b"), "++");
    }

    #[test]
    fn parse_query_decodes_and_skips_empty_segments() {
        let parsed = parse_query("?oauth_token=FINAL&&oauth_token_secret=SE%2FCRET&flag");
        assert_eq!(parsed.get("oauth_token").map(String::as_str), Some("FINAL"));
        assert_eq!(
            parsed.get("oauth_token_secret").map(String::as_str),
            Some("SE/CRET")
        );
        assert_eq!(parsed.get("flag").map(String::as_str), Some(""));
        assert_eq!(parsed.len(), 3);

        let spaced = parse_query("status=hello+world&literal=1%2B1");
        assert_eq!(spaced["status"], "hello world");
        assert_eq!(spaced["literal"], "1+1");

        let value_with_equals = parse_query("sig=abc%3D%3D&x=a=b");
        assert_eq!(value_with_equals["sig"], "abc==");
        assert_eq!(value_with_equals["x"], "a=b");
    }

    #[test]
    fn normalize_strips_query_and_fragment() {
        let (base, query) =
            normalize_uri("HTTPS://API.Example.COM:443/1/statuses?count=5&since=a%20b#frag");
        assert_eq!(base, "https://api.example.com/1/statuses");
        assert_eq!(query, params(&[("count", "5"), ("since", "a b")]));

        let (base, query) = normalize_uri("http://localhost:8080/path");
        assert_eq!(base, "http://localhost:8080/path");
        assert!(query.is_empty());
    }

    #[test]
    fn normalize_keeps_unparseable_uri() {
        let (base, query) = normalize_uri("not a uri?x=1");
        assert_eq!(base, "not a uri");
        assert_eq!(query["x"], "1");
    }

    #[test]
    fn serialize_orders_by_full_token() {
        // "a-b=2" < "a=1" because '-' (0x2D) sorts before '=' (0x3D),
        // even though key "a" < key "a-b".
        let map = params(&[("a", "1"), ("a-b", "2")]);
        assert_eq!(serialize(&map, ParamMode::SignatureBase), "a-b=2&a=1");
        assert_eq!(serialize(&map, ParamMode::Body), "a-b=2&a=1");

        let map = params(&[("b", "2"), ("a", "1"), ("c", "3")]);
        assert_eq!(serialize(&map, ParamMode::SignatureBase), "a=1&b=2&c=3");
    }

    #[test]
    fn header_mode_quotes_and_keeps_only_oauth_params() {
        let map = params(&[
            ("oauth_nonce", "n 1"),
            ("oauth_consumer_key", "key"),
            ("status", "hello"),
        ]);
        assert_eq!(
            serialize(&map, ParamMode::Header),
            "oauth_consumer_key=\"key\",oauth_nonce=\"n%201\""
        );
    }

    #[test]
    fn body_round_trips_through_parse_query() {
        let map = params(&[
            ("redirect_uri", "http://127.0.0.1:4321/oauth2"),
            ("code", "a/b+c=="),
            ("scope", "read write"),
        ]);
        assert_eq!(parse_query(&serialize(&map, ParamMode::Body)), map);
    }
}
