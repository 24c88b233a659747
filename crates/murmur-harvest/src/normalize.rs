//! Flattening and cleaning helpers shared by the source normalizers.
//!
//! The sink schema is a flat map of scalars, so list- and map-valued source
//! fields are collapsed into delimited strings here, and Mastodon's HTML
//! content is reduced to plain text.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<[^>]+>").expect("valid tag regex"))
}

fn break_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<br\s*/?>|</p>").expect("valid break regex"))
}

/// Reduce an HTML fragment to whitespace-normalized plain text.
///
/// Block/line breaks become single spaces; all other tags are dropped and
/// the handful of entities Mastodon emits are decoded.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let with_breaks = break_regex().replace_all(html, " ");
    let stripped = tag_regex().replace_all(&with_breaks, "");
    let decoded = stripped
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Convert a UNIX epoch (seconds, possibly fractional) to a UTC timestamp.
#[must_use]
pub fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let secs = epoch.trunc() as i64;
    DateTime::from_timestamp(secs, 0)
}

/// Join the `t` text of flair richtext entries: `[{"t": "AMA"}, ...]` → `"AMA"`.
///
/// Entries without a string `t` are skipped, matching the tolerant handling
/// of half-populated flair lists in the wild.
#[must_use]
pub fn flatten_flair_richtext(value: &Value) -> String {
    let Some(items) = value.as_array() else {
        return String::new();
    };
    items
        .iter()
        .filter_map(|item| item.get("t").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse an awards list into `id:name:count` triples joined by `;`.
#[must_use]
pub fn flatten_awardings(value: &Value) -> String {
    let Some(items) = value.as_array() else {
        return String::new();
    };
    items
        .iter()
        .filter(|item| item.is_object())
        .map(|award| {
            format!(
                "{}:{}:{}",
                award.get("id").and_then(Value::as_str).unwrap_or(""),
                award.get("name").and_then(Value::as_str).unwrap_or(""),
                award.get("count").and_then(Value::as_i64).unwrap_or(0)
            )
        })
        .collect::<Vec<_>>()
        .join(";")
}

/// Collapse a gildings map into `kind:count` pairs joined by `;`.
#[must_use]
pub fn flatten_gildings(value: &Value) -> String {
    let Some(map) = value.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(kind, count)| format!("{}:{}", kind, count.as_i64().unwrap_or(0)))
        .collect::<Vec<_>>()
        .join(";")
}

/// Collapse media metadata into `media_id|url|heightxwidth` entries joined
/// by `;`, dropping everything but the source rendition.
#[must_use]
pub fn flatten_media_metadata(value: &Value) -> String {
    let Some(map) = value.as_object() else {
        return String::new();
    };
    map.iter()
        .map(|(media_id, metadata)| {
            let source = metadata.get("s");
            let url = source
                .and_then(|s| s.get("u"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let height = source
                .and_then(|s| s.get("y"))
                .and_then(Value::as_i64)
                .map(|v| v.to_string())
                .unwrap_or_default();
            let width = source
                .and_then(|s| s.get("x"))
                .and_then(Value::as_i64)
                .map(|v| v.to_string())
                .unwrap_or_default();
            format!("{media_id}|{url}|{height}x{width}")
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn strip_html_drops_tags_and_decodes_entities() {
        let html = "<p>Vote <a href=\"https://example.com\">here</a> &amp; now</p>";
        assert_eq!(strip_html(html), "Vote here & now");
    }

    #[test]
    fn strip_html_turns_breaks_into_spaces() {
        assert_eq!(strip_html("line one<br>line two</p>done"), "line one line two done");
    }

    #[test]
    fn strip_html_passes_plain_text_through() {
        assert_eq!(strip_html("no markup at all"), "no markup at all");
    }

    #[test]
    fn epoch_conversion_handles_fractional_seconds() {
        let dt = epoch_to_datetime(1_714_521_600.5).expect("valid epoch");
        assert_eq!(dt.timestamp(), 1_714_521_600);
    }

    #[test]
    fn epoch_conversion_rejects_nan() {
        assert!(epoch_to_datetime(f64::NAN).is_none());
    }

    #[test]
    fn flair_richtext_joins_text_entries() {
        let value = json!([{"t": "Serious"}, {"e": "emoji"}, {"t": "Replies Only"}]);
        assert_eq!(flatten_flair_richtext(&value), "Serious Replies Only");
    }

    #[test]
    fn flair_richtext_of_wrong_shape_is_empty() {
        assert_eq!(flatten_flair_richtext(&json!("not a list")), "");
    }

    #[test]
    fn awardings_flatten_to_delimited_triples() {
        let value = json!([
            {"id": "gid_1", "name": "Silver", "count": 2},
            {"id": "gid_2", "name": "Gold", "count": 1}
        ]);
        assert_eq!(flatten_awardings(&value), "gid_1:Silver:2;gid_2:Gold:1");
    }

    #[test]
    fn gildings_flatten_to_pairs() {
        let value = json!({"gid_1": 3});
        assert_eq!(flatten_gildings(&value), "gid_1:3");
    }

    #[test]
    fn media_metadata_keeps_source_rendition_only() {
        let value = json!({
            "abc": {"s": {"u": "https://i.example/abc.jpg", "x": 640, "y": 480}}
        });
        assert_eq!(
            flatten_media_metadata(&value),
            "abc|https://i.example/abc.jpg|480x640"
        );
    }
}
