//! Builders for Notion property values.

use serde_json::{Value, json};

/// Notion rejects rich text objects longer than this many characters.
pub const MAX_TEXT_LEN: usize = 2000;

/// A page property map (`"Title" -> {"title": [...]}`).
pub type PropertyMap = serde_json::Map<String, Value>;

fn text_objects(content: &str) -> Vec<Value> {
    if content.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(MAX_TEXT_LEN)
        .map(|chunk| {
            let s: String = chunk.iter().collect();
            json!({ "text": { "content": s } })
        })
        .collect()
}

/// `title` property.
pub fn title(content: &str) -> Value {
    json!({ "title": text_objects(content) })
}

/// `rich_text` property. Empty text becomes an empty array.
pub fn rich_text(content: &str) -> Value {
    json!({ "rich_text": text_objects(content) })
}

/// `number` property. Non-finite values are sent as `null`.
pub fn number(value: f64) -> Value {
    match serde_json::Number::from_f64(value) {
        Some(n) => json!({ "number": n }),
        None => json!({ "number": null }),
    }
}

/// `number` property from an integer.
pub fn integer(value: i64) -> Value {
    json!({ "number": value })
}

/// `select` property. Empty names clear the selection.
pub fn select(name: &str) -> Value {
    if name.trim().is_empty() {
        json!({ "select": null })
    } else {
        json!({ "select": { "name": name } })
    }
}

/// `date` property with an ISO-8601 start. `None` clears the date.
pub fn date(start: Option<&str>) -> Value {
    match start {
        Some(s) => json!({ "date": { "start": s } }),
        None => json!({ "date": null }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_and_rich_text_shapes() {
        assert_eq!(
            title("Taxi fare"),
            json!({ "title": [{ "text": { "content": "Taxi fare" } }] })
        );
        assert_eq!(rich_text(""), json!({ "rich_text": [] }));
    }

    #[test]
    fn long_text_is_chunked() {
        let long = "é".repeat(MAX_TEXT_LEN + 5);
        let v = rich_text(&long);
        let parts = v["rich_text"].as_array().expect("array");
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1]["text"]["content"].as_str().map(|s| s.chars().count()),
            Some(5)
        );
    }

    #[test]
    fn select_and_date_clear_when_empty() {
        assert_eq!(select(""), json!({ "select": null }));
        assert_eq!(select("High"), json!({ "select": { "name": "High" } }));
        assert_eq!(date(None), json!({ "date": null }));
    }

    #[test]
    fn number_handles_non_finite() {
        assert_eq!(number(12.5), json!({ "number": 12.5 }));
        assert_eq!(number(f64::NAN), json!({ "number": null }));
        assert_eq!(integer(3), json!({ "number": 3 }));
    }
}
