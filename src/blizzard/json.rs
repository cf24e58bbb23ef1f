//! JSON decoding with path context for Blizzard API payloads.

use anyhow::Result;

/// Decode JSON, attaching the serde path and a snippet of the offending
/// line on failure. Blizzard payloads are deeply nested, so a bare
/// "invalid type at line 1 column 48213" is useless without the path.
pub fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    match serde_path_to_error::deserialize(de) {
        Ok(value) => Ok(value),
        Err(err) => {
            let inner = err.inner();
            let (line, column) = (inner.line(), inner.column());
            let path = err.path().to_string();

            let mut msg = String::new();
            if !path.is_empty() && path != "." {
                msg.push_str(&format!("at path '{path}': "));
            }
            msg.push_str(&format!(
                "{} (line {line} col {column})\n{}",
                inner,
                snippet(body, line, column)
            ));
            Err(anyhow::anyhow!(msg))
        }
    }
}

/// A windowed view of the failing line with a caret under the error column.
fn snippet(body: &str, line: usize, column: usize) -> String {
    let target = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    // Columns are byte offsets and player names are routinely multibyte;
    // clamp every cut to a char boundary so the window can't panic.
    let mut error_idx = column.saturating_sub(1).min(target.len());
    while !target.is_char_boundary(error_idx) {
        error_idx -= 1;
    }
    let mut start = error_idx.saturating_sub(20);
    while !target.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (error_idx + 20).min(target.len());
    while !target.is_char_boundary(end) {
        end += 1;
    }
    let caret = " ".repeat(target[start..error_idx].chars().count()) + "^";

    format!("...{}...\n   {caret}", &target[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_decode_valid() {
        #[derive(Deserialize)]
        struct Entry {
            rank: i32,
        }
        let entry: Entry = decode(r#"{"rank": 1}"#).unwrap();
        assert_eq!(entry.rank, 1);
    }

    #[test]
    fn test_decode_error_includes_path() {
        #[derive(Debug, Deserialize)]
        struct Character {
            #[allow(dead_code)]
            name: String,
        }

        #[derive(Debug, Deserialize)]
        struct Entry {
            #[allow(dead_code)]
            character: Character,
            #[allow(dead_code)]
            rating: i32,
        }

        #[derive(Debug, Deserialize)]
        struct Leaderboard {
            #[allow(dead_code)]
            entries: Vec<Entry>,
        }

        let body = r#"{
            "entries": [
                { "character": { "name": "Thrall" }, "rating": 2400 },
                { "character": { "name": null }, "rating": 2350 }
            ]
        }"#;

        let err = decode::<Leaderboard>(body).unwrap_err().to_string();
        assert!(err.contains("entries[1].character.name"), "{err}");
        assert!(err.contains("^"), "{err}");
    }

    #[test]
    fn test_decode_error_after_multibyte_name() {
        #[derive(Debug, Deserialize)]
        struct Character {
            #[allow(dead_code)]
            name: String,
            #[allow(dead_code)]
            rating: i32,
        }

        // The error column lands past a run of multibyte characters; the
        // snippet window must not slice mid-character.
        let body = r#"{"name": "Ódýrr-Töwelliée", "rating": "très"}"#;
        let err = decode::<Character>(body).unwrap_err().to_string();
        assert!(err.contains("rating"), "{err}");
        assert!(err.contains('^'), "{err}");
    }

    #[test]
    fn test_decode_error_on_truncated_body() {
        #[derive(Debug, Deserialize)]
        struct Index {
            #[allow(dead_code)]
            leaderboards: Vec<serde_json::Value>,
        }

        let err = decode::<Index>(r#"{"leaderboards": ["#).unwrap_err().to_string();
        assert!(err.contains("line 1"), "{err}");
    }
}
