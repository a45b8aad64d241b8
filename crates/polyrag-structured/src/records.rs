//! Tabular record loaders: JSON, JSON Lines and delimited text.
use serde_json::{Map, Number, Value};
use std::path::Path;

use polyrag_core::data_processor::read_text_lossy;
use polyrag_core::error::{Error, Result};

pub type Record = Map<String, Value>;

/// Load every record from `path`, choosing the parser by extension.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let text = read_text_lossy(path)?;
    match ext.as_str() {
        "csv" => Ok(parse_delimited(&text, ',')),
        "tsv" => Ok(parse_delimited(&text, '\t')),
        "jsonl" | "ndjson" => parse_json_lines(&text),
        "json" => parse_json(&text),
        other => Err(Error::UnsupportedContentType(format!("tabular file with extension '{other}'"))),
    }
}

/// A top-level array of objects, a single object, or an object wrapping one array.
pub fn parse_json(text: &str) -> Result<Vec<Record>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => Ok(items.into_iter().map(into_record).collect()),
        Value::Object(obj) => {
            let wrapped = if obj.len() == 1 { obj.values().next().and_then(Value::as_array).cloned() } else { None };
            match wrapped {
                Some(items) => Ok(items.into_iter().map(into_record).collect()),
                None => Ok(vec![obj]),
            }
        }
        other => Ok(vec![into_record(other)]),
    }
}

pub fn parse_json_lines(text: &str) -> Result<Vec<Record>> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str::<Value>(l).map(into_record).map_err(Error::from))
        .collect()
}

/// Header row plus data rows. Double-quoted fields may contain the delimiter and `""` escapes.
pub fn parse_delimited(text: &str, delimiter: char) -> Vec<Record> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else { return Vec::new() };
    let columns: Vec<String> = split_row(header, delimiter).into_iter().map(|c| c.trim().to_string()).collect();
    lines
        .map(|line| {
            let cells = split_row(line, delimiter);
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| (col.clone(), typed_cell(cells.get(i).map_or("", String::as_str))))
                .collect()
        })
        .collect()
}

fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => cells.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    cells.push(current);
    cells
}

fn typed_cell(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(s.to_string()),
    }
}

fn into_record(v: Value) -> Record {
    match v {
        Value::Object(obj) => obj,
        other => {
            let mut m = Map::new();
            m.insert("value".to_string(), other);
            m
        }
    }
}

/// `key: value` lines used as the searchable body of a record.
pub fn flatten_record(record: &Record) -> String {
    let mut lines = Vec::with_capacity(record.len());
    for (k, v) in record {
        let rendered = match v {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        lines.push(format!("{k}: {rendered}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_cells_are_typed_and_quotes_respected() {
        let rows = parse_delimited("name,qty,price,organic\n\"Seed, heirloom\",12,3.5,true\nGarlic,,2,false\n", ',');
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], Value::String("Seed, heirloom".into()));
        assert_eq!(rows[0]["qty"], Value::from(12));
        assert_eq!(rows[0]["price"], Value::from(3.5));
        assert_eq!(rows[0]["organic"], Value::Bool(true));
        assert_eq!(rows[1]["qty"], Value::Null);
    }

    #[test]
    fn escaped_quotes_survive() {
        let rows = parse_delimited("note\n\"say \"\"hi\"\"\"\n", ',');
        assert_eq!(rows[0]["note"], Value::String("say \"hi\"".into()));
    }

    #[test]
    fn json_wrapper_object_unwraps_single_array() {
        let rows = parse_json(r#"{"items":[{"a":1},{"a":2}]}"#).expect("json");
        assert_eq!(rows.len(), 2);
        let single = parse_json(r#"{"a":1,"b":[1,2]}"#).expect("json");
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn json_lines_skip_blank_lines() {
        let rows = parse_json_lines("{\"a\":1}\n\n{\"a\":2}\n").expect("jsonl");
        assert_eq!(rows.len(), 2);
        assert!(parse_json_lines("{oops}").is_err());
    }

    #[test]
    fn flatten_skips_nulls() {
        let rows = parse_delimited("crop,yield\nkale,\n", ',');
        assert_eq!(flatten_record(&rows[0]), "crop: kale");
    }
}
