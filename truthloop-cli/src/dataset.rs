//! Labelled dataset loading.
//!
//! Datasets are delimited text with a header row. The delimiter is taken from
//! the header line: tab, then semicolon, then comma. Fields may be quoted with
//! `"`; a doubled quote inside a quoted field is a literal quote.

use crate::error::{CliError, CliResult};
use std::path::Path;
use truthloop_agents::WarmupRow;

const CLAIM_COLUMNS: &[&str] = &["statement", "claim", "text"];
const LABEL_COLUMNS: &[&str] = &["rating", "label", "verdict", "truth"];
const ANALYSIS_COLUMNS: &[&str] = &[
    "full_analysis",
    "full analysis",
    "analysis",
    "explanation",
    "justification",
];

/// Read a dataset file.
pub fn load_rows(path: &Path) -> CliResult<Vec<WarmupRow>> {
    let bytes = std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&bytes);
    parse_rows(&text)
}

/// Parse dataset text into rows, one per data record in file order.
///
/// Rows with an empty claim are kept so the trainer can report them by
/// position. The analysis column is optional.
pub fn parse_rows(text: &str) -> CliResult<Vec<WarmupRow>> {
    let text = text.trim_start_matches('\u{feff}');
    let header_line = text.lines().next().unwrap_or_default();
    let delimiter = detect_delimiter(header_line);
    let mut records = parse_records(text, delimiter).into_iter();

    let header = records
        .next()
        .ok_or_else(|| CliError::Dataset("file is empty".to_string()))?;
    let claim = find_column(&header, CLAIM_COLUMNS)
        .ok_or_else(|| missing_column("claim", CLAIM_COLUMNS, &header))?;
    let label = find_column(&header, LABEL_COLUMNS)
        .ok_or_else(|| missing_column("label", LABEL_COLUMNS, &header))?;
    let analysis = find_column(&header, ANALYSIS_COLUMNS);

    let field = |record: &[String], index: usize| {
        record.get(index).map(|f| f.trim().to_string()).unwrap_or_default()
    };
    let rows = records
        .filter(|record| record.iter().any(|f| !f.trim().is_empty()))
        .map(|record| WarmupRow {
            claim: field(&record, claim),
            label: field(&record, label),
            analysis: analysis
                .map(|index| field(&record, index))
                .filter(|a| !a.is_empty()),
        })
        .collect::<Vec<_>>();
    tracing::info!(
        rows = rows.len(),
        delimiter = %delimiter.escape_default(),
        has_analysis = analysis.is_some(),
        "dataset loaded"
    );
    Ok(rows)
}

pub fn detect_delimiter(header_line: &str) -> char {
    if header_line.contains('\t') {
        '\t'
    } else if header_line.contains(';') {
        ';'
    } else {
        ','
    }
}

fn normalize_header(name: &str) -> String {
    name.trim().trim_matches('\u{feff}').to_lowercase()
}

fn find_column(header: &[String], aliases: &[&str]) -> Option<usize> {
    let names: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
    aliases
        .iter()
        .find_map(|alias| names.iter().position(|name| name == alias))
}

fn missing_column(what: &str, aliases: &[&str], header: &[String]) -> CliError {
    CliError::Dataset(format!(
        "no {what} column (expected one of {}); found {}",
        aliases.join(", "),
        header.join(", ")
    ))
}

/// Split `text` into records of fields. Newlines inside quotes stay in the field.
fn parse_records(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a\tb;c"), '\t');
        assert_eq!(detect_delimiter("a;b,c"), ';');
        assert_eq!(detect_delimiter("a,b"), ',');
    }

    #[test]
    fn test_parse_rows_with_aliases_and_quotes() {
        let text = "\u{feff}Statement,Rating,Full_Analysis\n\
                    \"Vaccines contain microchips, officials say\",False,\"No \"\"chips\"\" found\"\n\
                    Unemployment fell last year,True,\n";
        let rows = parse_rows(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].claim, "Vaccines contain microchips, officials say");
        assert_eq!(rows[0].label, "False");
        assert_eq!(rows[0].analysis.as_deref(), Some("No \"chips\" found"));
        assert_eq!(rows[1].analysis, None);
    }

    #[test]
    fn test_semicolon_dataset_keeps_empty_claims() {
        let text = "claim;label\nThe sky is green;false\n;true\r\nWater boils at sea level;true";
        let rows = parse_rows(text).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].claim, "");
        assert_eq!(rows[2].claim, "Water boils at sea level");
    }

    #[test]
    fn test_quoted_field_with_newline() {
        let text = "text\tverdict\n\"line one\nline two\"\ttrue\n";
        let rows = parse_rows(text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].claim, "line one\nline two");
    }

    #[test]
    fn test_missing_label_column() {
        let result = parse_rows("claim,notes\nsomething,else\n");
        assert!(matches!(result, Err(CliError::Dataset(_))));
    }
}
