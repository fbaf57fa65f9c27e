//! Markdown table normalizer, plus the two other table sources backends feed
//! us: structured cell grids and CSV fragments.
//!
//! [`parse_markdown_table`] is deliberately forgiving about the separator
//! row (the second non-blank line is always skipped, whatever it holds) and
//! deliberately strict about nothing else: ragged rows pass through as-is and
//! duplicate column names are kept.

use crate::output::DataFrame;
use thiserror::Error;

/// Why a table could not be turned into a [`DataFrame`].
///
/// Callers skip the table (with a warning) rather than failing the document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableParseFailure {
    /// A markdown table needs a header line and a separator line.
    #[error("table has {found} non-blank line(s); need at least 2")]
    TooFewLines { found: usize },

    /// A CSV fragment or cell grid had no header record.
    #[error("table has no header row")]
    NoHeader,

    /// The CSV reader rejected the fragment.
    #[error("malformed CSV table: {0}")]
    Csv(String),
}

/// Parse a GitHub-flavoured markdown table into a [`DataFrame`].
///
/// 1. Blank and whitespace-only lines are discarded.
/// 2. Fewer than two remaining lines is a failure.
/// 3. Line 0 is the header: one leading and one trailing `|` are removed,
///    the rest is split on `|` and each cell trimmed.
/// 4. Line 1 is the separator and is skipped.
/// 5. Every later line becomes a row when at least one trimmed cell is
///    non-empty.
pub fn parse_markdown_table(markdown: &str) -> Result<DataFrame, TableParseFailure> {
    let lines: Vec<&str> = markdown.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return Err(TableParseFailure::TooFewLines { found: lines.len() });
    }

    let columns = split_row(lines[0]);
    let rows = lines[2..]
        .iter()
        .map(|line| split_row(line))
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .map(|cells| cells.into_iter().map(Some).collect())
        .collect();

    Ok(DataFrame::new(columns, rows))
}

fn split_row(line: &str) -> Vec<String> {
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    line.split('|').map(|c| c.trim().to_string()).collect()
}

/// Render a header and rows as a GitHub-flavoured markdown table.
///
/// Pipes inside cells are escaped and embedded newlines collapsed to spaces
/// so every row stays on one line. Missing cells render empty.
pub fn render_markdown<S: AsRef<str>>(columns: &[S], rows: &[Vec<Option<String>>]) -> String {
    let width = columns.len().max(1);
    let mut out = String::new();

    out.push('|');
    for c in columns {
        out.push(' ');
        out.push_str(&escape_cell(c.as_ref()));
        out.push_str(" |");
    }
    if columns.is_empty() {
        out.push_str("  |");
    }
    out.push('\n');

    out.push('|');
    for _ in 0..width {
        out.push_str(" --- |");
    }

    for row in rows {
        out.push_str("\n|");
        for cell in row {
            out.push(' ');
            out.push_str(&escape_cell(cell.as_deref().unwrap_or("")));
            out.push_str(" |");
        }
    }
    out
}

fn escape_cell(cell: &str) -> String {
    cell.replace(['\r', '\n'], " ").replace('|', "\\|").trim().to_string()
}

/// Build markdown and a [`DataFrame`] from a cell grid whose first row is the
/// header.
pub fn grid_table(grid: Vec<Vec<String>>) -> Result<(String, DataFrame), TableParseFailure> {
    let mut rows = grid.into_iter();
    let columns = rows.next().ok_or(TableParseFailure::NoHeader)?;
    let df = DataFrame::from_strings(columns, rows.collect());
    let markdown = render_markdown(&df.columns, &df.rows);
    Ok((markdown, df))
}

/// Parse a CSV fragment: first record is the header, empty cells are null.
///
/// Records may have differing lengths.
pub fn parse_csv_table(csv_text: &str) -> Result<DataFrame, TableParseFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let mut records = reader.records();
    let header = match records.next() {
        Some(rec) => rec.map_err(|e| TableParseFailure::Csv(e.to_string()))?,
        None => return Err(TableParseFailure::NoHeader),
    };
    let columns: Vec<String> = header.iter().map(|c| c.trim().to_string()).collect();

    let mut rows = Vec::new();
    for rec in records {
        let rec = rec.map_err(|e| TableParseFailure::Csv(e.to_string()))?;
        rows.push(
            rec.iter()
                .map(|c| {
                    let c = c.trim();
                    (!c.is_empty()).then(|| c.to_string())
                })
                .collect(),
        );
    }
    Ok(DataFrame::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn cells(v: &[&str]) -> Vec<Option<String>> {
        v.iter().map(|s| Some(s.to_string())).collect()
    }

    #[test]
    fn simple_table() {
        let df = parse_markdown_table("| A | B |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |").unwrap();
        assert_eq!(df.columns, strs(&["A", "B"]));
        assert_eq!(df.rows, vec![cells(&["1", "2"]), cells(&["3", "4"])]);
    }

    #[test]
    fn header_only_with_blank_and_empty_rows() {
        let md = "\n| Name | Age |\n|------|-----|\n|      |     |\n\n";
        let df = parse_markdown_table(md).unwrap();
        assert_eq!(df.columns, strs(&["Name", "Age"]));
        assert!(df.rows.is_empty());
    }

    #[test]
    fn fewer_than_two_lines_fails() {
        assert_eq!(
            parse_markdown_table("| only header |"),
            Err(TableParseFailure::TooFewLines { found: 1 })
        );
        assert_eq!(
            parse_markdown_table("   \n\n"),
            Err(TableParseFailure::TooFewLines { found: 0 })
        );
    }

    #[test]
    fn separator_line_is_skipped_whatever_it_holds() {
        let df = parse_markdown_table("| A | B |\n| x | y |\n| 1 | 2 |").unwrap();
        assert_eq!(df.rows, vec![cells(&["1", "2"])]);
    }

    #[test]
    fn ragged_rows_pass_through() {
        let df = parse_markdown_table("| A | B |\n|---|---|\n| 1 |\n| 2 | 3 | 4 |").unwrap();
        assert_eq!(df.rows, vec![cells(&["1"]), cells(&["2", "3", "4"])]);
    }

    #[test]
    fn duplicate_columns_kept() {
        let df = parse_markdown_table("| A | A |\n|---|---|\n| 1 | 2 |").unwrap();
        assert_eq!(df.columns, strs(&["A", "A"]));
    }

    #[test]
    fn only_one_pipe_stripped_each_side() {
        let df = parse_markdown_table("|| A ||\n|---|\n| 1 |").unwrap();
        assert_eq!(df.columns, strs(&["", "A", ""]));
    }

    #[test]
    fn missing_outer_pipes() {
        let df = parse_markdown_table("A | B\n--- | ---\n1 | 2").unwrap();
        assert_eq!(df.columns, strs(&["A", "B"]));
        assert_eq!(df.rows, vec![cells(&["1", "2"])]);
    }

    #[test]
    fn column_count_matches_header() {
        for md in [
            "| a |\n|---|",
            "| a | b | c |\n|---|---|---|\n| 1 | 2 | 3 |",
            "x|y\n-|-",
        ] {
            let df = parse_markdown_table(md).unwrap();
            let expected = md.lines().next().unwrap();
            let expected = expected.strip_prefix('|').unwrap_or(expected);
            let expected = expected.strip_suffix('|').unwrap_or(expected);
            assert_eq!(df.columns.len(), expected.split('|').count(), "for {md:?}");
        }
    }

    #[test]
    fn parsing_is_idempotent() {
        let md = "| A | B |\n|---|---|\n| 1 | 2 |\n|   |   |\n| 3 |   |";
        assert_eq!(parse_markdown_table(md), parse_markdown_table(md));
    }

    #[test]
    fn render_then_parse_agrees_with_grid() {
        let (md, df) = grid_table(vec![
            strs(&["Item", "Qty"]),
            strs(&["apples", "3"]),
            strs(&["pears", "5"]),
        ])
        .unwrap();
        assert_eq!(
            md,
            "| Item | Qty |\n| --- | --- |\n| apples | 3 |\n| pears | 5 |"
        );
        assert_eq!(parse_markdown_table(&md).unwrap(), df);
    }

    #[test]
    fn render_escapes_pipes_and_newlines() {
        let md = render_markdown(&["a|b"], &[vec![Some("line1\nline2".into())], vec![None]]);
        assert_eq!(md, "| a\\|b |\n| --- |\n| line1 line2 |\n|  |");
    }

    #[test]
    fn empty_grid_has_no_header() {
        assert_eq!(grid_table(vec![]), Err(TableParseFailure::NoHeader));
    }

    #[test]
    fn csv_with_nulls_and_ragged_records() {
        let df = parse_csv_table("Name,Age\nann,31\nbob,\ncid\n").unwrap();
        assert_eq!(df.columns, strs(&["Name", "Age"]));
        assert_eq!(
            df.rows,
            vec![
                vec![Some("ann".into()), Some("31".into())],
                vec![Some("bob".into()), None],
                vec![Some("cid".into())],
            ]
        );
    }

    #[test]
    fn csv_quoted_fields() {
        let df = parse_csv_table("\"a, b\",c\n\"1\",\"x \"\"y\"\"\"").unwrap();
        assert_eq!(df.columns, strs(&["a, b", "c"]));
        assert_eq!(df.cell(0, 1), Some("x \"y\""));
    }

    #[test]
    fn empty_csv_fails() {
        assert_eq!(parse_csv_table(""), Err(TableParseFailure::NoHeader));
    }
}
