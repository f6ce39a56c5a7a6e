use thiserror::Error;

const SEP: char = '|';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line_no}: row must start and end with '|': {line:?}")]
    MissingEdge { line_no: usize, line: String },
    #[error("line {line_no}: row needs at least two '|' separators: {line:?}")]
    TooFewSeparators { line_no: usize, line: String },
    #[error("line {line_no}: expected {expected} columns, found {found}: {line:?}")]
    ColumnCount {
        line_no: usize,
        expected: usize,
        found: usize,
        line: String,
    },
}

/// One parsed table line: trimmed cells without the outer empty ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub cells: Vec<String>,
}

impl TableRow {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.cells.get(idx).map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.cells.last().map(String::as_str)
    }
}

/// Parse pipe-delimited console output into rows.
///
/// Blank lines are skipped. Every other line must look like `| a | b |`.
/// Header and data rows are not told apart; that is up to the caller.
pub fn parse(text: &str, expected_columns: Option<usize>) -> Result<Vec<TableRow>, ParseError> {
    let mut rows = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let row = parse_row(idx + 1, line)?;
        if let Some(expected) = expected_columns
            && row.len() != expected
        {
            return Err(ParseError::ColumnCount {
                line_no: idx + 1,
                expected,
                found: row.len(),
                line: line.to_string(),
            });
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_row(line_no: usize, line: &str) -> Result<TableRow, ParseError> {
    if line.matches(SEP).count() < 2 {
        return Err(ParseError::TooFewSeparators {
            line_no,
            line: line.to_string(),
        });
    }
    let mut parts: Vec<&str> = line.split(SEP).collect();
    // split() yields "" before a leading separator and after a trailing one
    let (first, last) = (parts.first().copied(), parts.last().copied());
    if first != Some("") || last != Some("") {
        return Err(ParseError::MissingEdge {
            line_no,
            line: line.to_string(),
        });
    }
    parts.remove(0);
    parts.pop();
    Ok(TableRow {
        cells: parts.into_iter().map(|c| c.trim().to_string()).collect(),
    })
}
