use serde::Serialize;

/// One container-backed environment as reported by the tool's `list` output.
/// Timestamps are kept as the tool printed them; this layer never parses them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Environment {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) created: Option<String>,
    pub(crate) updated: Option<String>,
}

/// Parse the tool's tabular `list` output. Lenient on purpose: the format is
/// not a stable contract, so blank lines, repeated headers, and rows that do
/// not split into at least an id and a title are skipped, never an error.
/// Row order is preserved from the input.
pub(crate) fn parse_environment_table(raw: &str) -> Vec<Environment> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_header_line(line))
        .filter_map(parse_environment_row)
        .collect()
}

/// A header starts with the literal token `ID` and mentions another column
/// name somewhere in the line. A real environment whose id starts with `ID`
/// and whose title contains one of these words would be misclassified; the
/// tool's output gives us nothing better to key on.
pub(crate) fn is_header_line(line: &str) -> bool {
    line.split_whitespace().next() == Some("ID")
        && ["TITLE", "CREATED", "UPDATED"]
            .iter()
            .any(|keyword| line.contains(keyword))
}

fn parse_environment_row(line: &str) -> Option<Environment> {
    let columns = split_columns(line);
    if columns.len() < 2 {
        return None;
    }
    let id = columns[0].clone();
    let title = if columns[1].is_empty() {
        id.clone()
    } else {
        columns[1].clone()
    };
    Some(Environment {
        id,
        title,
        created: columns.get(2).cloned(),
        updated: columns.get(3).cloned(),
    })
}

/// Split a row on runs of two or more whitespace characters. Columns are
/// visually aligned with padding, so single spaces belong to the column
/// content (multi-word titles must not fragment).
pub(crate) fn split_columns(line: &str) -> Vec<String> {
    let mut columns = Vec::new();
    let mut current = String::new();
    let mut whitespace_run = String::new();
    for ch in line.trim().chars() {
        if ch.is_whitespace() {
            whitespace_run.push(ch);
            continue;
        }
        if !whitespace_run.is_empty() {
            if whitespace_run.chars().count() >= 2 {
                if !current.is_empty() {
                    columns.push(std::mem::take(&mut current));
                }
            } else {
                current.push_str(&whitespace_run);
            }
            whitespace_run.clear();
        }
        current.push(ch);
    }
    if !current.is_empty() {
        columns.push(current);
    }
    columns
}
