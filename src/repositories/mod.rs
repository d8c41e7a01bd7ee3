pub(crate) mod attempts;
pub(crate) mod exams;
pub(crate) mod health;
pub(crate) mod questions;
pub(crate) mod results;
pub(crate) mod statistics;
pub(crate) mod users;

/// Prefixes every column of a `COLUMNS` list with a table alias for joins.
pub(crate) fn qualified(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}
