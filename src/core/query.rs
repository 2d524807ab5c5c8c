//! Purpose: Translate untrusted HTTP query parameters into COPY statement text.
//! Exports: `CopyFormat`, `Predicate`, `FilterClause`, `ExportSpec`, `ImportSpec`.
//! Role: The single place where caller input becomes SQL.
//! Invariants: Statement text is fully literal (no placeholders); every
//! caller-supplied fragment passes through `core::quote` exactly once.
//! Invariants: Malformed `where.*` keys and unknown operators are dropped, not
//! rejected; scalar params use the first occurrence in the query string.

use std::collections::HashSet;

use crate::core::error::{Error, ErrorKind};
use crate::core::quote::{quote_ident, quote_ident_list, quote_literal};

/// Payload format for a COPY transfer. The bridge never interprets the bytes;
/// this only selects the statement's WITH options and the response media type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CopyFormat {
    Text,
    Csv,
}

impl CopyFormat {
    fn from_pairs(pairs: &[(String, String)]) -> Self {
        match first_value(pairs, "csv") {
            Some(value) if !value.is_empty() => CopyFormat::Csv,
            _ => CopyFormat::Text,
        }
    }

    fn with_options(self) -> &'static str {
        match self {
            CopyFormat::Text => "",
            CopyFormat::Csv => " WITH (FORMAT csv, HEADER true)",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            CopyFormat::Text => "application/octet-stream",
            CopyFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// Comparison applied to one column, closed over the supported operators.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Predicate {
    Eq(String),
    Gt(String),
    Gte(String),
    Lt(String),
    Lte(String),
    In(Vec<String>),
}

impl Predicate {
    fn parse(op: &str, value: &str) -> Option<Self> {
        match op {
            "eq" => Some(Self::Eq(value.to_string())),
            "gt" => Some(Self::Gt(value.to_string())),
            "gte" => Some(Self::Gte(value.to_string())),
            "lt" => Some(Self::Lt(value.to_string())),
            "lte" => Some(Self::Lte(value.to_string())),
            "in" => Some(Self::In(value.split(',').map(str::to_string).collect())),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilterClause {
    pub column: String,
    pub predicate: Predicate,
}

impl FilterClause {
    fn render(&self) -> String {
        let column = quote_ident(&self.column);
        match &self.predicate {
            Predicate::Eq(value) => format!("{column} = {}", quote_literal(value)),
            Predicate::Gt(value) => format!("{column} > {}", quote_literal(value)),
            Predicate::Gte(value) => format!("{column} >= {}", quote_literal(value)),
            Predicate::Lt(value) => format!("{column} < {}", quote_literal(value)),
            Predicate::Lte(value) => format!("{column} <= {}", quote_literal(value)),
            Predicate::In(values) => {
                let list = values
                    .iter()
                    .map(|value| quote_literal(value))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{column} IN ({list})")
            }
        }
    }
}

/// Collect typed clauses from keys of the exact shape `where.<column>.<op>`.
/// Anything else is ignored; the first occurrence of a key wins. Clause order
/// follows query-string order.
fn parse_filters(pairs: &[(String, String)]) -> Vec<FilterClause> {
    let mut seen = HashSet::new();
    let mut clauses = Vec::new();
    for (key, value) in pairs {
        let parts: Vec<&str> = key.split('.').collect();
        let ["where", column, op] = parts.as_slice() else {
            continue;
        };
        if !seen.insert(key.as_str()) {
            continue;
        }
        let Some(predicate) = Predicate::parse(op, value) else {
            continue;
        };
        clauses.push(FilterClause {
            column: (*column).to_string(),
            predicate,
        });
    }
    clauses
}

fn where_clause(filters: &[FilterClause]) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let rendered = filters
        .iter()
        .map(FilterClause::render)
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(" WHERE {rendered}")
}

fn first_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|value| !value.is_empty()).map(str::to_string)
}

/// A validated export request: the source side of `COPY ... TO STDOUT`.
#[derive(Clone, Debug)]
pub struct ExportSpec {
    pub table: String,
    pub columns: Option<String>,
    pub filters: Vec<FilterClause>,
    pub format: CopyFormat,
}

impl ExportSpec {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, Error> {
        let table = match first_value(pairs, "table") {
            Some(table) if !table.is_empty() => table.to_string(),
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("table is required")
                    .with_hint("Pass ?table=<name> naming the table to export."));
            }
        };
        Ok(Self {
            table,
            columns: non_empty(first_value(pairs, "select")),
            filters: parse_filters(pairs),
            format: CopyFormat::from_pairs(pairs),
        })
    }

    /// The bare quoted table when nothing is filtered or projected (the engine
    /// copies the whole table), otherwise a derived subquery.
    fn source(&self) -> String {
        let table = quote_ident(&self.table);
        if self.columns.is_none() && self.filters.is_empty() {
            return table;
        }
        let columns = self
            .columns
            .as_deref()
            .map(quote_ident_list)
            .unwrap_or_else(|| "*".to_string());
        format!(
            "(SELECT {columns} FROM {table}{})",
            where_clause(&self.filters)
        )
    }

    pub fn statement(&self) -> String {
        format!(
            "COPY {} TO STDOUT{}",
            self.source(),
            self.format.with_options()
        )
    }
}

/// A validated import request: the destination side of `COPY ... FROM STDIN`.
#[derive(Clone, Debug)]
pub struct ImportSpec {
    pub table: String,
    pub columns: Option<String>,
    pub format: CopyFormat,
    /// Upstream export URL for a relay import; absent means the inbound
    /// request body is the source.
    pub host: Option<String>,
}

impl ImportSpec {
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, Error> {
        let table = match first_value(pairs, "to") {
            Some(table) if !table.is_empty() => table.to_string(),
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("to is required")
                    .with_hint("Pass ?to=<name> naming the destination table."));
            }
        };
        Ok(Self {
            table,
            columns: non_empty(first_value(pairs, "select")),
            format: CopyFormat::from_pairs(pairs),
            host: non_empty(first_value(pairs, "host")),
        })
    }

    pub fn statement(&self) -> String {
        let columns = self
            .columns
            .as_deref()
            .map(|list| format!(" ({})", quote_ident_list(list)))
            .unwrap_or_default();
        format!(
            "COPY {}{columns} FROM STDIN{}",
            quote_ident(&self.table),
            self.format.with_options()
        )
    }
}
