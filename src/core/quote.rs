//! Purpose: Escape raw strings for interpolation into SQL statement text.
//! Exports: `quote_ident`, `quote_literal`, `quote_ident_list`.
//! Role: The sole injection boundary; every caller-supplied string passes
//! through exactly one of these before reaching a statement.
//! Invariants: Total over all inputs, including the empty string.

/// Escape and quote an identifier, making it safe for interpolation into
/// SQL statement text.
pub fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}

/// Escape and quote a literal value, making it safe for interpolation into
/// SQL statement text.
pub fn quote_literal(input: &str) -> String {
    format!("'{}'", input.replace('\'', "''"))
}

/// Quote each comma-separated token as an identifier. Tokens pass through
/// verbatim; surrounding whitespace becomes part of the quoted identifier.
pub fn quote_ident_list(list: &str) -> String {
    list.split(',').map(quote_ident).collect::<Vec<_>>().join(",")
}
