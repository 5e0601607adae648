//! Named parameter rewriting and binding.
//!
//! Query templates use `:name` placeholders. Before execution each template is
//! rewritten into the backend's positional syntax and the values are collected
//! in bind order. A list value expands into one bind per element, which is how
//! `IN (:ids)` works.

use crate::error::{DbError, DbResult};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{Postgres, Sqlite};

/// Named parameter values supplied to a query.
pub type QueryParams = serde_json::Map<String, JsonValue>;

/// A single positional bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    String(String),
    /// Object value, bound as JSON where the backend supports it
    Json(JsonValue),
}

impl QueryParam {
    /// Convert a scalar JSON value. Arrays are rejected; callers expand them first.
    pub fn from_json(name: &str, value: &JsonValue) -> DbResult<Self> {
        Ok(match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::String(s.clone()),
            JsonValue::Object(_) => Self::Json(value.clone()),
            JsonValue::Array(_) => {
                return Err(DbError::query(format!(
                    "parameter '{}' contains a nested list",
                    name
                )));
            }
        })
    }

    /// True for values bound as text (strings and untyped nulls).
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Null | Self::String(_))
    }
}

/// A template rewritten to positional binds.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// Rewrite with `$1, $2, ...` placeholders.
pub fn rewrite_dollar(template: &str, params: &QueryParams) -> DbResult<BoundQuery> {
    rewrite_named(template, params, |n, _| format!("${}", n))
}

/// Rewrite with `?` placeholders.
pub fn rewrite_question(template: &str, params: &QueryParams) -> DbResult<BoundQuery> {
    rewrite_named(template, params, |_, _| "?".to_string())
}

/// Rewrite every `:name` placeholder in `template`, rendering each bind with `render`.
///
/// `render` receives the 1-based bind position and the value. Placeholders inside
/// string literals, quoted identifiers and comments are left alone, as is the
/// `::` cast operator.
pub fn rewrite_named<F>(template: &str, params: &QueryParams, mut render: F) -> DbResult<BoundQuery>
where
    F: FnMut(usize, &QueryParam) -> String,
{
    let bytes = template.as_bytes();
    let mut sql = String::with_capacity(template.len() + 16);
    let mut binds = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i = skip_past(bytes, i + 1, quote);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_past(bytes, i + 2, b'\n');
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = match template[i + 2..].find("*/") {
                    Some(end) => i + 2 + end + 2,
                    None => bytes.len(),
                };
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
            }
            b':' if template[i + 1..].chars().next().is_some_and(is_ident_start) => {
                let start = i + 1;
                let name = placeholder_at(template, start);
                let end = start + name.len();
                let value = params.get(name).ok_or_else(|| {
                    DbError::query(format!("missing value for parameter ':{}'", name))
                })?;

                sql.push_str(&template[copied..i]);
                match value {
                    JsonValue::Array(items) => {
                        if items.is_empty() {
                            return Err(DbError::query(format!(
                                "parameter '{}' is an empty list",
                                name
                            )));
                        }
                        for (k, item) in items.iter().enumerate() {
                            if k > 0 {
                                sql.push_str(", ");
                            }
                            let param = QueryParam::from_json(name, item)?;
                            sql.push_str(&render(binds.len() + 1, &param));
                            binds.push(param);
                        }
                    }
                    scalar => {
                        let param = QueryParam::from_json(name, scalar)?;
                        sql.push_str(&render(binds.len() + 1, &param));
                        binds.push(param);
                    }
                }
                copied = end;
                i = end;
            }
            _ => i += 1,
        }
    }
    sql.push_str(&template[copied..]);

    Ok(BoundQuery { sql, params: binds })
}

/// Index just past the next `terminator` at or after `from`, or the end of input.
fn skip_past(bytes: &[u8], from: usize, terminator: u8) -> usize {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|b| *b == terminator)
        .map_or(bytes.len(), |p| from + p + 1)
}

/// The placeholder name starting at byte offset `start`.
fn placeholder_at(template: &str, start: usize) -> &str {
    let rest = &template[start..];
    let len = rest
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map_or(rest.len(), |(k, _)| k);
    &rest[..len]
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// True when `name` is recognised whole as a `:name` placeholder.
pub fn is_placeholder_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_char)
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}
