use rusqlite::ToSql;
use rusqlite::types::{Null, ToSqlOutput};
use serde_json::Value;

use super::types::{Order, QueryCondition, QueryOp};
use crate::errors::{DbError, Result};

/// One bound operand of a rendered predicate. Field names are embedded as
/// validated path literals; operand values always travel through here.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Real(f64),
    Text(String),
    Null,
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Int(i) => ToSqlOutput::from(*i),
            Self::Real(f) => ToSqlOutput::from(*f),
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
            Self::Null => ToSqlOutput::from(Null),
        })
    }
}

/// JSON booleans extract as integers 1/0 in SQLite, so they bind that way;
/// arrays and objects bind as their compact JSON text, which is how
/// `json_extract` renders non-scalar values.
#[must_use]
pub fn bind_value(value: &Value) -> SqlParam {
    match value {
        Value::Null => SqlParam::Null,
        Value::Bool(b) => SqlParam::Int(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlParam::Int(i),
            None => SqlParam::Real(n.as_f64().unwrap_or(f64::MAX)),
        },
        Value::String(s) => SqlParam::Text(s.clone()),
        other => SqlParam::Text(other.to_string()),
    }
}

fn json_path(field: &str) -> String {
    format!("'$.{field}'")
}

fn extract(field: &str) -> String {
    format!("json_extract(data, {})", json_path(field))
}

fn type_of(field: &str) -> String {
    format!("json_type(data, {})", json_path(field))
}

/// Renders each condition to one SQL predicate, pushing its operands onto
/// `params` in render order. Predicates are combined with AND by the caller.
///
/// # Errors
/// `InvalidValue` for operand shapes the parser should have rejected.
pub fn render_predicates(
    conditions: &[QueryCondition],
    params: &mut Vec<SqlParam>,
) -> Result<Vec<String>> {
    let mut predicates = Vec::with_capacity(conditions.len());
    for condition in conditions {
        predicates.push(render_condition(condition, params)?);
    }
    Ok(predicates)
}

fn render_condition(condition: &QueryCondition, params: &mut Vec<SqlParam>) -> Result<String> {
    let field = condition.field.as_str();
    let value = &condition.value;
    let shape_err = || {
        DbError::InvalidValue(format!("{} on field {field}", condition.operator.as_str()))
    };
    let sql = match condition.operator {
        QueryOp::Eq => match value {
            // IS NULL also matches documents lacking the field
            Value::Null => format!("{} IS NULL", extract(field)),
            other => {
                params.push(bind_value(other));
                format!("{} = ?", extract(field))
            }
        },
        QueryOp::Ne => match value {
            Value::Null => format!("{} IS NOT NULL", extract(field)),
            other => {
                params.push(bind_value(other));
                // IS NOT matches rows where the field is absent
                format!("{} IS NOT ?", extract(field))
            }
        },
        QueryOp::Gt | QueryOp::Gte | QueryOp::Lt | QueryOp::Lte => {
            let op = match condition.operator {
                QueryOp::Gt => ">",
                QueryOp::Gte => ">=",
                QueryOp::Lt => "<",
                _ => "<=",
            };
            params.push(bind_value(value));
            format!("{} {op} ?", extract(field))
        }
        QueryOp::In => {
            let Value::Array(items) = value else { return Err(shape_err()) };
            render_in_set(field, items, params)
        }
        QueryOp::Nin => {
            let Value::Array(items) = value else { return Err(shape_err()) };
            let positive = render_in_set(field, items, params);
            if items.iter().any(Value::is_null) {
                // a null member excludes documents lacking the field
                format!("({} IS NOT NULL AND NOT {positive})", extract(field))
            } else {
                format!("({} IS NULL OR NOT {positive})", extract(field))
            }
        }
        QueryOp::All => {
            let Value::Array(items) = value else { return Err(shape_err()) };
            if items.is_empty() {
                // $all of nothing matches no document
                "0".to_string()
            } else {
                let mut parts = vec![format!("{} <> 'object'", type_of(field))];
                for item in items {
                    if item.is_null() {
                        parts.push(format!(
                            "EXISTS (SELECT 1 FROM json_each(data, {}) WHERE json_each.value IS NULL)",
                            json_path(field)
                        ));
                    } else {
                        params.push(bind_value(item));
                        parts.push(format!(
                            "EXISTS (SELECT 1 FROM json_each(data, {}) WHERE json_each.value = ?)",
                            json_path(field)
                        ));
                    }
                }
                format!("({})", parts.join(" AND "))
            }
        }
        QueryOp::Exists => {
            if value.as_bool().ok_or_else(shape_err)? {
                format!("{} IS NOT NULL", type_of(field))
            } else {
                format!("{} IS NULL", type_of(field))
            }
        }
        QueryOp::Regex => {
            let Value::String(pattern) = value else { return Err(shape_err()) };
            params.push(SqlParam::Text(pattern.clone()));
            format!("{} REGEXP ?", extract(field))
        }
        QueryOp::Size => {
            let len = value.as_u64().ok_or_else(shape_err)?;
            params.push(SqlParam::Int(i64::try_from(len).map_err(|_| shape_err())?));
            format!(
                "({} = 'array' AND json_array_length(data, {}) = ?)",
                type_of(field),
                json_path(field)
            )
        }
        QueryOp::Mod => {
            let items = value.as_array().ok_or_else(shape_err)?;
            let divisor = items.first().and_then(Value::as_i64).ok_or_else(shape_err)?;
            let remainder = items.get(1).and_then(Value::as_i64).ok_or_else(shape_err)?;
            params.push(SqlParam::Int(divisor));
            params.push(SqlParam::Int(remainder));
            format!(
                "({} IN ('integer', 'real') AND (CAST({} AS INTEGER) % ?) = ?)",
                type_of(field),
                extract(field)
            )
        }
        QueryOp::Type => {
            let name = value.as_str().ok_or_else(shape_err)?;
            // json_type labels: booleans split into 'true'/'false', numbers
            // into 'integer'/'real'
            match name {
                "null" => format!("{} = 'null'", type_of(field)),
                "boolean" => format!("{} IN ('true', 'false')", type_of(field)),
                "number" => format!("{} IN ('integer', 'real')", type_of(field)),
                "string" => format!("{} = 'text'", type_of(field)),
                "array" => format!("{} = 'array'", type_of(field)),
                "object" => format!("{} = 'object'", type_of(field)),
                _ => return Err(shape_err()),
            }
        }
    };
    Ok(sql)
}

fn render_in_set(field: &str, items: &[Value], params: &mut Vec<SqlParam>) -> String {
    if items.is_empty() {
        return "0".to_string();
    }
    let non_null: Vec<&Value> = items.iter().filter(|v| !v.is_null()).collect();
    let has_null = non_null.len() < items.len();
    let mut parts = Vec::new();
    if !non_null.is_empty() {
        let placeholders = vec!["?"; non_null.len()].join(", ");
        for item in &non_null {
            params.push(bind_value(item));
        }
        parts.push(format!("{} IN ({placeholders})", extract(field)));
    }
    if has_null {
        parts.push(format!("{} IS NULL", extract(field)));
    }
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        format!("({})", parts.join(" OR "))
    }
}

/// Renders the ORDER BY clause; documents missing a sort field order first
/// (SQL NULLs sort low ascending).
#[must_use]
pub fn render_order_by(order_by: &[(String, Order)]) -> String {
    if order_by.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = order_by
        .iter()
        .map(|(field, order)| {
            let dir = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            format!("{} {dir}", extract(field))
        })
        .collect();
    format!(" ORDER BY {}", terms.join(", "))
}

/// Limit and offset are validated non-negative integers, rendered literally.
#[must_use]
pub fn render_limit(limit: u64, offset: u64) -> String {
    if offset == 0 {
        format!(" LIMIT {limit}")
    } else {
        format!(" LIMIT {limit} OFFSET {offset}")
    }
}
