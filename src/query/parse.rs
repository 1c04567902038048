use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::types::{
    MAX_IN_SET, MAX_LIMIT, MAX_NESTING_DEPTH, MAX_PATCH_FIELDS, MAX_REGEX_LEN, MAX_SELECT_FIELDS,
    MAX_SORT_FIELDS, Order, ParsedQuery, QueryCondition, QueryOp,
};
use crate::errors::{DbError, Result};

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("literal pattern"));

// Exact case-insensitive matches are rejected outright; operand values are
// always bound as parameters, never interpolated.
const SQL_KEYWORD_BLOCKLIST: [&str; 14] = [
    "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TABLE", "FROM", "WHERE",
    "JOIN", "UNION", "EXEC", "EXECUTE",
];

const TYPE_NAMES: [&str; 6] = ["null", "boolean", "number", "string", "array", "object"];

/// Parses a full DSL query envelope (`where`, `orderBy`, `limit`, `offset`,
/// `select`, `distinct`). Absent or `null` input yields the empty query.
///
/// # Errors
/// Returns a parse-family error for unknown operators, invalid field names,
/// or operand shape violations.
pub fn parse_query(query: Option<&Value>) -> Result<ParsedQuery> {
    let obj = match query {
        None | Some(Value::Null) => return Ok(ParsedQuery::default()),
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(DbError::InvalidRequest("query must be an object".into())),
    };
    let mut parsed =
        ParsedQuery { conditions: parse_where(obj.get("where"))?, ..ParsedQuery::default() };
    if let Some(order) = obj.get("orderBy") {
        parsed.order_by = parse_order_by(order)?;
    }
    if let Some(limit) = obj.get("limit") {
        parsed.limit = Some(parse_non_negative("limit", limit)?.min(MAX_LIMIT));
    }
    if let Some(offset) = obj.get("offset") {
        parsed.offset = Some(parse_non_negative("offset", offset)?);
    }
    if let Some(select) = obj.get("select") {
        parsed.select = Some(parse_select(select)?);
    }
    if let Some(distinct) = obj.get("distinct") {
        parsed.distinct = distinct
            .as_bool()
            .ok_or_else(|| DbError::InvalidValue("distinct must be a boolean".into()))?;
    }
    Ok(parsed)
}

/// Parses a `where` clause into the flat condition list.
///
/// `$and`/`$or`/`$not` groups are recursively parsed and flattened into one
/// implicit-AND list, so OR/NOT grouping is not preserved. Callers that need
/// disjunction must issue separate queries.
///
/// # Errors
/// `InvalidOperator` for unknown `$` keys, `InvalidFieldName` for names
/// outside `[A-Za-z0-9_.]+` or matching a blocklisted SQL keyword,
/// `InvalidValue` for operand shape violations.
pub fn parse_where(where_clause: Option<&Value>) -> Result<Vec<QueryCondition>> {
    let obj = match where_clause {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(DbError::InvalidValue("where must be an object".into())),
    };
    let mut conditions = Vec::new();
    parse_condition_object(obj, 0, &mut conditions)?;
    Ok(conditions)
}

fn parse_condition_object(
    obj: &Map<String, Value>,
    depth: usize,
    out: &mut Vec<QueryCondition>,
) -> Result<()> {
    if depth > MAX_NESTING_DEPTH {
        return Err(DbError::InvalidValue("query nesting too deep".into()));
    }
    for (key, value) in obj {
        match key.as_str() {
            "$and" | "$or" => {
                let Value::Array(items) = value else {
                    return Err(DbError::InvalidValue(format!("{key} expects an array")));
                };
                for item in items {
                    let Value::Object(inner) = item else {
                        return Err(DbError::InvalidValue(format!(
                            "{key} expects an array of condition objects"
                        )));
                    };
                    parse_condition_object(inner, depth + 1, out)?;
                }
            }
            "$not" => {
                let Value::Object(inner) = value else {
                    return Err(DbError::InvalidValue("$not expects a condition object".into()));
                };
                parse_condition_object(inner, depth + 1, out)?;
            }
            other if other.starts_with('$') => {
                return Err(DbError::InvalidOperator(other.to_string()));
            }
            field => parse_field(field, value, out)?,
        }
    }
    Ok(())
}

fn parse_field(field: &str, value: &Value, out: &mut Vec<QueryCondition>) -> Result<()> {
    validate_field_name(field)?;
    match value {
        // {field: {$op: operand, ...}}
        Value::Object(ops) => {
            for (key, operand) in ops {
                let Some(op) = QueryOp::from_key(key) else {
                    return Err(DbError::InvalidOperator(key.clone()));
                };
                out.push(make_condition(field, op, operand)?);
            }
        }
        // {field: scalar-or-array} is sugar for {field: {$eq: ...}}
        other => out.push(make_condition(field, QueryOp::Eq, other)?),
    }
    Ok(())
}

fn make_condition(field: &str, op: QueryOp, operand: &Value) -> Result<QueryCondition> {
    let invalid = || DbError::InvalidValue(format!("{} on field {field}", op.as_str()));
    let value = match op {
        QueryOp::Eq | QueryOp::Ne => {
            if operand.is_object() {
                return Err(invalid());
            }
            operand.clone()
        }
        QueryOp::Gt | QueryOp::Gte | QueryOp::Lt | QueryOp::Lte => {
            if !(operand.is_number() || operand.is_string()) {
                return Err(invalid());
            }
            operand.clone()
        }
        QueryOp::In | QueryOp::Nin | QueryOp::All => {
            let Value::Array(items) = operand else {
                return Err(invalid());
            };
            Value::Array(items.iter().take(MAX_IN_SET).cloned().collect())
        }
        QueryOp::Exists => {
            if !operand.is_boolean() {
                return Err(invalid());
            }
            operand.clone()
        }
        QueryOp::Regex => {
            let Value::String(pattern) = operand else {
                return Err(invalid());
            };
            if pattern.len() > MAX_REGEX_LEN || Regex::new(pattern).is_err() {
                return Err(invalid());
            }
            operand.clone()
        }
        QueryOp::Size => {
            if operand.as_u64().is_none() {
                return Err(invalid());
            }
            operand.clone()
        }
        QueryOp::Mod => {
            let Value::Array(items) = operand else {
                return Err(invalid());
            };
            let (Some(divisor), Some(_remainder)) = (
                items.first().and_then(Value::as_i64),
                items.get(1).and_then(Value::as_i64),
            ) else {
                return Err(invalid());
            };
            if items.len() != 2 || divisor == 0 {
                return Err(invalid());
            }
            operand.clone()
        }
        QueryOp::Type => {
            let Value::String(name) = operand else {
                return Err(invalid());
            };
            if !TYPE_NAMES.contains(&name.as_str()) {
                return Err(invalid());
            }
            operand.clone()
        }
    };
    Ok(QueryCondition { field: field.to_string(), operator: op, value })
}

/// The sole SQL-injection defense for field names, which are embedded in
/// `json_extract` paths as literals. Empty dotted segments would render a
/// malformed JSON path, so they are rejected here as well.
pub(crate) fn validate_field_name(name: &str) -> Result<()> {
    if !FIELD_NAME_RE.is_match(name) || name.split('.').any(str::is_empty) {
        return Err(DbError::InvalidFieldName(name.to_string()));
    }
    if SQL_KEYWORD_BLOCKLIST.iter().any(|kw| kw.eq_ignore_ascii_case(name)) {
        return Err(DbError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

fn parse_order_by(order: &Value) -> Result<Vec<(String, Order)>> {
    let Value::Object(obj) = order else {
        return Err(DbError::InvalidValue("orderBy must be an object".into()));
    };
    let mut specs = Vec::new();
    for (field, dir) in obj.iter().take(MAX_SORT_FIELDS) {
        validate_field_name(field)?;
        let order = match dir.as_str() {
            Some(s) if s.eq_ignore_ascii_case("asc") => Order::Asc,
            Some(s) if s.eq_ignore_ascii_case("desc") => Order::Desc,
            _ => return Err(DbError::InvalidValue(format!("orderBy direction for {field}"))),
        };
        specs.push((field.clone(), order));
    }
    Ok(specs)
}

fn parse_select(select: &Value) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    match select {
        Value::Array(items) => {
            for item in items.iter().take(MAX_SELECT_FIELDS) {
                let Value::String(name) = item else {
                    return Err(DbError::InvalidValue("select entries must be strings".into()));
                };
                validate_field_name(name)?;
                fields.push(name.clone());
            }
        }
        // {field: 0|1} form: fields flagged 1 are included
        Value::Object(obj) => {
            for (name, flag) in obj.iter().take(MAX_SELECT_FIELDS) {
                validate_field_name(name)?;
                match flag.as_u64() {
                    Some(1) => fields.push(name.clone()),
                    Some(0) => {}
                    _ => return Err(DbError::InvalidValue(format!("select flag for {name}"))),
                }
            }
        }
        _ => return Err(DbError::InvalidValue("select must be an array or object".into())),
    }
    Ok(fields)
}

fn parse_non_negative(name: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| DbError::InvalidValue(format!("{name} must be a non-negative integer")))
}

/// Parses a `$set`-style update patch into `(field, value)` pairs. A bare
/// object with no `$` keys is accepted as `$set` sugar. `_id` is immutable.
///
/// # Errors
/// `InvalidOperator` for patch operators other than `$set`, `InvalidValue`
/// for an empty patch or an `_id` assignment.
pub fn parse_patch(patch: &Value) -> Result<Vec<(String, Value)>> {
    let Value::Object(obj) = patch else {
        return Err(DbError::InvalidValue("update patch must be an object".into()));
    };
    let set = if obj.keys().any(|k| k.starts_with('$')) {
        let mut set: Option<&Map<String, Value>> = None;
        for (key, value) in obj {
            if key != "$set" {
                return Err(DbError::InvalidOperator(key.clone()));
            }
            let Value::Object(fields) = value else {
                return Err(DbError::InvalidValue("$set expects an object".into()));
            };
            set = Some(fields);
        }
        set.unwrap_or(obj)
    } else {
        obj
    };
    let mut pairs = Vec::new();
    for (field, value) in set.iter().take(MAX_PATCH_FIELDS) {
        validate_field_name(field)?;
        if field == "_id" || field.starts_with("_id.") {
            return Err(DbError::InvalidValue("_id is immutable".into()));
        }
        pairs.push((field.clone(), value.clone()));
    }
    if pairs.is_empty() {
        return Err(DbError::InvalidValue("update patch is empty".into()));
    }
    Ok(pairs)
}
