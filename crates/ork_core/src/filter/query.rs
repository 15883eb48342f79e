//! Transport key/value pairs -> [`Criteria`].
//!
//! Reserved keys: `__offset`, `__limit`, `__orders` (repeatable).
//! `key[]` / `key[N]` collect into a list; `field__<suffix>` selects an
//! operator through the legacy suffix table or a canonical operator name.

use super::operators::Operator;
use super::{Criteria, Filters};
use crate::resource::{EngineError, EngineResult};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static LIST_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)\[(\d*)\]$").expect("valid list key regex"));

const OFFSET_KEY: &str = "__offset";
const LIMIT_KEY: &str = "__limit";
const ORDERS_KEY: &str = "__orders";

/// Legacy suffix -> canonical operator name.
const SUFFIX_TABLE: &[(&str, &str)] = &[
    ("contains", "contains"),
    ("icontains", "icontains"),
    ("startswith", "startsWith"),
    ("istartswith", "istartsWith"),
    ("endswith", "endsWith"),
    ("iendswith", "iendsWith"),
    ("in", "in"),
    ("notin", "notIn"),
    ("notequal", "ne"),
    ("equal", "eq"),
    ("less", "lt"),
    ("lessequal", "lte"),
    ("greater", "gt"),
    ("greaterequal", "gte"),
];

/// Builds criteria from query pairs.
///
/// `supported` is an optional list of glob patterns (`*` wildcard) naming
/// the base fields a caller may filter on; other keys are dropped.
pub fn parse_criteria<I, K, V>(pairs: I, supported: Option<&[&str]>) -> EngineResult<Criteria>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let supported = supported.map(compile_globs).transpose()?;
    let mut criteria = Criteria::new();
    let mut lists: Vec<(String, Vec<(usize, String)>)> = Vec::new();
    let mut scalars: Vec<(String, String)> = Vec::new();

    for (key, value) in pairs {
        let key = key.as_ref().trim();
        let value = value.as_ref();
        match key {
            OFFSET_KEY => criteria.offset = Some(parse_count(OFFSET_KEY, value)?),
            LIMIT_KEY => criteria.limit = Some(parse_count(LIMIT_KEY, value)?),
            ORDERS_KEY => criteria
                .orders
                .get_or_insert_with(Vec::new)
                .push(value.trim().to_string()),
            _ => match split_list_key(key) {
                Some((base, index)) => {
                    let position = lists.iter().position(|(name, _)| name == base);
                    let slot = match position {
                        Some(idx) => &mut lists[idx].1,
                        None => {
                            lists.push((base.to_string(), Vec::new()));
                            let last = lists.len() - 1;
                            &mut lists[last].1
                        }
                    };
                    slot.push((index.unwrap_or(usize::MAX), value.to_string()));
                }
                None => scalars.push((key.to_string(), value.to_string())),
            },
        }
    }

    let entries = scalars
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .chain(lists.into_iter().map(|(key, mut items)| {
            items.sort_by_key(|(index, _)| *index);
            let items = items.into_iter().map(|(_, v)| Value::String(v)).collect();
            (key, Value::Array(items))
        }));

    for (key, value) in entries {
        insert_term(&mut criteria.filters, &key, value, supported.as_deref());
    }
    Ok(criteria)
}

fn insert_term(filters: &mut Filters, key: &str, value: Value, supported: Option<&[Regex]>) {
    let (field, op) = match key.rsplit_once("__") {
        Some((field, suffix)) if !field.is_empty() => match resolve_suffix(suffix) {
            Some(op) => (field, Some(op)),
            None => {
                debug!(
                    "event=parse_criteria module=filter status=skip key={} reason=unknown_suffix",
                    key
                );
                return;
            }
        },
        _ => (key, None),
    };

    if let Some(patterns) = supported {
        if !patterns.iter().any(|pattern| pattern.is_match(field)) {
            debug!(
                "event=parse_criteria module=filter status=skip key={} reason=unsupported_field",
                key
            );
            return;
        }
    }

    let previous = filters.remove(field);
    let merged = match (previous, op) {
        (None, None) => value,
        (None, Some(op)) => operator_map(op, value),
        (Some(Value::Object(mut ops)), Some(op)) => {
            ops.insert(op.to_string(), value);
            Value::Object(ops)
        }
        (Some(Value::Object(mut ops)), None) => {
            ops.insert("eq".to_string(), value);
            Value::Object(ops)
        }
        (Some(scalar), Some(op)) => {
            let mut ops = Map::new();
            ops.insert("eq".to_string(), scalar);
            ops.insert(op.to_string(), value);
            Value::Object(ops)
        }
        (Some(_), None) => value,
    };
    filters.insert(field.to_string(), merged);
}

fn operator_map(op: &str, value: Value) -> Value {
    let mut ops = Map::new();
    ops.insert(op.to_string(), value);
    Value::Object(ops)
}

fn resolve_suffix(suffix: &str) -> Option<&'static str> {
    SUFFIX_TABLE
        .iter()
        .find(|(legacy, _)| *legacy == suffix)
        .map(|(_, canonical)| *canonical)
        .or_else(|| Operator::from_name(suffix).map(Operator::name))
}

fn split_list_key(key: &str) -> Option<(&str, Option<usize>)> {
    let captures = LIST_KEY_RE.captures(key)?;
    let base = captures.get(1)?.as_str();
    let index = captures.get(2).and_then(|m| m.as_str().parse().ok());
    Some((base, index))
}

fn parse_count(key: &str, raw: &str) -> EngineResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| EngineError::validation(key, format!("`{raw}` is not a non-negative integer")))
}

fn compile_globs(patterns: &[&str]) -> EngineResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            let expr = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
            Regex::new(&expr).map_err(|err| {
                EngineError::critical(format!("invalid supported-field pattern `{pattern}`: {err}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{parse_criteria, split_list_key};
    use crate::resource::ErrorKind;
    use serde_json::json;

    #[test]
    fn reserved_keys_fill_pagination_and_orders() {
        let criteria = parse_criteria(
            [
                ("__offset", "20"),
                ("__limit", "10"),
                ("__orders", " -name "),
                ("__orders", "+id"),
            ],
            None,
        )
        .unwrap();

        assert_eq!(criteria.offset, Some(20));
        assert_eq!(criteria.limit, Some(10));
        assert_eq!(criteria.orders, Some(vec!["-name".into(), "+id".into()]));
        assert!(criteria.filters.is_empty());
    }

    #[test]
    fn invalid_pagination_is_a_validation_error() {
        let err = parse_criteria([("__limit", "ten")], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn suffixes_and_lists_merge_per_field() {
        let criteria = parse_criteria(
            [
                ("name__icontains", "cent"),
                ("age__greaterequal", "30"),
                ("age__lt", "60"),
                ("uuid[1]", "b"),
                ("uuid[0]", "a"),
                ("city__notin[]", "x"),
                ("name__bogus", "ignored"),
            ],
            None,
        )
        .unwrap();

        assert_eq!(
            serde_json::Value::Object(criteria.filters),
            json!({
                "name": {"icontains": "cent"},
                "age": {"gte": "30", "lt": "60"},
                "uuid": ["a", "b"],
                "city": {"notIn": ["x"]}
            })
        );
    }

    #[test]
    fn list_keys_split_into_base_and_index() {
        assert_eq!(split_list_key("uuid[3]"), Some(("uuid", Some(3))));
        assert_eq!(split_list_key("tags[]"), Some(("tags", None)));
        assert_eq!(split_list_key("name__in[]"), Some(("name__in", None)));
        assert_eq!(split_list_key("plain"), None);
        assert_eq!(split_list_key("[]"), None);
    }

    #[test]
    fn supported_globs_restrict_fields() {
        let criteria = parse_criteria(
            [("name", "a"), ("city_id", "c"), ("secret", "s")],
            Some(&["name", "city_*"][..]),
        )
        .unwrap();

        assert!(criteria.filters.contains_key("name"));
        assert!(criteria.filters.contains_key("city_id"));
        assert!(!criteria.filters.contains_key("secret"));
    }
}
