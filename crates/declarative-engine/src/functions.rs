//! Global template functions
//!
//! No clock or randomness is exposed here: equal inputs must render equal
//! bytes for the render cache to stay valid.

use minijinja::value::Rest;
use minijinja::{Environment, Error, Value};

use crate::filters::{invalid, to_json};

pub const FUNCTION_NAMES: &[&str] = &[
    "fail", "dict", "list", "get", "coalesce", "ternary", "tostring", "toint",
];

/// Register all functions on an environment
pub fn register(env: &mut Environment<'_>) {
    env.add_function("fail", fail);
    env.add_function("dict", dict);
    env.add_function("list", list);
    env.add_function("get", get);
    env.add_function("coalesce", coalesce);
    env.add_function("ternary", ternary);
    env.add_function("tostring", tostring);
    env.add_function("toint", toint);
}

/// Abort rendering with a message
///
/// Usage: {{ fail("ingress.host must be set") }}
pub fn fail(message: String) -> Result<Value, Error> {
    Err(invalid(message))
}

/// Build a dict from alternating keys and values
///
/// Usage: {{ dict("app", name, "tier", "web") }}
pub fn dict(args: Rest<Value>) -> Result<Value, Error> {
    if args.len() % 2 != 0 {
        return Err(invalid(
            "dict requires an even number of arguments (key-value pairs)",
        ));
    }

    let mut map = serde_json::Map::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .as_str()
            .ok_or_else(|| invalid("dict keys must be strings"))?;
        map.insert(key.to_string(), to_json(&pair[1])?);
    }

    Ok(Value::from_serialize(serde_json::Value::Object(map)))
}

pub fn list(args: Rest<Value>) -> Value {
    Value::from(args.0)
}

/// Attribute lookup with a fallback
///
/// Usage: {{ get(values.resources, "limits", {}) }}
pub fn get(obj: Value, key: String, default: Option<Value>) -> Value {
    match obj.get_attr(&key) {
        Ok(v) if !v.is_undefined() && !v.is_none() => v,
        _ => default.unwrap_or(Value::UNDEFINED),
    }
}

/// First argument that is neither undefined, none nor an empty string
pub fn coalesce(args: Rest<Value>) -> Value {
    args.0
        .into_iter()
        .find(|arg| {
            !arg.is_undefined() && !arg.is_none() && !arg.as_str().is_some_and(str::is_empty)
        })
        .unwrap_or(Value::UNDEFINED)
}

/// Usage: {{ ternary("yes", "no", values.enabled) }}
pub fn ternary(true_val: Value, false_val: Value, condition: Value) -> Value {
    if condition.is_true() {
        true_val
    } else {
        false_val
    }
}

pub fn tostring(value: Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

pub fn toint(value: Value) -> Result<i64, Error> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    match value.as_str() {
        Some(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid(format!("cannot convert '{}' to int", s))),
        None => Err(invalid(format!("cannot convert {} to int", value.kind()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(template: &str) -> Result<String, Error> {
        let mut env = Environment::new();
        register(&mut env);
        crate::filters::register(&mut env);
        env.render_str(template, ())
    }

    #[test]
    fn test_dict() {
        let out = render(r#"{{ dict("a", 1, "b", "x") | tojson }}"#).unwrap();
        assert_eq!(out, r#"{"a":1,"b":"x"}"#);
        assert!(render(r#"{{ dict("a") }}"#).is_err());
        assert!(render(r#"{{ dict(1, 2) }}"#).is_err());

        let out = render(r#"{% set name = "web" %}{{ dict("app", name)["app"] }}"#).unwrap();
        assert_eq!(out, "web");
    }

    #[test]
    fn test_fail() {
        let err = render(r#"{{ fail("boom") }}"#).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_get_with_default() {
        assert_eq!(render(r#"{{ get({"a": 1}, "a", 5) }}"#).unwrap(), "1");
        assert_eq!(render(r#"{{ get({"a": 1}, "b", 5) }}"#).unwrap(), "5");
    }

    #[test]
    fn test_coalesce() {
        assert_eq!(render(r#"{{ coalesce(none, "", "x", "y") }}"#).unwrap(), "x");
        assert_eq!(render(r#"{{ coalesce(0, "x") }}"#).unwrap(), "0");
    }

    #[test]
    fn test_ternary_and_conversions() {
        assert_eq!(render(r#"{{ ternary("on", "off", true) }}"#).unwrap(), "on");
        assert_eq!(render(r#"{{ ternary("on", "off", false) }}"#).unwrap(), "off");
        assert_eq!(render(r#"{{ toint("42") + 1 }}"#).unwrap(), "43");
        assert_eq!(render(r#"{{ tostring(8080) ~ "/TCP" }}"#).unwrap(), "8080/TCP");
        assert!(render(r#"{{ toint("abc") }}"#).is_err());
    }

    #[test]
    fn test_list() {
        assert_eq!(render(r#"{{ list(1, 2, 3) | length }}"#).unwrap(), "3");
        assert_eq!(render(r#"{{ list() | length }}"#).unwrap(), "0");
    }
}
