//! Spawn-time environment contract.

use std::collections::BTreeMap;
use std::env;

use drover_daemon_types::AppDescriptor;
use serde_json::Value;

const FIELD_PREFIX: &str = "DROVER_";
const ID_VAR: &str = "DROVER_ID";

/// Builds the variables layered over the daemon's own environment.
///
/// The descriptor's `env` map comes first, then every scalar descriptor field
/// as `DROVER_<FIELD>`, then the identifier and the per-instance ordinal. Later
/// layers win, so an `env` entry named like a descriptor variable (for
/// example `DROVER_NAME`) is replaced by the descriptor's value. When
/// `increment_var` names a numeric variable its value is offset by the
/// ordinal so siblings can derive distinct ports.
pub(crate) fn build_environment(
    descriptor: &AppDescriptor,
    id: u32,
    instance: u32,
) -> BTreeMap<String, String> {
    let mut vars = descriptor.env.clone();
    if let Ok(Value::Object(fields)) = serde_json::to_value(descriptor) {
        for (field, value) in fields {
            if let Some(text) = scalar(&value) {
                vars.insert(format!("{FIELD_PREFIX}{}", field.to_ascii_uppercase()), text);
            }
        }
    }
    vars.insert(ID_VAR.to_owned(), id.to_string());
    vars.insert(descriptor.instance_var.clone(), instance.to_string());
    if let Some(name) = &descriptor.increment_var {
        let base = vars
            .get(name)
            .cloned()
            .or_else(|| env::var(name).ok())
            .and_then(|value| value.trim().parse::<i64>().ok());
        if let Some(base) = base {
            vars.insert(name.clone(), base.saturating_add(i64::from(instance)).to_string());
        }
    }
    vars
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
