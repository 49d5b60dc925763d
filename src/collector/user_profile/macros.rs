//! Макросы правил обнаружения `{#NAME}` и фильтры по ним.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::{debug, error};

use super::{Filter, format_oid, kind_to_string, packet_value};
use crate::snmp::{Session, SnmpPacket};

const NOT_MATCHES_REGEX: &str = "NOT_MATCHES_REGEX";
const EVAL_TYPE_OR: &str = "OR";

/// Значения макроса по индексу строки: `{"1": "CPU1", "2": "CPU2"}`.
pub type Macro = BTreeMap<String, String>;
pub type Macros = BTreeMap<String, Macro>;

/// Пары `{#NAME},oid` из `discovery[...]` в карту `NAME -> oid`.
pub fn format_macro_names(s: &str) -> BTreeMap<String, String> {
    let s = s.strip_prefix("discovery[").unwrap_or(s);
    let s = s.strip_suffix(']').unwrap_or(s);
    let parts: Vec<&str> = s.split(',').collect();

    parts
        .chunks_exact(2)
        .map(|pair| {
            let name = pair[0].strip_prefix('{').unwrap_or(pair[0]);
            let name = name.strip_suffix('}').unwrap_or(name);
            let name = name.strip_prefix('#').unwrap_or(name);
            (name.to_string(), format_oid(pair[1]).to_string())
        })
        .collect()
}

pub(super) async fn get_macros(
    session: &mut dyn Session,
    names: &BTreeMap<String, String>,
) -> Macros {
    let mut result = Macros::new();
    for (name, oid) in names {
        let macro_values = get_macro(session, oid).await;
        if !macro_values.is_empty() {
            result.insert(name.clone(), macro_values);
        }
    }
    result
}

async fn get_macro(session: &mut dyn Session, oid: &str) -> Macro {
    let mut result = Macro::new();
    let varbinds = match session.walk_all(oid).await {
        Ok(varbinds) => varbinds,
        Err(e) => {
            debug!(oid, error = %e, "walk snmp: failed");
            return result;
        }
    };

    for varbind in &varbinds {
        let Some((_, index)) = varbind.oid.rsplit_once('.') else {
            continue;
        };
        let packet = SnmpPacket::with_variables(vec![varbind.clone()]);
        match packet_value(&packet) {
            Some(kind) => {
                result.insert(index.to_string(), kind_to_string(kind));
            }
            None => debug!(oid = %varbind.oid, "Значение макроса не разобрано"),
        }
    }
    result
}

struct MacroCondition {
    macro_key: String,
    pattern: Regex,
    matches: bool,
}

/// Оставляет в макросах только индексы, прошедшие условия фильтра.
pub fn macros_filter(macros: &Macros, filter: &Filter) -> Macros {
    if filter.conditions.is_empty() {
        return macros.clone();
    }

    let conditions: Vec<MacroCondition> = filter
        .conditions
        .iter()
        .filter_map(|condition| {
            let value = &condition.value;
            // пользовательские макросы `{$...}` и глобальные выражения `@...` не поддерживаются
            if value.starts_with('@') || value.starts_with("{$") {
                debug!(value = %value, "Условие фильтра пропущено");
                return None;
            }
            match Regex::new(value) {
                Ok(pattern) => Some(MacroCondition {
                    macro_key: macro_key(&condition.macro_name),
                    pattern,
                    matches: condition.operator != NOT_MATCHES_REGEX,
                }),
                Err(e) => {
                    error!(value = %value, error = %e, "create regular fail");
                    None
                }
            }
        })
        .collect();

    let good_keys = if filter.evaltype == EVAL_TYPE_OR {
        filter_as_or(macros, &conditions)
    } else {
        filter_as_and(macros, &conditions)
    };

    macros
        .iter()
        .map(|(name, values)| {
            let kept = values
                .iter()
                .filter(|(index, _)| good_keys.iter().any(|k| k == *index))
                .map(|(index, value)| (index.clone(), value.clone()))
                .collect();
            (name.clone(), kept)
        })
        .collect()
}

fn filter_as_or(macros: &Macros, conditions: &[MacroCondition]) -> Vec<String> {
    let mut good_keys: Vec<String> = Vec::new();
    for condition in conditions {
        let Some(values) = macros.get(&condition.macro_key) else {
            continue;
        };
        for (index, value) in values {
            if condition.pattern.is_match(value) == condition.matches
                && !good_keys.contains(index)
            {
                good_keys.push(index.clone());
            }
        }
    }
    good_keys
}

fn filter_as_and(macros: &Macros, conditions: &[MacroCondition]) -> Vec<String> {
    let mut good_keys: Vec<String> = macros
        .values()
        .next()
        .map(|values| values.keys().cloned().collect())
        .unwrap_or_default();

    for condition in conditions {
        let Some(values) = macros.get(&condition.macro_key) else {
            continue;
        };
        for (index, value) in values {
            if condition.pattern.is_match(value) != condition.matches {
                good_keys.retain(|k| k != index);
            }
        }
    }
    good_keys
}

/// `{#ENT_NAME}` -> `ENT_NAME`
fn macro_key(s: &str) -> String {
    s.trim_matches('{')
        .trim_matches('}')
        .trim_matches('#')
        .to_string()
}
