//! Merging of configuration layers into an effective configuration.

use super::{
    ACCUMULATION_KEYS, ConfigLayer, ConfigValue, EffectiveConfig, LayerSet, UV_BOOTSTRAP_LINE,
    WORKER_INIT_KEY,
};
use crate::error::{DispatchError, Result};
use std::collections::BTreeMap;

/// Resolve the effective configuration for one dispatch call.
///
/// `target` optionally names a base layer, or a variant as `base.variant`.
/// Layers apply in ascending precedence: base, variant, declaration-time
/// overrides, call-time overrides. Ordinary keys are last-write-wins; the
/// accumulation keys concatenate one segment per defining layer, and the
/// pre-flight key always ends with the provisioning-tool bootstrap line.
///
/// Fails with a configuration error if `target` names a base that does not
/// exist, or a variant its base does not define. Produces no partial result.
pub fn resolve(
    target: Option<&str>,
    layers: &LayerSet,
    declaration: &ConfigLayer,
    call: &ConfigLayer,
) -> Result<EffectiveConfig> {
    let mut ordered: Vec<&ConfigLayer> = Vec::with_capacity(4);

    if let Some(target) = target {
        let (base_name, variant_name) = split_target(target)?;

        let base = layers.get(base_name).ok_or_else(|| {
            DispatchError::Configuration(format!(
                "unknown target '{}'{}",
                base_name,
                available(layers)
            ))
        })?;
        ordered.push(&base.values);

        if let Some(variant_name) = variant_name {
            let variant = base.variants.get(variant_name).ok_or_else(|| {
                DispatchError::Configuration(format!(
                    "target '{}' has no variant '{}'{}",
                    base_name,
                    variant_name,
                    available_variants(base_name, base)
                ))
            })?;
            ordered.push(variant);
        }
    }

    ordered.push(declaration);
    ordered.push(call);

    let mut merged: BTreeMap<String, ConfigValue> = BTreeMap::new();
    for layer in ordered {
        merge_layer(&mut merged, layer);
    }
    append_segment(&mut merged, WORKER_INIT_KEY, UV_BOOTSTRAP_LINE);

    Ok(EffectiveConfig::from_values(merged))
}

/// Split a target name into its base and optional variant parts.
fn split_target(target: &str) -> Result<(&str, Option<&str>)> {
    match target.split_once('.') {
        Some((base, variant)) if !base.is_empty() && !variant.is_empty() => {
            Ok((base, Some(variant)))
        }
        Some(_) => Err(DispatchError::Configuration(format!(
            "malformed target name '{}'",
            target
        ))),
        None if target.is_empty() => {
            Err(DispatchError::Configuration("empty target name".to_string()))
        }
        None => Ok((target, None)),
    }
}

/// Apply one layer on top of the accumulated result.
fn merge_layer(acc: &mut BTreeMap<String, ConfigValue>, layer: &ConfigLayer) {
    for (key, value) in layer {
        if ACCUMULATION_KEYS.contains(&key.as_str()) {
            append_segment(acc, key, &value_segment(value));
        } else {
            acc.insert(key.clone(), value.clone());
        }
    }
}

/// Append one segment to an accumulation key, newline-separated.
fn append_segment(acc: &mut BTreeMap<String, ConfigValue>, key: &str, segment: &str) {
    match acc.get_mut(key) {
        Some(ConfigValue::Str(existing)) => {
            existing.push('\n');
            existing.push_str(segment);
        }
        _ => {
            acc.insert(key.to_string(), ConfigValue::Str(segment.to_string()));
        }
    }
}

fn value_segment(value: &ConfigValue) -> String {
    value.render()
}

fn available(layers: &LayerSet) -> String {
    if layers.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = layers.target_names().collect();
    format!(". Available targets: {}", names.join(", "))
}

fn available_variants(base_name: &str, base: &super::TargetLayer) -> String {
    if base.variants.is_empty() {
        return String::new();
    }
    let names: Vec<String> = base
        .variants
        .keys()
        .map(|v| format!("{}.{}", base_name, v))
        .collect();
    format!(". Available variants: {}", names.join(", "))
}
