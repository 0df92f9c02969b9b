use super::*;

fn layer(pairs: &[(&str, ConfigValue)]) -> ConfigLayer {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn layers_with_base(name: &str, values: ConfigLayer) -> LayerSet {
    let mut set = LayerSet::new();
    set.insert(
        name,
        TargetLayer {
            values,
            variants: BTreeMap::new(),
        },
    );
    set
}

#[test]
fn test_resolve_without_target_merges_declaration_and_call() {
    let declaration = layer(&[("account", "abc-123".into())]);
    let call = layer(&[("partition", "gpu".into())]);

    let config = resolve(None, &LayerSet::new(), &declaration, &call).unwrap();

    assert_eq!(config.get_str("account"), Some("abc-123"));
    assert_eq!(config.get_str("partition"), Some("gpu"));
}

#[test]
fn test_resolve_unknown_target_fails() {
    let set = layers_with_base("anvil", ConfigLayer::new());
    let err = resolve(Some("delta"), &set, &ConfigLayer::new(), &ConfigLayer::new()).unwrap_err();

    assert!(matches!(err, DispatchError::Configuration(_)));
    let msg = err.to_string();
    assert!(msg.contains("unknown target 'delta'"));
    assert!(msg.contains("anvil"));
}

#[test]
fn test_resolve_unknown_variant_fails() {
    let mut set = LayerSet::new();
    let mut target = TargetLayer::default();
    target.variants.insert("gpu".to_string(), ConfigLayer::new());
    set.insert("anvil", target);

    let err = resolve(
        Some("anvil.debug"),
        &set,
        &ConfigLayer::new(),
        &ConfigLayer::new(),
    )
    .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("no variant 'debug'"));
    assert!(msg.contains("anvil.gpu"));
}

#[test]
fn test_variant_inherits_base_keys() {
    let mut set = LayerSet::new();
    let mut target = TargetLayer::default();
    target.values = layer(&[("a", 1i64.into()), ("b", 5i64.into())]);
    target
        .variants
        .insert("gpu".to_string(), layer(&[("a", 2i64.into())]));
    set.insert("anvil", target);

    let config = resolve(
        Some("anvil.gpu"),
        &set,
        &ConfigLayer::new(),
        &ConfigLayer::new(),
    )
    .unwrap();

    assert_eq!(config.get("a"), Some(&ConfigValue::Int(2)));
    assert_eq!(config.get("b"), Some(&ConfigValue::Int(5)));
}

#[test]
fn test_call_overrides_declaration_overrides_base() {
    let set = layers_with_base("anvil", layer(&[("walltime", "00:10:00".into())]));
    let declaration = layer(&[("walltime", "00:20:00".into())]);
    let call = layer(&[("walltime", "00:30:00".into())]);

    let config = resolve(Some("anvil"), &set, &declaration, &call).unwrap();

    assert_eq!(config.get_str("walltime"), Some("00:30:00"));
}

#[test]
fn test_worker_init_segments_accumulate_in_precedence_order() {
    let set = layers_with_base("anvil", layer(&[(WORKER_INIT_KEY, "A".into())]));
    let declaration = layer(&[(WORKER_INIT_KEY, "B".into())]);
    let call = layer(&[(WORKER_INIT_KEY, "C".into())]);

    let config = resolve(Some("anvil"), &set, &declaration, &call).unwrap();

    let expected = format!("A\nB\nC\n{}", UV_BOOTSTRAP_LINE);
    assert_eq!(config.get_str(WORKER_INIT_KEY), Some(expected.as_str()));
}

#[test]
fn test_worker_init_accumulates_through_variant() {
    let mut set = LayerSet::new();
    let mut target = TargetLayer::default();
    target.values = layer(&[(WORKER_INIT_KEY, "module load gcc".into())]);
    target.variants.insert(
        "gpu".to_string(),
        layer(&[(WORKER_INIT_KEY, "module load cuda".into())]),
    );
    set.insert("anvil", target);

    let config = resolve(
        Some("anvil.gpu"),
        &set,
        &ConfigLayer::new(),
        &ConfigLayer::new(),
    )
    .unwrap();

    let expected = format!("module load gcc\nmodule load cuda\n{}", UV_BOOTSTRAP_LINE);
    assert_eq!(config.get_str(WORKER_INIT_KEY), Some(expected.as_str()));
}

#[test]
fn test_bootstrap_line_always_present_and_last() {
    let config = resolve(None, &LayerSet::new(), &ConfigLayer::new(), &ConfigLayer::new()).unwrap();
    assert_eq!(config.get_str(WORKER_INIT_KEY), Some(UV_BOOTSTRAP_LINE));

    let call = layer(&[(WORKER_INIT_KEY, "conda activate env".into())]);
    let config = resolve(None, &LayerSet::new(), &ConfigLayer::new(), &call).unwrap();
    let value = config.get_str(WORKER_INIT_KEY).unwrap();
    assert!(value.ends_with(UV_BOOTSTRAP_LINE));
    assert!(value.starts_with("conda activate env\n"));
}

#[test]
fn test_scheduler_options_accumulate_too() {
    let set = layers_with_base(
        "anvil",
        layer(&[(SCHEDULER_OPTIONS_KEY, "#SBATCH --gpus=1".into())]),
    );
    let call = layer(&[(SCHEDULER_OPTIONS_KEY, "#SBATCH --exclusive".into())]);

    let config = resolve(Some("anvil"), &set, &ConfigLayer::new(), &call).unwrap();

    assert_eq!(
        config.get_str(SCHEDULER_OPTIONS_KEY),
        Some("#SBATCH --gpus=1\n#SBATCH --exclusive")
    );
}

#[test]
fn test_resolution_is_deterministic() {
    let set = layers_with_base(
        "anvil",
        layer(&[
            ("account", "abc".into()),
            (WORKER_INIT_KEY, "module load gcc".into()),
        ]),
    );
    let declaration = layer(&[("qos", "normal".into())]);
    let call = layer(&[("cores", 4i64.into())]);

    let first = resolve(Some("anvil"), &set, &declaration, &call).unwrap();
    let second = resolve(Some("anvil"), &set, &declaration, &call).unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_empty_and_malformed_target_names() {
    let set = LayerSet::new();
    assert!(resolve(Some(""), &set, &ConfigLayer::new(), &ConfigLayer::new()).is_err());
    assert!(resolve(Some(".gpu"), &set, &ConfigLayer::new(), &ConfigLayer::new()).is_err());
    assert!(resolve(Some("anvil."), &set, &ConfigLayer::new(), &ConfigLayer::new()).is_err());
}

#[test]
fn test_layer_set_from_table() {
    let table: toml::Table = toml::from_str(
        r#"
        [anvil]
        endpoint = "5aafb4c1-27b2-40d8-a038-a0277611868f"
        account = "abc-123"
        walltime = 600

        [anvil.gpu]
        partition = "gpu"
        qos = "gpu"
        "#,
    )
    .unwrap();

    let set = LayerSet::from_table(&table).unwrap();
    let config = resolve(
        Some("anvil.gpu"),
        &set,
        &ConfigLayer::new(),
        &ConfigLayer::new(),
    )
    .unwrap();

    assert_eq!(
        config.endpoint(),
        Some("5aafb4c1-27b2-40d8-a038-a0277611868f")
    );
    assert_eq!(config.get_str("partition"), Some("gpu"));
    assert_eq!(config.get("walltime"), Some(&ConfigValue::Int(600)));
}

#[test]
fn test_layer_set_rejects_deep_nesting() {
    let table: toml::Table = toml::from_str(
        r#"
        [anvil.gpu.debug]
        qos = "debug"
        "#,
    )
    .unwrap();

    let err = LayerSet::from_table(&table).unwrap_err();
    assert!(err.to_string().contains("nested tables"));
}

#[test]
fn test_walltime_parsing() {
    let config = EffectiveConfig::from_values(layer(&[("walltime", "00:10:00".into())]));
    assert_eq!(config.walltime(), Some(std::time::Duration::from_secs(600)));

    let config = EffectiveConfig::from_values(layer(&[("walltime", 90i64.into())]));
    assert_eq!(config.walltime(), Some(std::time::Duration::from_secs(90)));

    let config = EffectiveConfig::from_values(layer(&[("walltime", "45".into())]));
    assert_eq!(config.walltime(), Some(std::time::Duration::from_secs(45)));

    let config = EffectiveConfig::from_values(layer(&[("walltime", "bogus".into())]));
    assert_eq!(config.walltime(), None);

    let config = EffectiveConfig::from_values(ConfigLayer::new());
    assert_eq!(config.walltime(), None);
}

#[test]
fn test_list_values_survive_merging() {
    let set = layers_with_base(
        "anvil",
        layer(&[(
            "modules",
            vec!["gcc".to_string(), "openmpi".to_string()].into(),
        )]),
    );
    let config = resolve(Some("anvil"), &set, &ConfigLayer::new(), &ConfigLayer::new()).unwrap();
    assert_eq!(
        config.get("modules"),
        Some(&ConfigValue::List(vec![
            "gcc".to_string(),
            "openmpi".to_string()
        ]))
    );
}
