use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.database.url = Some("postgres://file".to_string());

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        database_url: Some("postgres://cli".to_string()),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.database.url.as_deref(), Some("postgres://cli"));
}

#[test]
fn cache_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let cache = settings.cache;

    assert_eq!(cache.serializer, SerializerKind::MsgPack);
    assert_eq!(cache.decompression, DecompressionMode::Lazy);
    assert_eq!(cache.sql_page_size, DEFAULT_SQL_PAGE_SIZE);
    assert_eq!(cache.collect_min_gen_delta, 8);
    assert!(cache.auto_collect);
    assert!(!cache.fail_on_missing_payload);
    assert!(cache.compressed_properties.is_empty());
    assert_eq!(cache.consume_batch_limit, 100);
    assert_eq!(settings.database.max_connections.get(), 8);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn load_command_overrides_serializer() {
    let mut raw = RawSettings::default();
    raw.cache.serializer = Some("msgpack".to_string());

    raw.apply_load_overrides(&LoadArgs {
        serializer: Some("json".to_string()),
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.serializer, SerializerKind::Json);
}

#[test]
fn unknown_serializer_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.serializer = Some("xml".to_string());

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "cache.serializer", .. }));
}

#[test]
fn zero_page_size_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.sql_page_size = Some(0);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { key: "cache.sql_page_size", .. }));
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn compressed_properties_deserialize_from_toml() {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(
            r#"
            [cache]
            decompression = "eager"
            compressed_properties = [
                { alias = "bodyText" },
                { content_type_id = 12, alias = "summary" },
            ]
            "#,
            config::FileFormat::Toml,
        ))
        .build()
        .expect("build config")
        .try_deserialize()
        .expect("deserialize raw settings");

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.decompression, DecompressionMode::Eager);
    assert_eq!(
        settings.cache.compressed_properties,
        vec![
            CompressionRule::alias("bodyText"),
            CompressionRule::for_type(12, "summary"),
        ]
    );
}

#[test]
fn default_command_is_none() {
    let args = CliArgs::parse_from(["snapcache"]);
    assert!(args.command.is_none());
    assert!(args.config_file.is_none());
}

#[test]
fn global_flags_are_accepted_after_subcommand() {
    let args = CliArgs::parse_from(["snapcache", "verify", "--log-level", "warn"]);
    assert!(matches!(args.command, Some(Command::Verify)));
    assert_eq!(args.overrides.log_level.as_deref(), Some("warn"));
}
