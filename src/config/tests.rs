use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.worker.cache_version = Some("v3".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        logging: LoggingOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        worker: WorkerOverrides {
            cache_version: Some("v4".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(
        WorkerConfig::from(&settings.worker).cache_name,
        "offline-worker-v4"
    );
}

#[test]
fn worker_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.worker.origin.as_str(), DEFAULT_ORIGIN);
    assert_eq!(
        WorkerConfig::from(&settings.worker).cache_name,
        "offline-worker-v1"
    );
    assert_eq!(
        settings.worker.seed_paths,
        vec!["/", "/index.html", "/view.html", "/packs.json"]
    );
    assert_eq!(settings.worker.prefetch_batch_size.get(), 10);
    assert!(settings.worker.cache_quota_bytes.is_none());
    assert!(settings.worker.cache_dir.is_none());
}

#[test]
fn worker_settings_become_engine_config() {
    let mut raw = RawSettings::default();
    raw.worker.origin = Some("https://cards.example".to_string());
    raw.worker.cache_prefix = Some("flashcards".to_string());
    raw.worker.prefetch_batch_size = Some(4);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let config = WorkerConfig::from(&settings.worker);

    assert_eq!(config.origin.as_str(), "https://cards.example/");
    assert_eq!(config.cache_name, "flashcards-v1");
    assert_eq!(config.prefetch_batch_size.get(), 4);
}

#[test]
fn zero_batch_size_is_rejected() {
    let mut raw = RawSettings::default();
    raw.worker.prefetch_batch_size = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero batch size");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "worker.prefetch_batch_size",
            ..
        }
    ));
}

#[test]
fn non_http_origin_is_rejected() {
    let mut raw = RawSettings::default();
    raw.worker.origin = Some("file:///srv/cards".to_string());

    let err = Settings::from_raw(raw).expect_err("file origin");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "worker.origin",
            ..
        }
    ));
}

#[test]
fn blank_cache_version_is_rejected() {
    let mut raw = RawSettings::default();
    raw.worker.cache_version = Some("  ".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        logging: LoggingOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["offline-worker"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "offline-worker",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--origin",
        "https://cards.example",
        "--log-json",
        "yes",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.worker.origin.as_deref(),
                Some("https://cards.example")
            );
            assert_eq!(serve.overrides.logging.log_json, Some(true));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_prefetch_arguments() {
    let args = CliArgs::parse_from([
        "offline-worker",
        "prefetch",
        "--force",
        "--prefetch-batch-size",
        "3",
        "--cache-dir",
        "/var/cache/offline-worker",
        "packs/animals.json",
        "https://cdn.example/cat.png",
    ]);

    match args.command.expect("prefetch command") {
        Command::Prefetch(prefetch) => {
            assert!(prefetch.force);
            assert_eq!(prefetch.worker.prefetch_batch_size, Some(3));

            let mut raw = RawSettings::default();
            raw.apply_worker_overrides(&prefetch.worker);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert_eq!(
                settings.worker.cache_dir.as_deref(),
                Some(std::path::Path::new("/var/cache/offline-worker"))
            );
            assert_eq!(
                prefetch.resources,
                vec!["packs/animals.json", "https://cdn.example/cat.png"]
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn prefetch_requires_resources() {
    let result = CliArgs::try_parse_from(["offline-worker", "prefetch"]);
    assert!(result.is_err());
}
