use std::io::Write;

use tempfile::NamedTempFile;

use super::*;

pub fn data_settings() -> DataSettings {
    DataSettings {
        divider: DividerKind::Iid,
        partition_size: Some(50),
        label_distribution: Some(LabelDistribution::Uniform),
        bias_primary: 0.8,
        shards_per_client: 2,
        iid_clients: None,
        non_iid_clients: None,
        reload_data: false,
    }
}

pub fn client_settings() -> ClientSettings {
    ClientSettings {
        total_clients: 10,
        per_round: 5,
        do_test: false,
        encrypt_ratio: None,
        random_mask: false,
        concurrency: None,
        model_dir: None,
    }
}

pub fn server_settings() -> ServerSettings {
    ServerSettings {
        rounds: 3,
        random_seed: 1,
        aggregation: Weighting::Mean,
        percentile_aggregate: None,
        percentile: 100.,
        percentile_increase: 0.,
        collect_timeout: 5,
        max_failed_rounds: 2,
    }
}

pub fn checkpoint_settings() -> CheckpointSettings {
    CheckpointSettings {
        path: PathBuf::from("./checkpoints"),
        interval: 1,
        resume: false,
        fallback_to_fresh: false,
    }
}

pub fn settings() -> Settings {
    Settings {
        data: data_settings(),
        datasource: DatasourceSettings::default(),
        clients: client_settings(),
        server: server_settings(),
        checkpoint: checkpoint_settings(),
        trainer: TrainerSettings::default(),
        log: LoggingSettings {
            filter: EnvFilter::new("info"),
        },
    }
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const BASE: &str = r#"
[log]
filter = "info"

[clients]
total_clients = 10
per_round = 5

[server]
rounds = 3
random_seed = 7

[checkpoint]
path = "/tmp/fedsim"
"#;

#[test]
fn test_settings_new() {
    assert!(Settings::new("configs/config.toml").is_ok());
    assert!(Settings::new("").is_err());
}

#[test]
fn test_defaults() {
    let file = config_file(&format!(
        "{}\n[data]\ndivider = \"sharded\"\n",
        BASE
    ));
    let settings = Settings::new(file.path()).unwrap();
    assert_eq!(settings.data.shards_per_client, 2);
    assert!(!settings.data.reload_data);
    assert_eq!(settings.server.percentile, 100.);
    assert_eq!(settings.server.aggregation, Weighting::Mean);
    assert_eq!(settings.checkpoint.interval, 1);
    assert_eq!(settings.clients.workers(), 5);
    assert_eq!(settings.datasource.num_labels, 10);
}

#[test]
fn test_unknown_divider_is_rejected() {
    let file = config_file(&format!(
        "{}\n[data]\ndivider = \"iid_mindspore\"\npartition_size = 10\n",
        BASE
    ));
    assert!(matches!(
        Settings::new(file.path()),
        Err(SettingsError::Loading(_))
    ));
}

#[test]
fn test_missing_divider_fields_are_rejected() {
    let file = config_file(&format!("{}\n[data]\ndivider = \"biased\"\npartition_size = 10\n", BASE));
    assert!(matches!(
        Settings::new(file.path()),
        Err(SettingsError::Divider(DividerConfigError::MissingField {
            field: "label_distribution",
            ..
        }))
    ));
}

#[test]
fn test_mixed_client_ids_must_exist() {
    let file = config_file(&format!(
        "{}\n[data]\ndivider = \"mixed\"\npartition_size = 10\nlabel_distribution = \"uniform\"\niid_clients = [1, 2]\nnon_iid_clients = [3, 11]\n",
        BASE
    ));
    assert!(matches!(
        Settings::new(file.path()),
        Err(SettingsError::Validation(_))
    ));
}

#[test]
fn test_validate_clients() {
    assert!(validate_clients(&client_settings()).is_ok());
    assert!(validate_clients(&ClientSettings {
        per_round: 11,
        ..client_settings()
    })
    .is_err());
    assert!(validate_clients(&ClientSettings {
        per_round: 0,
        ..client_settings()
    })
    .is_err());
    assert!(validate_clients(&ClientSettings {
        encrypt_ratio: Some(0.),
        ..client_settings()
    })
    .is_err());
    assert!(validate_clients(&ClientSettings {
        encrypt_ratio: Some(1.),
        ..client_settings()
    })
    .is_ok());
}

#[test]
fn test_validate_server() {
    assert!(validate_server(&server_settings()).is_ok());
    assert!(validate_server(&ServerSettings {
        percentile: 101.,
        ..server_settings()
    })
    .is_err());
    assert!(validate_server(&ServerSettings {
        percentile_increase: -1.,
        ..server_settings()
    })
    .is_err());
    assert!(validate_server(&ServerSettings {
        rounds: 0,
        ..server_settings()
    })
    .is_err());
    assert!(validate_server(&ServerSettings {
        percentile_aggregate: Some(String::new()),
        ..server_settings()
    })
    .is_err());
}

#[test]
fn test_validate_data() {
    assert!(validate_data(&data_settings()).is_ok());
    assert!(validate_data(&DataSettings {
        bias_primary: 1.5,
        ..data_settings()
    })
    .is_err());
    assert!(validate_data(&DataSettings {
        shards_per_client: 0,
        ..data_settings()
    })
    .is_err());
}
