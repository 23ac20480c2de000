//! Integration tests for ectocontrol-common library.

use ectocontrol_common::{DeviceLiveness, DeviceStatus, LogFormat, LoggingConfig, parse_config};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    name: String,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_config_with_comments_and_trailing_commas() {
    let json5 = r#"
    {
        // JSON5 allows comments
        name: "boiler",
        logging: { level: "warn", format: "json", },
    }
    "#;

    let config: ServiceConfig = parse_config(json5).expect("parse failed");
    assert_eq!(config.name, "boiler");
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn test_liveness_roundtrip_through_json() {
    let liveness = DeviceLiveness {
        device: "boiler".to_string(),
        status: DeviceStatus::Offline,
        available: false,
        last_seen: 1_703_500_000_000,
        consecutive_failures: 3,
        last_error: Some("Timed out after 2s".to_string()),
    };

    let json = serde_json::to_value(&liveness).expect("serialize failed");
    assert_eq!(json["status"], "offline");
    assert_eq!(json["consecutive_failures"], 3);

    let back: DeviceLiveness = serde_json::from_value(json).expect("deserialize failed");
    assert_eq!(back, liveness);
}
