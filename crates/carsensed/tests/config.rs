//! The shipped example configuration must stay loadable

use carsense_core::config::{EngineConfig, PollClass, TransportConfig};
use carsense_core::model::ProtocolFamily;

#[test]
fn example_config_parses_as_engine_config() {
    let raw = include_str!("../config.example.toml");
    let config: EngineConfig = toml::from_str(raw).expect("example config should parse");

    assert_eq!(config.protocol, ProtocolFamily::Obd2);
    assert!(matches!(config.transport, TransportConfig::Tcp(_)));
    assert_eq!(config.transport.descriptor(), "tcp://192.168.0.10:35000");
    assert_eq!(config.parameters.len(), 6);

    let rpm = config
        .parameters
        .iter()
        .find(|p| p.id == "engine_rpm")
        .expect("example config should poll engine_rpm");
    assert_eq!(rpm.pid, 0x0C);
    assert_eq!(rpm.scale, 0.25);
    assert_eq!(rpm.class, PollClass::Safety);

    // Extended identifiers address the mode-22 space
    let trans = config
        .parameters
        .iter()
        .find(|p| p.id == "trans_temp")
        .expect("example config should poll trans_temp");
    assert!(trans.pid > 0xFF);
}
