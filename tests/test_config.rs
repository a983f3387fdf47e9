use cryocon_bridge::cryocon::attribute::{ChannelId, LoopId};
use cryocon_bridge::prelude::*;

use std::io::Write;
use std::time::Duration;

#[test]
fn loads_config_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"
address: tcp://192.168.1.40:5000
timeout: 0.3
used_channels: "A, B"
used_loops: [1, 2]
read_validity_period: 0.5
auto_lock_front_panel: true
"#
    )?;

    let config = Config::new(file.path().to_string_lossy().to_string())?;

    assert_eq!(config.address()?.to_string(), "tcp://192.168.1.40:5000");
    assert_eq!(config.timeout(), Duration::from_millis(300));
    assert_eq!(config.read_validity_period(), Duration::from_millis(500));
    assert_eq!(config.used_channels, vec![ChannelId::A, ChannelId::B]);
    assert_eq!(config.used_loops, vec![LoopId::One, LoopId::Two]);
    assert!(config.auto_lock_front_panel());

    // idn, control, two channels, loop 1 with range, loop 2 without
    assert_eq!(config.polled_attributes().len(), 2 + 2 + 8 + 7);

    Ok(())
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.yaml");

    assert!(Config::new(path.to_string_lossy().to_string()).is_err());
}
