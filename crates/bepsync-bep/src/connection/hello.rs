//! Pre-authentication Hello exchange.

use tracing::info;

use crate::config::{Configuration, ConnectionConfig};
use crate::error::{BepError, Result};
use crate::messages::Hello;

pub fn build_hello(config: &Configuration, connection: &ConnectionConfig) -> Hello {
    Hello {
        device_name: config.local_device_name.clone(),
        client_name: connection.client_name.clone(),
        client_version: connection.client_version.clone(),
    }
}

/// Validate the peer's Hello. Device and client names must be present.
pub fn process_hello(hello: &Hello) -> Result<()> {
    if hello.device_name.trim().is_empty() {
        return Err(BepError::InvalidHello("empty device name".into()));
    }
    if hello.client_name.trim().is_empty() {
        return Err(BepError::InvalidHello("empty client name".into()));
    }

    info!(
        device_name = %hello.device_name,
        client_name = %hello.client_name,
        client_version = %hello.client_version,
        "peer hello"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bepsync_core::DeviceId;

    #[test]
    fn test_build_hello_uses_config() {
        let config = Configuration::new(DeviceId::from_bytes([1; 32]), "laptop");
        let hello = build_hello(&config, &ConnectionConfig::default());
        assert_eq!(hello.device_name, "laptop");
        assert_eq!(hello.client_name, "bepsync");
        assert!(process_hello(&hello).is_ok());
    }

    #[test]
    fn test_blank_names_rejected() {
        let hello = Hello {
            device_name: " ".into(),
            client_name: "x".into(),
            client_version: "1".into(),
        };
        assert!(matches!(process_hello(&hello), Err(BepError::InvalidHello(_))));

        let hello = Hello {
            device_name: "peer".into(),
            client_name: String::new(),
            client_version: "1".into(),
        };
        assert!(matches!(process_hello(&hello), Err(BepError::InvalidHello(_))));
    }
}
