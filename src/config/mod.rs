//! Glue configuration
//!
//! Board wiring and timing parameters, stored as JSON. Every struct uses
//! `#[serde(default)]` so partial documents are accepted.

mod schema;

pub use schema::{BoardConfig, GlueConfig, PhyInterface, PortMode, SocVariant, TimingConfig};

use std::path::Path;

use crate::error::{OtgError, Result};

impl GlueConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OtgError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: GlueConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Reject values the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.timing.poll_interval_ms == 0 {
            return Err(OtgError::Config(
                "timing.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timing.vbus_ready_timeout_ms == 0 {
            return Err(OtgError::Config(
                "timing.vbus_ready_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GlueConfig::default();
        assert_eq!(config.timing.poll_interval_ms, 2000);
        assert_eq!(config.timing.a_wait_bcon_ms, 1100);
        assert_eq!(config.board.interface_type, PhyInterface::Ulpi);
        assert!(config.board.port_mode.otg_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"board": {{"interface_type": "utmi"}}}}"#).unwrap();

        let config = GlueConfig::load(file.path()).unwrap();
        assert_eq!(config.board.interface_type, PhyInterface::Utmi);
        assert_eq!(config.board.port_mode, PortMode::Otg);
        assert_eq!(config.timing, TimingConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glue.json");

        let mut config = GlueConfig::default();
        config.board.soc = SocVariant::Omap3630;
        config.timing.a_wait_bcon_ms = 0;
        config.save(&path).unwrap();

        assert_eq!(GlueConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_poll_interval() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"timing": {{"poll_interval_ms": 0}}}}"#).unwrap();

        let err = GlueConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, OtgError::Config(_)));
    }

    #[test]
    fn test_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = GlueConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, OtgError::Serialization(_)));
    }

    #[test]
    fn test_port_mode_roles() {
        assert!(!PortMode::Host.peripheral_enabled());
        assert!(PortMode::Peripheral.peripheral_enabled());
        assert!(!PortMode::Peripheral.otg_enabled());
        assert!(PortMode::Otg.peripheral_enabled());
    }
}
