//! Configuration loader for the deleverage workspace.
//!
//! This crate centralizes the deployment parameters the deleverager is
//! constructed from. It provides defaults (all addresses zero) and supports
//! overrides via an optional `config.toml` file and environment variables
//! prefixed with `DELEVERAGE_` (nested fields separated using `__`). For
//! example, `DELEVERAGE_DELEVERAGER__ILK_INDEX=2`.
//!
use alloy_primitives::Address;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, FileFormat};
use serde::Deserialize;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Deserialize, Clone)]
/// Top-level settings.
pub struct Settings {
    pub deleverager: DeleveragerSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
/// Identity of the deleverager and of every collaborator it talks to.
pub struct DeleveragerSettings {
    /// Address the deleverager acts as; also the order zone and sentinel token.
    pub address: Address,
    /// Collateral class whose positions are deleveraged.
    pub ilk_index: u32,
    pub pool: Address,
    pub collateral_join: Address,
    pub settlement_engine: Address,
    /// Base asset lent by the pool.
    pub debt_token: Address,
    pub collateral_token: Address,
}

impl Settings {
    /// Load settings from defaults, `config.toml` (optional), and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("DELEVERAGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Load settings from defaults overlaid with a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(config::File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("deleverager.address", ZERO_ADDRESS)?
            .set_default("deleverager.ilk_index", 0)?
            .set_default("deleverager.pool", ZERO_ADDRESS)?
            .set_default("deleverager.collateral_join", ZERO_ADDRESS)?
            .set_default("deleverager.settlement_engine", ZERO_ADDRESS)?
            .set_default("deleverager.debt_token", ZERO_ADDRESS)?
            .set_default("deleverager.collateral_token", ZERO_ADDRESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_zero() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.deleverager.address, Address::ZERO);
        assert_eq!(settings.deleverager.ilk_index, 0);
        assert_eq!(settings.deleverager.settlement_engine, Address::ZERO);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let settings = Settings::from_toml(
            r#"
            [deleverager]
            address = "0x1111111111111111111111111111111111111111"
            ilk_index = 4
            settlement_engine = "0x00000000000000adc04c56bf30ac9d3c0aaf14dc"
            "#,
        )
        .unwrap();
        assert_eq!(settings.deleverager.address, Address::repeat_byte(0x11));
        assert_eq!(settings.deleverager.ilk_index, 4);
        assert_ne!(settings.deleverager.settlement_engine, Address::ZERO);
        assert_eq!(settings.deleverager.pool, Address::ZERO);
    }

    #[test]
    fn test_malformed_address_is_rejected() {
        let result = Settings::from_toml(
            r#"
            [deleverager]
            pool = "not-an-address"
            "#,
        );
        assert!(result.is_err());
    }
}
