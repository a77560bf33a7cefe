use crate::gateways::adapter::PaymentGateway;
use crate::gateways::error::{GatewayError, GatewayResult};
use crate::gateways::providers::{CodGateway, MomoGateway, VnpayGateway, ZalopayGateway};
use crate::gateways::types::GatewayName;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GatewayFactoryConfig {
    pub enabled_gateways: Vec<GatewayName>,
}

impl GatewayFactoryConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "vnpay,momo,zalopay,cod".to_string());
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            enabled_gateways.push(GatewayName::from_str(value)?);
        }
        if enabled_gateways.is_empty() {
            return Err(GatewayError::ValidationError {
                message: "at least one payment provider must be enabled".to_string(),
                field: Some("ENABLED_PAYMENT_PROVIDERS".to_string()),
            });
        }
        Ok(Self { enabled_gateways })
    }
}

/// Holds one constructed adapter per enabled provider.
///
/// Adapters are built once at startup (their HTTP clients are reused) and
/// handed out as shared references; string dispatch from the webhook route
/// ends here.
pub struct GatewayFactory {
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
}

impl GatewayFactory {
    pub fn from_env() -> GatewayResult<Self> {
        let config = GatewayFactoryConfig::from_env()?;
        let mut gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>> = HashMap::new();
        for name in &config.enabled_gateways {
            let gateway: Arc<dyn PaymentGateway> = match name {
                GatewayName::Vnpay => Arc::new(VnpayGateway::from_env()?),
                GatewayName::Momo => Arc::new(MomoGateway::from_env()?),
                GatewayName::Zalopay => Arc::new(ZalopayGateway::from_env()?),
                GatewayName::Cod => Arc::new(CodGateway::new()),
            };
            gateways.insert(*name, gateway);
        }
        Ok(Self { gateways })
    }

    /// Build a factory from pre-constructed adapters (tests, custom wiring).
    pub fn with_gateways(list: Vec<Arc<dyn PaymentGateway>>) -> Self {
        Self {
            gateways: list.into_iter().map(|g| (g.name(), g)).collect(),
        }
    }

    pub fn get(&self, name: GatewayName) -> GatewayResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&name)
            .cloned()
            .ok_or(GatewayError::ValidationError {
                message: format!("provider {} is disabled", name),
                field: Some("provider".to_string()),
            })
    }

    pub fn list_enabled(&self) -> Vec<GatewayName> {
        self.gateways.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_provider_is_rejected() {
        let factory = GatewayFactory::with_gateways(vec![Arc::new(CodGateway::new())]);
        assert!(factory.get(GatewayName::Cod).is_ok());
        assert!(factory.get(GatewayName::Momo).is_err());
    }

    #[test]
    fn factory_config_parses_provider_list() {
        // from_env with no vars set falls back to the full list.
        let config = GatewayFactoryConfig {
            enabled_gateways: vec![GatewayName::Vnpay, GatewayName::Cod],
        };
        assert_eq!(config.enabled_gateways.len(), 2);
    }
}
