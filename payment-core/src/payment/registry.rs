use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::gateway::GatewayAdapter;
use super::providers::{AlipayGateway, MockGateway, WechatPayGateway};
use crate::config::ChannelSettings;
use crate::error::PaymentError;
use crate::models::enums::ChannelType;

/// 渠道编码 -> 支付适配器
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    adapters: HashMap<String, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按渠道配置逐个创建适配器，凭证只来自显式配置
    pub fn from_settings(channels: &[ChannelSettings]) -> Result<Self, PaymentError> {
        let mut registry = Self::new();

        for channel in channels {
            channel.validate()?;

            let adapter: Arc<dyn GatewayAdapter> = match channel.channel_type {
                ChannelType::Wechat => match &channel.wechat {
                    Some(settings) => Arc::new(WechatPayGateway::new(settings)?),
                    None => return Err(missing(&channel.code)),
                },
                ChannelType::Alipay => match &channel.alipay {
                    Some(settings) => Arc::new(AlipayGateway::new(settings)?),
                    None => return Err(missing(&channel.code)),
                },
                ChannelType::Mock => match &channel.mock {
                    Some(settings) => Arc::new(MockGateway::new(settings)?),
                    None => return Err(missing(&channel.code)),
                },
            };

            info!(channel = %channel.code, adapter = adapter.name(), "Registered payment gateway");
            registry.register(&channel.code, adapter);
        }

        Ok(registry)
    }

    pub fn register(&mut self, code: &str, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(code.to_string(), adapter);
    }

    pub fn get(&self, code: &str) -> Result<Arc<dyn GatewayAdapter>, PaymentError> {
        self.adapters
            .get(code)
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedChannel(code.to_string()))
    }

    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.adapters.keys().cloned().collect();
        codes.sort();
        codes
    }
}

fn missing(code: &str) -> PaymentError {
    PaymentError::Configuration(format!("渠道 {} 缺少渠道参数", code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockSettings;
    use rust_decimal_macros::dec;

    fn mock_channel(code: &str) -> ChannelSettings {
        ChannelSettings {
            code: code.to_string(),
            enabled: true,
            priority: 1,
            rate_percent: dec!(1.0),
            channel_type: ChannelType::Mock,
            wechat: None,
            alipay: None,
            mock: Some(MockSettings {
                secret: "secret".to_string(),
                base_url: "https://mock-pay.local".to_string(),
                behavior: "succeed".to_string(),
                reject_code: None,
                reject_message: None,
            }),
        }
    }

    #[test]
    fn test_registry_from_settings() {
        let registry =
            GatewayRegistry::from_settings(&[mock_channel("mock_b"), mock_channel("mock_a")]).unwrap();

        assert_eq!(registry.codes(), vec!["mock_a".to_string(), "mock_b".to_string()]);
        assert_eq!(registry.get("mock_a").unwrap().channel_type(), ChannelType::Mock);

        match registry.get("unknown") {
            Err(PaymentError::UnsupportedChannel(code)) => assert_eq!(code, "unknown"),
            _ => panic!("预期错误类型不匹配"),
        }
    }

    #[test]
    fn test_missing_provider_settings() {
        let mut channel = mock_channel("wechat_main");
        channel.channel_type = ChannelType::Wechat;
        assert!(GatewayRegistry::from_settings(&[channel]).is_err());
    }
}
