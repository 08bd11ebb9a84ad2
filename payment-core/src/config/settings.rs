use std::path::Path;

use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use crate::error::PaymentError;
use crate::models::enums::ChannelType;
use crate::models::payment::ChannelConfig;

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_path: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RouterConfig {
    pub default_strategy: String,
    pub cost_weight: f64,
    pub success_rate_weight: f64,
    /// 没有历史数据时使用的成功率
    pub default_success_rate: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_strategy: "availability_first".to_string(),
            cost_weight: 0.4,
            success_rate_weight: 0.6,
            default_success_rate: 0.5,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NotificationConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub batch_size: u32,
    pub poll_interval_secs: u64,
    /// 单次投递的租约时长
    pub lease_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_secs: 5,
            max_delay_secs: 600,
            batch_size: 50,
            poll_interval_secs: 5,
            lease_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OrderServiceConfig {
    pub base_url: String,
    pub timeout_secs: u64, // 秒
}

#[derive(Clone, Debug, Deserialize)]
pub struct WechatSettings {
    pub app_id: String,
    pub mch_id: String,
    pub api_key: String,
    /// MD5 或 HMAC-SHA256
    #[serde(default = "default_wechat_sign_type")]
    pub sign_type: String,
    #[serde(default = "default_wechat_gateway")]
    pub gateway_url: String,
    pub notify_url: String,
    /// 商户证书与私钥 PEM(退款需要)
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AlipaySettings {
    pub app_id: String,
    pub private_key: String,
    pub alipay_public_key: String,
    /// RSA2 或 RSA
    #[serde(default = "default_alipay_sign_type")]
    pub sign_type: String,
    #[serde(default = "default_alipay_gateway")]
    pub gateway_url: String,
    pub notify_url: String,
    pub return_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MockSettings {
    pub secret: String,
    #[serde(default = "default_mock_base_url")]
    pub base_url: String,
    /// succeed / reject / unavailable
    #[serde(default = "default_mock_behavior")]
    pub behavior: String,
    pub reject_code: Option<String>,
    pub reject_message: Option<String>,
}

/// 单个渠道的配置，`wechat` / `alipay` / `mock` 三选一，与 `type` 对应
#[derive(Clone, Debug, Deserialize)]
pub struct ChannelSettings {
    pub code: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub rate_percent: Decimal,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub wechat: Option<WechatSettings>,
    pub alipay: Option<AlipaySettings>,
    pub mock: Option<MockSettings>,
}

impl ChannelSettings {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            code: self.code.clone(),
            enabled: self.enabled,
            priority: self.priority,
            rate_percent: self.rate_percent,
            channel_type: self.channel_type,
        }
    }

    /// 校验渠道类型与提供的渠道参数一致
    pub fn validate(&self) -> Result<(), PaymentError> {
        let provided = [
            self.wechat.as_ref().map(|_| ChannelType::Wechat),
            self.alipay.as_ref().map(|_| ChannelType::Alipay),
            self.mock.as_ref().map(|_| ChannelType::Mock),
        ];
        let provided: Vec<ChannelType> = provided.into_iter().flatten().collect();

        match provided.as_slice() {
            [only] if *only == self.channel_type => Ok(()),
            [] => Err(PaymentError::Configuration(format!(
                "渠道 {} 缺少 {} 配置",
                self.code, self.channel_type
            ))),
            _ => Err(PaymentError::Configuration(format!(
                "渠道 {} 的配置与类型 {} 不匹配",
                self.code, self.channel_type
            ))),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    pub order_service: OrderServiceConfig,
    #[serde(default)]
    pub channels: Vec<ChannelSettings>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        // .env 文件可选
        let _ = dotenvy::dotenv();

        let config_path = dotenvy::var("CONFIG_PATH").unwrap_or_else(|_| {
            format!("{}/config/payment.toml", env!("CARGO_MANIFEST_DIR"))
        });

        info!("Loading configuration from {}", &config_path);
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> anyhow::Result<Self> {
        let builder = Config::builder()
            .add_source(File::from(Path::new(config_path)))
            .add_source(Environment::with_prefix("PAYMENT").separator("__"));

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PaymentError> {
        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.code.as_str()) {
                return Err(PaymentError::Configuration(format!(
                    "渠道编码重复: {}",
                    channel.code
                )));
            }
            channel.validate()?;
        }
        Ok(())
    }

    /// 路由使用的渠道列表
    pub fn channel_configs(&self) -> Vec<ChannelConfig> {
        self.channels.iter().map(ChannelSettings::channel_config).collect()
    }

    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "development"
    }

    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

fn default_true() -> bool {
    true
}

fn default_wechat_sign_type() -> String {
    "MD5".to_string()
}

fn default_wechat_gateway() -> String {
    "https://api.mch.weixin.qq.com".to_string()
}

fn default_alipay_sign_type() -> String {
    "RSA2".to_string()
}

fn default_alipay_gateway() -> String {
    "https://openapi.alipay.com/gateway.do".to_string()
}

fn default_mock_base_url() -> String {
    "https://mock-pay.local".to_string()
}

fn default_mock_behavior() -> String {
    "succeed".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const SAMPLE: &str = r#"
service_name = "payment-core"
environment = "testing"

[logging]
level = "debug"

[router]
default_strategy = "cost_based"
cost_weight = 0.5
success_rate_weight = 0.5
default_success_rate = 0.5

[order_service]
base_url = "http://127.0.0.1:9000"
timeout_secs = 5

[[channels]]
code = "mock_a"
priority = 1
rate_percent = "2.5"
type = "mock"

[channels.mock]
secret = "s3cr3t"

[[channels]]
code = "wechat_main"
priority = 2
rate_percent = "0.6"
type = "wechat"

[channels.wechat]
app_id = "wx123"
mch_id = "10000100"
api_key = "key"
notify_url = "https://example.com/notify/wechat"
timeout_secs = 10
"#;

    fn write_config(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "payment-core-{}.toml",
            crate::signer::random_string(8)
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_from_file() {
        let path = write_config(SAMPLE);
        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.service_name, "payment-core");
        assert_eq!(config.router.default_strategy, "cost_based");
        assert_eq!(config.notification.max_attempts, 8);
        assert_eq!(config.channels.len(), 2);

        let channels = config.channel_configs();
        assert_eq!(channels[0].rate_percent, dec!(2.5));
        assert_eq!(channels[1].channel_type, ChannelType::Wechat);
        assert!(channels[1].enabled);

        // 模拟渠道不发起网络请求，没有超时配置
        let mock = config.channels[0].mock.as_ref().unwrap();
        assert_eq!(mock.secret, "s3cr3t");
        assert_eq!(mock.base_url, "https://mock-pay.local");
        assert_eq!(mock.behavior, "succeed");

        let wechat = config.channels[1].wechat.as_ref().unwrap();
        assert_eq!(wechat.sign_type, "MD5");
        assert_eq!(wechat.gateway_url, "https://api.mch.weixin.qq.com");
    }

    #[test]
    fn test_mismatched_channel_rejected() {
        let content = SAMPLE.replace("type = \"mock\"", "type = \"alipay\"");
        let path = write_config(&content);
        let result = AppConfig::load_from(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();

        assert!(result.is_err());
    }
}
