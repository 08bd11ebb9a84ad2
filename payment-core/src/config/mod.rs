pub mod settings;

pub use settings::{
    AlipaySettings, AppConfig, ChannelSettings, LoggingConfig, MockSettings, NotificationConfig,
    OrderServiceConfig, RouterConfig, WechatSettings,
};
