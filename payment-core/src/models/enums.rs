use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::domain::money::Currency;

/// 支付流水状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Closed,
    Refunded,
}

impl TransactionStatus {
    /// 终态不再接受渠道回调驱动的状态变更
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 退款单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundStatus {
    Pending,
    Success,
    Failed,
    Closed,
}

impl RefundStatus {
    /// 仍占用可退余额的退款
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelType {
    Alipay,
    Wechat,
    Mock,
}

impl ChannelType {
    /// 未指定支付方式时使用的下单方式
    pub fn default_method(&self) -> PaymentMethod {
        match self {
            Self::Alipay => PaymentMethod::AlipayPage,
            Self::Wechat => PaymentMethod::WechatNative,
            Self::Mock => PaymentMethod::Mock,
        }
    }

    /// 支付宝只结算人民币
    pub fn supports_currency(&self, currency: Currency) -> bool {
        match self {
            Self::Alipay => currency == Currency::CNY,
            Self::Wechat | Self::Mock => true,
        }
    }
}

/// 支付方式，同时决定渠道类型与下单接口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// 不指定，由路由决定
    Auto,
    AlipayPage,
    AlipayWap,
    AlipayApp,
    AlipayQr,
    WechatNative,
    WechatJsapi,
    WechatApp,
    WechatH5,
    Mock,
}

impl PaymentMethod {
    pub fn channel_type(&self) -> Option<ChannelType> {
        match self {
            Self::Auto => None,
            Self::AlipayPage | Self::AlipayWap | Self::AlipayApp | Self::AlipayQr => {
                Some(ChannelType::Alipay)
            }
            Self::WechatNative | Self::WechatJsapi | Self::WechatApp | Self::WechatH5 => {
                Some(ChannelType::Wechat)
            }
            Self::Mock => Some(ChannelType::Mock),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Auto => "自动选择",
            Self::AlipayPage => "支付宝电脑网站支付",
            Self::AlipayWap => "支付宝手机网站支付",
            Self::AlipayApp => "支付宝APP支付",
            Self::AlipayQr => "支付宝当面付扫码",
            Self::WechatNative => "微信扫码支付",
            Self::WechatJsapi => "微信公众号支付",
            Self::WechatApp => "微信APP支付",
            Self::WechatH5 => "微信H5支付",
            Self::Mock => "模拟支付",
        }
    }
}

/// 订单服务侧的订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Paid,
    Refunded,
    Closed,
}

/// 订单通知任务(outbox)状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationState {
    Pending,
    Delivered,
    Dead,
}

/// 渠道侧交易状态，已归一化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayTradeStatus {
    Pending,
    Success,
    Failed,
    Closed,
}

impl GatewayTradeStatus {
    /// 映射为支付流水的目标状态，非终态返回 None
    pub fn target_status(&self) -> Option<TransactionStatus> {
        match self {
            Self::Pending => None,
            Self::Success => Some(TransactionStatus::Success),
            Self::Failed => Some(TransactionStatus::Failed),
            Self::Closed => Some(TransactionStatus::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_status_string_form() {
        assert_eq!(TransactionStatus::Pending.to_string(), "PENDING");
        assert_eq!(TransactionStatus::from_str("REFUNDED").unwrap(), TransactionStatus::Refunded);
        assert_eq!(RefundStatus::from_str("SUCCESS").unwrap(), RefundStatus::Success);
        assert_eq!(ChannelType::from_str("wechat").unwrap(), ChannelType::Wechat);
        assert!(TransactionStatus::from_str("paid").is_err());
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = TransactionStatus::iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal.len(), 4);
        assert!(!TransactionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_payment_method_channel_type() {
        assert_eq!(PaymentMethod::Auto.channel_type(), None);
        assert_eq!(PaymentMethod::AlipayQr.channel_type(), Some(ChannelType::Alipay));
        assert_eq!(PaymentMethod::WechatH5.channel_type(), Some(ChannelType::Wechat));
        assert_eq!(PaymentMethod::WechatH5.description(), "微信H5支付");

        assert!(ChannelType::Alipay.supports_currency(Currency::CNY));
        assert!(!ChannelType::Alipay.supports_currency(Currency::JPY));
        assert!(ChannelType::Mock.supports_currency(Currency::USD));

        for channel_type in ChannelType::iter() {
            assert_eq!(channel_type.default_method().channel_type(), Some(channel_type));
        }

        // 除 Auto 外每种方式都能确定渠道类型
        assert!(
            PaymentMethod::iter()
                .filter(|m| *m != PaymentMethod::Auto)
                .all(|m| m.channel_type().is_some())
        );
    }

    #[test]
    fn test_gateway_trade_status_target() {
        assert_eq!(GatewayTradeStatus::Pending.target_status(), None);
        assert_eq!(
            GatewayTradeStatus::Closed.target_status(),
            Some(TransactionStatus::Closed)
        );
    }
}
