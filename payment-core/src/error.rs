use thiserror::Error;

use crate::domain::money::Currency;
use crate::models::enums::{RefundStatus, TransactionStatus};

/// 支付渠道调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("网络错误: {0}")]
    Network(String),

    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("渠道拒绝: {code} - {message}")]
    Rejected { code: String, message: String },

    #[error("签名校验失败: {0}")]
    InvalidSignature(String),

    #[error("响应解析失败: {0}")]
    ResponseParse(String),

    #[error("加解密错误: {0}")]
    Crypto(String),

    #[error("渠道配置错误: {0}")]
    Configuration(String),

    #[error("不支持的操作: {0}")]
    Unsupported(String),
}

impl GatewayError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 网络/超时类错误可由调用方退避重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl From<openssl::error::ErrorStack> for GatewayError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Crypto(err.to_string())
    }
}

/// 错误归类，调用方据此区分"订单问题"和"渠道问题"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Order,
    Gateway,
    Security,
    State,
    Internal,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("订单不存在: {0}")]
    OrderNotFound(u64),

    #[error("金额不一致: 订单金额 {expected}, 请求金额 {actual}")]
    InvalidAmount { expected: i64, actual: i64 },

    #[error("币种不一致: 订单币种 {expected}, 请求币种 {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    #[error("支付渠道不可用: {0}")]
    GatewayUnavailable(String),

    #[error("支付渠道拒绝: {code} - {message}")]
    GatewayRejected { code: String, message: String },

    #[error("签名无效: {0}")]
    SignatureInvalid(String),

    #[error("支付流水不存在: {0}")]
    TransactionNotFound(String),

    #[error("支付流水已处理: {payment_id} 当前状态 {status}")]
    AlreadyProcessed {
        payment_id: u64,
        status: TransactionStatus,
    },

    #[error("退款金额超出可退余额: 申请 {requested}, 剩余 {remaining}")]
    RefundExceedsBalance { requested: i64, remaining: i64 },

    #[error("支付流水状态错误: 当前 {current}, 需要 {expected}")]
    InvalidTransactionState {
        current: TransactionStatus,
        expected: TransactionStatus,
    },

    #[error("退款单状态错误: {refund_id} 当前 {current}")]
    InvalidRefundState { refund_id: u64, current: RefundStatus },

    #[error("退款单不存在: {0}")]
    RefundNotFound(u64),

    #[error("没有可用的支付渠道")]
    NoActiveChannels,

    #[error("路由策略未实现: {0}")]
    StrategyNotImplemented(String),

    #[error("不支持的支付渠道: {0}")]
    UnsupportedChannel(String),

    #[error("订单服务错误: {0}")]
    OrderService(String),

    #[error("数据库错误: {0}")]
    Repository(#[from] sqlx::Error),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl PaymentError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::OrderNotFound(_)
            | Self::InvalidAmount { .. }
            | Self::CurrencyMismatch { .. }
            | Self::OrderService(_) => ErrorCategory::Order,
            Self::GatewayUnavailable(_)
            | Self::GatewayRejected { .. }
            | Self::UnsupportedChannel(_)
            | Self::NoActiveChannels
            | Self::StrategyNotImplemented(_) => ErrorCategory::Gateway,
            Self::SignatureInvalid(_) => ErrorCategory::Security,
            Self::TransactionNotFound(_)
            | Self::AlreadyProcessed { .. }
            | Self::RefundExceedsBalance { .. }
            | Self::InvalidTransactionState { .. }
            | Self::InvalidRefundState { .. }
            | Self::RefundNotFound(_) => ErrorCategory::State,
            Self::Repository(_) | Self::Storage(_) | Self::Configuration(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// 仅网络类、下游服务类错误允许调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GatewayUnavailable(_) | Self::OrderService(_) | Self::Repository(_)
        )
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Network(msg) | GatewayError::Timeout(msg) => Self::GatewayUnavailable(msg),
            GatewayError::Rejected { code, message } => Self::GatewayRejected { code, message },
            GatewayError::InvalidSignature(msg) => Self::SignatureInvalid(msg),
            GatewayError::ResponseParse(msg) => Self::GatewayRejected {
                code: "INVALID_RESPONSE".to_string(),
                message: msg,
            },
            GatewayError::Crypto(msg) | GatewayError::Configuration(msg) => Self::Configuration(msg),
            GatewayError::Unsupported(msg) => Self::UnsupportedChannel(msg),
        }
    }
}
