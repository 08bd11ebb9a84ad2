use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{
    ChannelType, GatewayTradeStatus, NotificationState, OrderStatus, PaymentMethod, RefundStatus,
    TransactionStatus,
};
use crate::domain::money::{Currency, Money};

/// 一次针对订单的收款尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Option<u64>,
    pub payment_id: u64,
    pub order_id: u64,
    pub user_id: u64,
    // 以最小单位存储，创建后不可变
    pub amount: i64,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub channel_code: String,
    pub status: TransactionStatus,
    pub gateway_transaction_id: Option<String>,
    pub gateway_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    pub fn new_pending(
        payment_id: u64,
        order_id: u64,
        user_id: u64,
        money: Money,
        payment_method: PaymentMethod,
        channel_code: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            payment_id,
            order_id,
            user_id,
            amount: money.amount,
            currency: money.currency,
            payment_method,
            channel_code: channel_code.into(),
            status: TransactionStatus::Pending,
            gateway_transaction_id: None,
            gateway_response: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            closed_at: None,
        }
    }

    /// 提交给渠道的商户订单号(out_trade_no)
    pub fn transaction_no(&self) -> String {
        self.payment_id.to_string()
    }

    pub fn money(&self) -> Money {
        Money::new(self.amount, self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundTransaction {
    pub id: Option<u64>,
    pub refund_id: u64,
    pub original_payment_id: u64,
    pub order_id: u64,
    pub refund_amount: i64,
    pub status: RefundStatus,
    pub gateway_refund_id: Option<String>,
    pub reason: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RefundTransaction {
    pub fn new_pending(
        refund_id: u64,
        payment: &PaymentTransaction,
        refund_amount: i64,
        reason: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            refund_id,
            original_payment_id: payment.payment_id,
            order_id: payment.order_id,
            refund_amount,
            status: RefundStatus::Pending,
            gateway_refund_id: None,
            reason,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// 提交给渠道的商户退款单号(out_refund_no / out_request_no)
    pub fn refund_no(&self) -> String {
        self.refund_id.to_string()
    }
}

/// 渠道配置，路由时只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub code: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    /// 费率百分比，2.5 表示 2.5%
    #[serde(default)]
    pub rate_percent: Decimal,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
}

fn default_enabled() -> bool {
    true
}

/// 路由上下文，不落库
#[derive(Debug, Clone, PartialEq)]
pub struct RouteContext {
    pub user_id: u64,
    pub amount: i64,
    pub currency: Currency,
    pub client_ip: Option<String>,
    pub payment_method: PaymentMethod,
    pub card_bin: Option<String>,
    pub platform: Option<String>,
}

impl RouteContext {
    pub fn new(user_id: u64, money: &Money, payment_method: PaymentMethod) -> Self {
        Self {
            user_id,
            amount: money.amount,
            currency: money.currency,
            client_ip: None,
            payment_method,
            card_bin: None,
            platform: None,
        }
    }
}

// ---- 渠道调用 DTO ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub order_no: String,
    pub amount: i64,
    pub currency: Currency,
    pub subject: String,
    pub client_ip: Option<String>,
    pub return_url: Option<String>,
    pub notify_url: Option<String>,
    pub method: PaymentMethod,
    /// 微信 JSAPI 必填
    pub open_id: Option<String>,
}

/// 下单结果，按支付方式填充其一: 跳转链接、二维码或 SDK 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_url: Option<String>,
    pub qr_code: Option<String>,
    pub app_params: Option<serde_json::Value>,
    pub transaction_id: Option<String>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: GatewayTradeStatus,
    pub gateway_transaction_id: Option<String>,
    pub amount: Option<i64>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_no: String,
    pub refund_no: String,
    pub original_amount: i64,
    pub refund_amount: i64,
    pub currency: Currency,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundResponse {
    pub gateway_refund_id: Option<String>,
    pub status: RefundStatus,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundQueryResponse {
    pub status: RefundStatus,
    pub gateway_refund_id: Option<String>,
    pub refund_amount: Option<i64>,
    pub raw: String,
}

/// 归一化后的渠道回调
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackNotification {
    pub transaction_no: String,
    pub gateway_transaction_id: Option<String>,
    pub status: GatewayTradeStatus,
    pub amount: Option<i64>,
    pub raw: String,
}

// ---- 存储层 DTO ----

/// 条件状态更新，仅当当前状态等于 `expected` 时生效
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub payment_id: u64,
    pub expected: TransactionStatus,
    pub new_status: TransactionStatus,
    pub gateway_transaction_id: Option<String>,
    pub gateway_response: Option<String>,
    pub at: DateTime<Utc>,
    /// 与状态变更同事务写入的通知任务
    pub notification: Option<NotificationTask>,
}

impl StatusUpdate {
    pub fn from_pending(payment_id: u64, new_status: TransactionStatus) -> Self {
        Self {
            payment_id,
            expected: TransactionStatus::Pending,
            new_status,
            gateway_transaction_id: None,
            gateway_response: None,
            at: Utc::now(),
            notification: None,
        }
    }

    pub fn with_gateway(mut self, gateway_transaction_id: Option<String>, raw: Option<String>) -> Self {
        self.gateway_transaction_id = gateway_transaction_id;
        self.gateway_response = raw;
        self
    }

    pub fn with_notification(mut self, task: NotificationTask) -> Self {
        self.notification = Some(task);
        self
    }
}

/// 退款单条件更新，仅 PENDING 可变更
#[derive(Debug, Clone, PartialEq)]
pub struct RefundUpdate {
    pub refund_id: u64,
    pub new_status: RefundStatus,
    pub gateway_refund_id: Option<String>,
    pub failure_reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl RefundUpdate {
    pub fn new(refund_id: u64, new_status: RefundStatus) -> Self {
        Self {
            refund_id,
            new_status,
            gateway_refund_id: None,
            failure_reason: None,
            at: Utc::now(),
        }
    }
}

/// 订单状态通知任务(outbox)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTask {
    pub id: u64,
    pub payment_id: u64,
    pub order_id: u64,
    pub target_status: OrderStatus,
    pub state: NotificationState,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationTask {
    pub fn new(id: u64, payment_id: u64, order_id: u64, target_status: OrderStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            payment_id,
            order_id,
            target_status,
            state: NotificationState::Pending,
            attempts: 0,
            next_attempt_at: now,
            lease_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 待投递且未被其他投递方持有
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.state == NotificationState::Pending
            && self.next_attempt_at <= now
            && self.lease_until.is_none_or(|lease| lease <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub order_id: Option<u64>,
    pub user_id: Option<u64>,
    pub status: Option<TransactionStatus>,
    pub channel_code: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            order_id: None,
            user_id: None,
            status: None,
            channel_code: None,
            page: 1,
            page_size: 20,
        }
    }
}

impl TransactionFilter {
    pub fn limit(&self) -> u32 {
        self.page_size.clamp(1, 100)
    }

    pub fn offset(&self) -> u32 {
        self.page.max(1).saturating_sub(1).saturating_mul(self.limit())
    }
}

/// 订单服务返回的订单快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: u64,
    pub user_id: u64,
    pub total_amount: i64,
    pub currency: Currency,
    pub status: OrderStatus,
}

// ---- 事务管理入参/出参 ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentCommand {
    pub order_id: u64,
    pub user_id: u64,
    pub amount: i64,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub subject: String,
    pub client_ip: Option<String>,
    pub return_url: Option<String>,
    pub open_id: Option<String>,
    pub card_bin: Option<String>,
    pub platform: Option<String>,
    /// 路由策略名，缺省使用配置的默认策略
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePaymentResult {
    pub transaction: PaymentTransaction,
    pub credential: PaymentResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub payment_id: u64,
    pub status: TransactionStatus,
    /// 本次回调是否驱动了状态变更
    pub transitioned: bool,
    /// 返回给渠道的应答报文
    pub ack: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundResult {
    pub refund: RefundTransaction,
    pub payment_status: TransactionStatus,
}
