use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PaymentError;
use crate::models::enums::TransactionStatus;
use crate::models::payment::{
    NotificationTask, PaymentTransaction, RefundTransaction, RefundUpdate, StatusUpdate,
    TransactionFilter,
};

pub mod memory;
pub mod mysql;

pub use memory::InMemoryRepository;
pub use mysql::MySqlRepository;

/// 支付流水与退款单存储
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// 写入新的支付流水，返回带内部 id 的记录
    async fn create_payment(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, PaymentError>;

    async fn get_by_payment_id(
        &self,
        payment_id: u64,
    ) -> Result<Option<PaymentTransaction>, PaymentError>;

    /// 条件更新: 仅当当前状态等于 `update.expected` 时生效，返回是否有行被修改。
    /// 附带的通知任务与状态变更在同一原子操作内写入。
    async fn update_status(&self, update: &StatusUpdate) -> Result<bool, PaymentError>;

    async fn list_payments(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<PaymentTransaction>, u64), PaymentError>;

    /// SUCCESS -> REFUNDED
    async fn mark_refunded(
        &self,
        payment_id: u64,
        notification: Option<NotificationTask>,
    ) -> Result<bool, PaymentError> {
        let mut update = StatusUpdate::from_pending(payment_id, TransactionStatus::Refunded);
        update.expected = TransactionStatus::Success;
        update.notification = notification;
        self.update_status(&update).await
    }

    /// 写入退款单。支付流水必须为 SUCCESS，且未失败的退款合计不得超过原支付金额，
    /// 校验与写入是原子的。
    async fn create_refund(
        &self,
        refund: &RefundTransaction,
    ) -> Result<RefundTransaction, PaymentError>;

    async fn get_refund(&self, refund_id: u64) -> Result<Option<RefundTransaction>, PaymentError>;

    async fn list_refunds(&self, payment_id: u64) -> Result<Vec<RefundTransaction>, PaymentError>;

    /// 仅 PENDING 的退款单可被更新
    async fn update_refund_status(&self, update: &RefundUpdate) -> Result<bool, PaymentError>;
}

/// 订单通知任务(outbox)
#[async_trait]
pub trait NotificationOutbox: Send + Sync {
    /// 租用指定任务，任务不可投递或已被他人租用时返回 None
    async fn claim(
        &self,
        task_id: u64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<NotificationTask>, PaymentError>;

    /// 批量租用到期任务
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<NotificationTask>, PaymentError>;

    async fn mark_delivered(&self, task_id: u64) -> Result<(), PaymentError>;

    /// 记录一次失败；`next_attempt_at` 为 None 时任务进入 DEAD
    async fn record_failure(
        &self,
        task_id: u64,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), PaymentError>;

    async fn get_task(&self, task_id: u64) -> Result<Option<NotificationTask>, PaymentError>;

    async fn list_tasks(&self, payment_id: u64) -> Result<Vec<NotificationTask>, PaymentError>;
}

/// 未失败退款合计不能超过原支付金额
pub(crate) fn check_refund_balance(
    original_amount: i64,
    live_refunded: i64,
    requested: i64,
) -> Result<(), PaymentError> {
    let remaining = original_amount - live_refunded;
    if requested > remaining {
        return Err(PaymentError::RefundExceedsBalance { requested, remaining });
    }
    Ok(())
}
