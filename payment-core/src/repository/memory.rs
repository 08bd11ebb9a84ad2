use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{NotificationOutbox, PaymentRepository, check_refund_balance};
use crate::error::PaymentError;
use crate::models::enums::{NotificationState, RefundStatus, TransactionStatus};
use crate::models::payment::{
    NotificationTask, PaymentTransaction, RefundTransaction, RefundUpdate, StatusUpdate,
    TransactionFilter,
};

#[derive(Default)]
struct Store {
    next_id: u64,
    payments: HashMap<u64, PaymentTransaction>,
    refunds: BTreeMap<u64, RefundTransaction>,
    tasks: BTreeMap<u64, NotificationTask>,
}

impl Store {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_task(&mut self, task: &NotificationTask) -> Result<(), PaymentError> {
        if self.tasks.contains_key(&task.id) {
            return Err(PaymentError::Storage(format!("通知任务 {} 已存在", task.id)));
        }
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn task_mut(&mut self, task_id: u64) -> Result<&mut NotificationTask, PaymentError> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| PaymentError::Storage(format!("通知任务 {} 不存在", task_id)))
    }
}

/// 进程内存储，单把写锁保证每个操作的原子性。用于测试与本地开发
#[derive(Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryRepository {
    async fn create_payment(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, PaymentError> {
        let mut store = self.store.write().await;
        if store.payments.contains_key(&transaction.payment_id) {
            return Err(PaymentError::Storage(format!(
                "支付流水 {} 已存在",
                transaction.payment_id
            )));
        }

        let mut saved = transaction.clone();
        saved.id = Some(store.next_id());
        store.payments.insert(saved.payment_id, saved.clone());
        Ok(saved)
    }

    async fn get_by_payment_id(
        &self,
        payment_id: u64,
    ) -> Result<Option<PaymentTransaction>, PaymentError> {
        Ok(self.store.read().await.payments.get(&payment_id).cloned())
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<bool, PaymentError> {
        let mut store = self.store.write().await;

        match store.payments.get(&update.payment_id) {
            Some(current) if current.status == update.expected => {}
            _ => return Ok(false),
        }
        // 先写通知任务，失败时流水保持原状
        if let Some(task) = &update.notification {
            store.insert_task(task)?;
        }

        let Some(payment) = store.payments.get_mut(&update.payment_id) else {
            return Ok(false);
        };
        payment.status = update.new_status;
        if update.gateway_transaction_id.is_some() {
            payment.gateway_transaction_id = update.gateway_transaction_id.clone();
        }
        if update.gateway_response.is_some() {
            payment.gateway_response = update.gateway_response.clone();
        }
        match update.new_status {
            TransactionStatus::Success => payment.paid_at = Some(update.at),
            TransactionStatus::Closed | TransactionStatus::Failed => {
                payment.closed_at = Some(update.at)
            }
            _ => {}
        }
        payment.updated_at = update.at;
        Ok(true)
    }

    async fn list_payments(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<PaymentTransaction>, u64), PaymentError> {
        let store = self.store.read().await;

        let mut matched: Vec<&PaymentTransaction> = store
            .payments
            .values()
            .filter(|p| filter.order_id.is_none_or(|id| p.order_id == id))
            .filter(|p| filter.user_id.is_none_or(|id| p.user_id == id))
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| {
                filter
                    .channel_code
                    .as_deref()
                    .is_none_or(|code| p.channel_code == code)
            })
            .collect();
        // 新的在前
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn create_refund(
        &self,
        refund: &RefundTransaction,
    ) -> Result<RefundTransaction, PaymentError> {
        let mut store = self.store.write().await;

        let payment = store
            .payments
            .get(&refund.original_payment_id)
            .ok_or_else(|| {
                PaymentError::TransactionNotFound(refund.original_payment_id.to_string())
            })?;
        if payment.status != TransactionStatus::Success {
            return Err(PaymentError::InvalidTransactionState {
                current: payment.status,
                expected: TransactionStatus::Success,
            });
        }
        if store.refunds.contains_key(&refund.refund_id) {
            return Err(PaymentError::Storage(format!("退款单 {} 已存在", refund.refund_id)));
        }

        let live_refunded: i64 = store
            .refunds
            .values()
            .filter(|r| r.original_payment_id == refund.original_payment_id && r.status.is_live())
            .map(|r| r.refund_amount)
            .sum();
        check_refund_balance(payment.amount, live_refunded, refund.refund_amount)?;

        let mut saved = refund.clone();
        saved.id = Some(store.next_id());
        store.refunds.insert(saved.refund_id, saved.clone());
        Ok(saved)
    }

    async fn get_refund(&self, refund_id: u64) -> Result<Option<RefundTransaction>, PaymentError> {
        Ok(self.store.read().await.refunds.get(&refund_id).cloned())
    }

    async fn list_refunds(&self, payment_id: u64) -> Result<Vec<RefundTransaction>, PaymentError> {
        Ok(self
            .store
            .read()
            .await
            .refunds
            .values()
            .filter(|r| r.original_payment_id == payment_id)
            .cloned()
            .collect())
    }

    async fn update_refund_status(&self, update: &RefundUpdate) -> Result<bool, PaymentError> {
        let mut store = self.store.write().await;
        let Some(refund) = store.refunds.get_mut(&update.refund_id) else {
            return Ok(false);
        };
        if refund.status != RefundStatus::Pending {
            return Ok(false);
        }

        refund.status = update.new_status;
        if update.gateway_refund_id.is_some() {
            refund.gateway_refund_id = update.gateway_refund_id.clone();
        }
        if update.failure_reason.is_some() {
            refund.failure_reason = update.failure_reason.clone();
        }
        if update.new_status != RefundStatus::Pending {
            refund.completed_at = Some(update.at);
        }
        refund.updated_at = update.at;
        Ok(true)
    }
}

#[async_trait]
impl NotificationOutbox for InMemoryRepository {
    async fn claim(
        &self,
        task_id: u64,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<NotificationTask>, PaymentError> {
        let mut store = self.store.write().await;
        match store.tasks.get_mut(&task_id) {
            Some(task) if task.is_claimable(now) => {
                task.lease_until = Some(lease_until);
                task.updated_at = now;
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<NotificationTask>, PaymentError> {
        let mut store = self.store.write().await;

        let mut due: Vec<&mut NotificationTask> =
            store.tasks.values_mut().filter(|t| t.is_claimable(now)).collect();
        due.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at).then(a.id.cmp(&b.id)));

        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|task| {
                task.lease_until = Some(lease_until);
                task.updated_at = now;
                task.clone()
            })
            .collect())
    }

    async fn mark_delivered(&self, task_id: u64) -> Result<(), PaymentError> {
        let mut store = self.store.write().await;
        let task = store.task_mut(task_id)?;
        task.state = NotificationState::Delivered;
        task.attempts += 1;
        task.lease_until = None;
        task.last_error = None;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn record_failure(
        &self,
        task_id: u64,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<(), PaymentError> {
        let mut store = self.store.write().await;
        let task = store.task_mut(task_id)?;
        task.attempts += 1;
        task.lease_until = None;
        task.last_error = Some(error.to_string());
        match next_attempt_at {
            Some(at) => task.next_attempt_at = at,
            None => task.state = NotificationState::Dead,
        }
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn get_task(&self, task_id: u64) -> Result<Option<NotificationTask>, PaymentError> {
        Ok(self.store.read().await.tasks.get(&task_id).cloned())
    }

    async fn list_tasks(&self, payment_id: u64) -> Result<Vec<NotificationTask>, PaymentError> {
        Ok(self
            .store
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.payment_id == payment_id)
            .cloned()
            .collect())
    }
}
