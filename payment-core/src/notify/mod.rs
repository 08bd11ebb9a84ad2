use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::NotificationConfig;
use crate::error::PaymentError;
use crate::models::payment::NotificationTask;
use crate::order_client::OrderClient;
use crate::repository::NotificationOutbox;

/// 指数退避: base × 2^(n-1)，封顶 max_delay；第 max_attempts 次失败后不再重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_secs: config.base_delay_secs,
            max_delay_secs: config.max_delay_secs,
        }
    }

    /// `failures` 为包括本次在内的累计失败次数
    pub fn next_delay(&self, failures: u32) -> Option<Duration> {
        if failures >= self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(failures.saturating_sub(1)).unwrap_or(u64::MAX);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        Some(seconds(secs))
    }
}

fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::days(1))
}

/// 订单状态通知投递。任务先与支付状态同事务落库，再由这里租用并投递，
/// 失败按退避重试，超过次数进入 DEAD
pub struct OrderNotifier {
    outbox: Arc<dyn NotificationOutbox>,
    order_client: Arc<dyn OrderClient>,
    policy: RetryPolicy,
    lease: Duration,
    batch_size: u32,
    poll_interval: StdDuration,
}

impl OrderNotifier {
    pub fn new(
        outbox: Arc<dyn NotificationOutbox>,
        order_client: Arc<dyn OrderClient>,
        config: &NotificationConfig,
    ) -> Self {
        Self {
            outbox,
            order_client,
            policy: RetryPolicy::from_config(config),
            lease: seconds(config.lease_secs.max(1)),
            batch_size: config.batch_size.max(1),
            poll_interval: StdDuration::from_secs(config.poll_interval_secs.max(1)),
        }
    }

    /// 立即投递一个任务。任务不可投递或已被其他投递方租用时返回 `Ok(false)`
    pub async fn deliver(&self, task_id: u64) -> Result<bool, PaymentError> {
        let now = Utc::now();
        match self.outbox.claim(task_id, now, now + self.lease).await? {
            Some(task) => self.dispatch(task).await,
            None => Ok(false),
        }
    }

    /// 处理一批到期任务，返回投递成功的数量
    pub async fn run_once(&self) -> Result<usize, PaymentError> {
        let now = Utc::now();
        let tasks = self
            .outbox
            .claim_due(now, self.batch_size, now + self.lease)
            .await?;

        let mut delivered = 0;
        for task in tasks {
            let task_id = task.id;
            match self.dispatch(task).await {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(e) => error!(task_id, error = %e, "Failed to record notification result"),
            }
        }
        Ok(delivered)
    }

    /// 后台轮询，直到 `cancel` 被触发
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.poll_interval.as_secs(), "Order notifier started");

        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Error while dispatching order notifications");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Order notifier stopped");
    }

    async fn dispatch(&self, task: NotificationTask) -> Result<bool, PaymentError> {
        match self
            .order_client
            .update_order_status(task.order_id, task.target_status)
            .await
        {
            Ok(()) => {
                self.outbox.mark_delivered(task.id).await?;
                info!(
                    task_id = task.id,
                    payment_id = task.payment_id,
                    order_id = task.order_id,
                    status = %task.target_status,
                    "Order notification delivered"
                );
                Ok(true)
            }
            Err(err) => {
                let failures = task.attempts + 1;
                let next_attempt_at = self.policy.next_delay(failures).map(|d| Utc::now() + d);

                error!(
                    task_id = task.id,
                    payment_id = task.payment_id,
                    order_id = task.order_id,
                    attempts = failures,
                    error = %err,
                    "Order notification failed"
                );
                match next_attempt_at {
                    Some(at) => warn!(task_id = task.id, next_attempt_at = %at, "Order notification rescheduled"),
                    None => error!(
                        task_id = task.id,
                        payment_id = task.payment_id,
                        order_id = task.order_id,
                        attempts = failures,
                        "Order notification is dead after max attempts"
                    ),
                }

                self.outbox
                    .record_failure(task.id, &err.to_string(), next_attempt_at)
                    .await?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::models::enums::{NotificationState, OrderStatus, PaymentMethod, TransactionStatus};
    use crate::models::payment::{PaymentTransaction, StatusUpdate};
    use crate::order_client::mocks::MockOrders;
    use crate::repository::{InMemoryRepository, PaymentRepository};
    use mockall::predicate::eq;

    fn config(max_attempts: u32) -> NotificationConfig {
        NotificationConfig {
            max_attempts,
            base_delay_secs: 0,
            max_delay_secs: 0,
            ..Default::default()
        }
    }

    async fn seeded_repo() -> Arc<InMemoryRepository> {
        let repo = Arc::new(InMemoryRepository::new());
        let tx = PaymentTransaction::new_pending(1, 1001, 42, Money::cny(5000), PaymentMethod::Mock, "mock_main");
        repo.create_payment(&tx).await.unwrap();
        let update = StatusUpdate::from_pending(1, TransactionStatus::Success)
            .with_notification(NotificationTask::new(7, 1, 1001, OrderStatus::Paid));
        repo.update_status(&update).await.unwrap();
        repo
    }

    #[test]
    fn test_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_secs: 5,
            max_delay_secs: 30,
        };
        assert_eq!(policy.next_delay(1), Some(Duration::seconds(5)));
        assert_eq!(policy.next_delay(2), Some(Duration::seconds(10)));
        assert_eq!(policy.next_delay(3), Some(Duration::seconds(20)));
        assert_eq!(policy.next_delay(4), Some(Duration::seconds(30)));
        assert_eq!(policy.next_delay(5), None);
    }

    #[tokio::test]
    async fn test_deliver_success() {
        let repo = seeded_repo().await;
        let mut orders = MockOrders::new();
        orders
            .expect_update_order_status()
            .with(eq(1001), eq(OrderStatus::Paid))
            .times(1)
            .returning(|_, _| Ok(()));

        let notifier = OrderNotifier::new(repo.clone(), Arc::new(orders), &config(3));
        assert!(notifier.deliver(7).await.unwrap());
        // 已投递的任务不会再次投递
        assert!(!notifier.deliver(7).await.unwrap());

        let task = repo.get_task(7).await.unwrap().unwrap();
        assert_eq!(task.state, NotificationState::Delivered);
    }

    #[tokio::test]
    async fn test_retry_then_dead() {
        let repo = seeded_repo().await;
        let mut orders = MockOrders::new();
        orders
            .expect_update_order_status()
            .times(3)
            .returning(|_, _| Err(PaymentError::OrderService("connection refused".to_string())));

        let notifier = OrderNotifier::new(repo.clone(), Arc::new(orders), &config(3));

        assert!(!notifier.deliver(7).await.unwrap());
        assert_eq!(notifier.run_once().await.unwrap(), 0);
        let task = repo.get_task(7).await.unwrap().unwrap();
        assert_eq!(task.attempts, 2);
        assert_eq!(task.state, NotificationState::Pending);

        assert_eq!(notifier.run_once().await.unwrap(), 0);
        let task = repo.get_task(7).await.unwrap().unwrap();
        assert_eq!(task.attempts, 3);
        assert_eq!(task.state, NotificationState::Dead);
        assert_eq!(task.last_error.as_deref(), Some("订单服务错误: connection refused"));

        // DEAD 之后不再投递
        assert_eq!(notifier.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let repo = seeded_repo().await;
        let mut orders = MockOrders::new();
        orders.expect_update_order_status().returning(|_, _| Ok(()));

        let notifier = Arc::new(OrderNotifier::new(repo.clone(), Arc::new(orders), &config(3)));
        let cancel = CancellationToken::new();
        let worker = {
            let notifier = notifier.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { notifier.run(cancel).await })
        };

        cancel.cancel();
        worker.await.unwrap();
        let task = repo.get_task(7).await.unwrap().unwrap();
        assert_eq!(task.state, NotificationState::Delivered);
    }
}
