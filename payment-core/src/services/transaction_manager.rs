use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::money::Money;
use crate::error::PaymentError;
use crate::id_generator::IdGenerator;
use crate::models::enums::{OrderStatus, RefundStatus, TransactionStatus};
use crate::models::payment::{
    CallbackOutcome, ChannelConfig, CreatePaymentCommand, CreatePaymentResult, NotificationTask,
    PaymentRequest, PaymentTransaction, RefundRequest, RefundResult, RefundTransaction,
    RefundUpdate, RouteContext, StatusUpdate, TransactionFilter,
};
use crate::notify::OrderNotifier;
use crate::order_client::OrderClient;
use crate::payment::registry::GatewayRegistry;
use crate::repository::PaymentRepository;
use crate::routing::ChannelRouter;

/// 支付事务管理: 下单、回调、退款与对账
///
/// 不持有调用之间的可变状态，所有状态落在 repository 中并以 `payment_id` 为键。
pub struct TransactionManager {
    router: Arc<ChannelRouter>,
    channels: Arc<Vec<ChannelConfig>>,
    gateways: GatewayRegistry,
    repository: Arc<dyn PaymentRepository>,
    order_client: Arc<dyn OrderClient>,
    id_generator: Arc<dyn IdGenerator>,
    notifier: Arc<OrderNotifier>,
}

impl TransactionManager {
    pub fn new(
        router: Arc<ChannelRouter>,
        channels: Vec<ChannelConfig>,
        gateways: GatewayRegistry,
        repository: Arc<dyn PaymentRepository>,
        order_client: Arc<dyn OrderClient>,
        id_generator: Arc<dyn IdGenerator>,
        notifier: Arc<OrderNotifier>,
    ) -> Self {
        Self {
            router,
            channels: Arc::new(channels),
            gateways,
            repository,
            order_client,
            id_generator,
            notifier,
        }
    }

    pub async fn create_payment(
        &self,
        command: CreatePaymentCommand,
    ) -> Result<CreatePaymentResult, PaymentError> {
        // 1. 获取订单并核对金额
        let order = self
            .order_client
            .get_order(command.order_id)
            .await?
            .ok_or(PaymentError::OrderNotFound(command.order_id))?;

        if command.amount <= 0 || command.amount != order.total_amount {
            return Err(PaymentError::InvalidAmount {
                expected: order.total_amount,
                actual: command.amount,
            });
        }
        if command.currency != order.currency {
            return Err(PaymentError::CurrencyMismatch {
                expected: order.currency,
                actual: command.currency,
            });
        }

        // 2. 选择渠道
        let money = Money::new(command.amount, command.currency);
        let mut ctx = RouteContext::new(command.user_id, &money, command.payment_method);
        ctx.client_ip = command.client_ip.clone();
        ctx.card_bin = command.card_bin.clone();
        ctx.platform = command.platform.clone();

        let channel = self
            .router
            .route(command.strategy.as_deref(), &ctx, &self.channels)?;
        let gateway = self.gateways.get(&channel.code)?;

        let method = match command.payment_method.channel_type() {
            Some(_) => command.payment_method,
            None => channel.channel_type.default_method(),
        };

        // 3. 落库 PENDING 流水
        let transaction = PaymentTransaction::new_pending(
            self.id_generator.generate(),
            command.order_id,
            command.user_id,
            money,
            method,
            channel.code.clone(),
        );
        let transaction = self.repository.create_payment(&transaction).await?;

        info!(
            payment_id = transaction.payment_id,
            order_id = transaction.order_id,
            channel = %transaction.channel_code,
            method = %method,
            amount = transaction.amount,
            "Payment transaction created"
        );

        // 4. 渠道下单，失败时保留 PENDING 流水供对账
        let request = PaymentRequest {
            order_no: transaction.transaction_no(),
            amount: transaction.amount,
            currency: transaction.currency,
            subject: command.subject,
            client_ip: command.client_ip,
            return_url: command.return_url,
            notify_url: None,
            method,
            open_id: command.open_id,
        };

        let credential = gateway.pay(&request).await.map_err(|e| {
            error!(
                payment_id = transaction.payment_id,
                channel = %transaction.channel_code,
                error = %e,
                "Gateway pay failed, transaction left pending"
            );
            PaymentError::from(e)
        })?;

        Ok(CreatePaymentResult {
            transaction,
            credential,
        })
    }

    /// 处理渠道异步通知。重复通知与已终态的流水直接应答成功
    pub async fn handle_callback(
        &self,
        channel_code: &str,
        raw: &str,
    ) -> Result<CallbackOutcome, PaymentError> {
        let gateway = self.gateways.get(channel_code)?;

        // 1. 解码并验签，验签失败不做任何变更
        let params = gateway.parse_callback(raw)?;
        if !gateway.verify_callback(&params)? {
            warn!(channel = %channel_code, "Rejected callback with invalid signature");
            return Err(PaymentError::SignatureInvalid(format!(
                "渠道 {} 回调签名校验失败",
                channel_code
            )));
        }
        let notification = gateway.interpret_callback(&params, raw)?;

        // 2. 查找流水
        let payment_id: u64 = notification
            .transaction_no
            .parse()
            .map_err(|_| PaymentError::TransactionNotFound(notification.transaction_no.clone()))?;
        let transaction = self.load_payment(payment_id).await?;

        if transaction.channel_code != channel_code {
            warn!(
                payment_id,
                expected = %transaction.channel_code,
                actual = %channel_code,
                "Callback arrived on a different channel"
            );
            return Err(PaymentError::TransactionNotFound(notification.transaction_no));
        }

        // 3. 已终态: 幂等应答
        if transaction.status.is_terminal() {
            info!(payment_id, status = %transaction.status, "Duplicate callback ignored");
            return Ok(CallbackOutcome {
                payment_id,
                status: transaction.status,
                transitioned: false,
                ack: gateway.ack(true, "OK"),
            });
        }

        if let Some(amount) = notification.amount {
            if amount != transaction.amount {
                warn!(
                    payment_id,
                    expected = transaction.amount,
                    actual = amount,
                    "Callback amount mismatch"
                );
                return Err(PaymentError::InvalidAmount {
                    expected: transaction.amount,
                    actual: amount,
                });
            }
        }

        // 4. 条件更新
        let Some(target) = notification.status.target_status() else {
            return Ok(CallbackOutcome {
                payment_id,
                status: transaction.status,
                transitioned: false,
                ack: gateway.ack(true, "OK"),
            });
        };

        let transitioned = self
            .transition(
                &transaction,
                target,
                notification.gateway_transaction_id,
                Some(notification.raw),
            )
            .await?;

        let status = if transitioned {
            target
        } else {
            self.load_payment(payment_id).await?.status
        };

        Ok(CallbackOutcome {
            payment_id,
            status,
            transitioned,
            ack: gateway.ack(true, "OK"),
        })
    }

    /// 回调处理失败时返回给渠道的应答，渠道未知时返回 None
    pub fn failure_ack(&self, channel_code: &str, err: &PaymentError) -> Option<String> {
        self.gateways
            .get(channel_code)
            .ok()
            .map(|gateway| gateway.ack(false, &err.to_string()))
    }

    pub async fn refund(
        &self,
        payment_id: u64,
        refund_amount: i64,
        reason: Option<String>,
    ) -> Result<RefundResult, PaymentError> {
        // 1. 校验原支付
        let transaction = self.load_payment(payment_id).await?;
        if transaction.status != TransactionStatus::Success {
            return Err(PaymentError::InvalidTransactionState {
                current: transaction.status,
                expected: TransactionStatus::Success,
            });
        }
        if refund_amount <= 0 {
            return Err(PaymentError::InvalidAmount {
                expected: transaction.amount,
                actual: refund_amount,
            });
        }
        let gateway = self.gateways.get(&transaction.channel_code)?;

        // 2. 预占退款额度，写入 PENDING 退款单
        let refund = RefundTransaction::new_pending(
            self.id_generator.generate(),
            &transaction,
            refund_amount,
            reason.clone(),
        );
        let refund = self.repository.create_refund(&refund).await?;

        info!(
            payment_id,
            refund_id = refund.refund_id,
            amount = refund_amount,
            "Refund created"
        );

        // 3. 调用渠道
        let request = RefundRequest {
            order_no: transaction.transaction_no(),
            refund_no: refund.refund_no(),
            original_amount: transaction.amount,
            refund_amount,
            currency: transaction.currency,
            reason,
        };

        match gateway.refund(&request).await {
            Ok(response) => {
                let mut update = RefundUpdate::new(refund.refund_id, response.status);
                update.gateway_refund_id = response.gateway_refund_id;
                if matches!(response.status, RefundStatus::Failed | RefundStatus::Closed) {
                    update.failure_reason = Some(format!("渠道退款状态 {}", response.status));
                }
                self.finish_refund(&transaction, update).await
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    payment_id,
                    refund_id = refund.refund_id,
                    error = %e,
                    "Gateway refund unreachable, refund left pending"
                );
                Err(e.into())
            }
            Err(e) => {
                let mut update = RefundUpdate::new(refund.refund_id, RefundStatus::Failed);
                update.failure_reason = Some(e.to_string());
                self.repository.update_refund_status(&update).await?;
                warn!(
                    payment_id,
                    refund_id = refund.refund_id,
                    error = %e,
                    "Gateway rejected refund"
                );
                Err(e.into())
            }
        }
    }

    /// 对 PENDING 退款单查询渠道结果并落定
    pub async fn sync_refund(&self, refund_id: u64) -> Result<RefundResult, PaymentError> {
        let refund = self
            .repository
            .get_refund(refund_id)
            .await?
            .ok_or(PaymentError::RefundNotFound(refund_id))?;
        let transaction = self.load_payment(refund.original_payment_id).await?;

        if refund.status != RefundStatus::Pending {
            return Ok(RefundResult {
                refund,
                payment_status: transaction.status,
            });
        }

        let gateway = self.gateways.get(&transaction.channel_code)?;
        let response = gateway
            .query_refund(&transaction.transaction_no(), &refund.refund_no())
            .await?;

        let mut update = RefundUpdate::new(refund_id, response.status);
        update.gateway_refund_id = response.gateway_refund_id;
        if matches!(response.status, RefundStatus::Failed | RefundStatus::Closed) {
            update.failure_reason = Some(format!("渠道退款状态 {}", response.status));
        }
        self.finish_refund(&transaction, update).await
    }

    /// 主动查询渠道并落定 PENDING 流水，与回调走同一条件更新
    pub async fn query_payment(&self, payment_id: u64) -> Result<PaymentTransaction, PaymentError> {
        let transaction = self.load_payment(payment_id).await?;
        if transaction.status.is_terminal() {
            return Ok(transaction);
        }

        let gateway = self.gateways.get(&transaction.channel_code)?;
        let response = gateway.query(&transaction.transaction_no()).await?;

        if let Some(target) = response.status.target_status() {
            if let Some(amount) = response.amount {
                if amount != transaction.amount {
                    return Err(PaymentError::InvalidAmount {
                        expected: transaction.amount,
                        actual: amount,
                    });
                }
            }
            self.transition(
                &transaction,
                target,
                response.gateway_transaction_id,
                Some(response.raw),
            )
            .await?;
        }

        self.load_payment(payment_id).await
    }

    /// 超时关单，仅 PENDING 可关闭
    pub async fn close_payment(&self, payment_id: u64) -> Result<PaymentTransaction, PaymentError> {
        let transaction = self.load_payment(payment_id).await?;
        if transaction.status.is_terminal()
            || !self
                .transition(&transaction, TransactionStatus::Closed, None, None)
                .await?
        {
            let current = self.load_payment(payment_id).await?;
            return Err(PaymentError::AlreadyProcessed {
                payment_id,
                status: current.status,
            });
        }

        self.load_payment(payment_id).await
    }

    pub async fn get_payment(&self, payment_id: u64) -> Result<PaymentTransaction, PaymentError> {
        self.load_payment(payment_id).await
    }

    pub async fn list_payments(
        &self,
        filter: &TransactionFilter,
    ) -> Result<(Vec<PaymentTransaction>, u64), PaymentError> {
        self.repository.list_payments(filter).await
    }

    pub async fn get_refund(&self, refund_id: u64) -> Result<RefundTransaction, PaymentError> {
        self.repository
            .get_refund(refund_id)
            .await?
            .ok_or(PaymentError::RefundNotFound(refund_id))
    }

    pub async fn list_refunds(&self, payment_id: u64) -> Result<Vec<RefundTransaction>, PaymentError> {
        self.repository.list_refunds(payment_id).await
    }

    async fn load_payment(&self, payment_id: u64) -> Result<PaymentTransaction, PaymentError> {
        self.repository
            .get_by_payment_id(payment_id)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(payment_id.to_string()))
    }

    /// PENDING -> target。成功时同一原子写入 PAID 通知任务，随后尽力立即投递
    async fn transition(
        &self,
        transaction: &PaymentTransaction,
        target: TransactionStatus,
        gateway_transaction_id: Option<String>,
        raw: Option<String>,
    ) -> Result<bool, PaymentError> {
        let mut update = StatusUpdate::from_pending(transaction.payment_id, target)
            .with_gateway(gateway_transaction_id, raw);

        let task_id = if target == TransactionStatus::Success {
            let task = NotificationTask::new(
                self.id_generator.generate(),
                transaction.payment_id,
                transaction.order_id,
                OrderStatus::Paid,
            );
            let id = task.id;
            update = update.with_notification(task);
            Some(id)
        } else {
            None
        };

        if !self.repository.update_status(&update).await? {
            info!(
                payment_id = transaction.payment_id,
                "Payment already processed, transition skipped"
            );
            return Ok(false);
        }

        info!(
            payment_id = transaction.payment_id,
            order_id = transaction.order_id,
            from = %transaction.status,
            to = %target,
            "Payment status transitioned"
        );

        if let Some(task_id) = task_id {
            self.notify(task_id, transaction).await;
        }
        Ok(true)
    }

    async fn finish_refund(
        &self,
        transaction: &PaymentTransaction,
        update: RefundUpdate,
    ) -> Result<RefundResult, PaymentError> {
        let refund_id = update.refund_id;
        let status = update.new_status;

        if self.repository.update_refund_status(&update).await? && status != RefundStatus::Pending {
            info!(
                payment_id = transaction.payment_id,
                refund_id,
                status = %status,
                "Refund finalized"
            );
        }

        if status == RefundStatus::Success {
            self.mark_refunded_if_complete(transaction).await?;
        }

        let refund = self.get_refund(refund_id).await?;
        let payment_status = self.load_payment(transaction.payment_id).await?.status;
        Ok(RefundResult {
            refund,
            payment_status,
        })
    }

    /// 成功退款合计等于原金额时 SUCCESS -> REFUNDED
    async fn mark_refunded_if_complete(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<(), PaymentError> {
        let refunds = self.repository.list_refunds(transaction.payment_id).await?;
        let mut refunded = Money::new(0, transaction.currency);
        for refund in refunds.iter().filter(|r| r.status == RefundStatus::Success) {
            refunded = refunded.checked_add(&Money::new(refund.refund_amount, transaction.currency))?;
        }

        if refunded.amount < transaction.amount {
            return Ok(());
        }

        let task = NotificationTask::new(
            self.id_generator.generate(),
            transaction.payment_id,
            transaction.order_id,
            OrderStatus::Refunded,
        );
        let task_id = task.id;

        if self
            .repository
            .mark_refunded(transaction.payment_id, Some(task))
            .await?
        {
            info!(
                payment_id = transaction.payment_id,
                order_id = transaction.order_id,
                from = %TransactionStatus::Success,
                to = %TransactionStatus::Refunded,
                "Payment status transitioned"
            );
            self.notify(task_id, transaction).await;
        }
        Ok(())
    }

    /// 通知失败只记录日志，由后台任务重试
    async fn notify(&self, task_id: u64, transaction: &PaymentTransaction) {
        if let Err(e) = self.notifier.deliver(task_id).await {
            error!(
                task_id,
                payment_id = transaction.payment_id,
                order_id = transaction.order_id,
                error = %e,
                "Failed to dispatch order notification"
            );
        }
    }
}
