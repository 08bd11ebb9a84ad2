#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use mockall::predicate::eq;
use rust_decimal::Decimal;

use payment_core::config::{NotificationConfig, RouterConfig};
use payment_core::domain::money::Currency;
use payment_core::id_generator::SequenceIdGenerator;
use payment_core::models::enums::{ChannelType, OrderStatus, PaymentMethod};
use payment_core::models::payment::{ChannelConfig, CreatePaymentCommand, OrderInfo};
use payment_core::notify::OrderNotifier;
use payment_core::order_client::OrderClient;
use payment_core::payment::GatewayRegistry;
use payment_core::repository::InMemoryRepository;
use payment_core::routing::{ChannelRouter, StaticSuccessRates};
use payment_core::{PaymentError, TransactionManager};

pub const ORDER_ID: u64 = 1001;
pub const USER_ID: u64 = 42;

mockall::mock! {
    pub Orders {}

    #[async_trait]
    impl OrderClient for Orders {
        async fn get_order(&self, order_id: u64) -> Result<Option<OrderInfo>, PaymentError>;
        async fn update_order_status(&self, order_id: u64, status: OrderStatus) -> Result<(), PaymentError>;
    }
}

pub struct Stack {
    pub manager: TransactionManager,
    pub repo: Arc<InMemoryRepository>,
    pub notifier: Arc<OrderNotifier>,
}

pub fn order(total_amount: i64) -> OrderInfo {
    OrderInfo {
        order_id: ORDER_ID,
        user_id: USER_ID,
        total_amount,
        currency: Currency::CNY,
        status: OrderStatus::Created,
    }
}

/// 订单金额固定，状态通知恰好 `notifications` 次
pub fn orders_with(total_amount: i64, notifications: usize) -> MockOrders {
    let mut orders = MockOrders::new();
    orders
        .expect_get_order()
        .with(eq(ORDER_ID))
        .returning(move |_| Ok(Some(order(total_amount))));
    orders
        .expect_update_order_status()
        .times(notifications)
        .returning(|_, _| Ok(()));
    orders
}

pub fn channel(code: &str, channel_type: ChannelType, priority: i32, rate_percent: Decimal) -> ChannelConfig {
    ChannelConfig {
        code: code.to_string(),
        enabled: true,
        priority,
        rate_percent,
        channel_type,
    }
}

pub fn stack(gateways: GatewayRegistry, channels: Vec<ChannelConfig>, orders: MockOrders) -> Stack {
    stack_with(
        gateways,
        channels,
        orders,
        &RouterConfig::default(),
        &NotificationConfig::default(),
    )
}

pub fn stack_with(
    gateways: GatewayRegistry,
    channels: Vec<ChannelConfig>,
    orders: MockOrders,
    router_config: &RouterConfig,
    notification_config: &NotificationConfig,
) -> Stack {
    let repo = Arc::new(InMemoryRepository::new());
    let orders: Arc<dyn OrderClient> = Arc::new(orders);
    let notifier = Arc::new(OrderNotifier::new(
        repo.clone(),
        orders.clone(),
        notification_config,
    ));
    let router = Arc::new(ChannelRouter::with_defaults(
        router_config,
        Arc::new(StaticSuccessRates::new()),
    ));

    let manager = TransactionManager::new(
        router,
        channels,
        gateways,
        repo.clone(),
        orders,
        Arc::new(SequenceIdGenerator::new()),
        notifier.clone(),
    );

    Stack {
        manager,
        repo,
        notifier,
    }
}

pub fn command(amount: i64, payment_method: PaymentMethod) -> CreatePaymentCommand {
    CreatePaymentCommand {
        order_id: ORDER_ID,
        user_id: USER_ID,
        amount,
        currency: Currency::CNY,
        payment_method,
        subject: "集成测试订单".to_string(),
        client_ip: Some("10.0.0.8".to_string()),
        return_url: None,
        open_id: None,
        card_bin: None,
        platform: None,
        strategy: None,
    }
}
