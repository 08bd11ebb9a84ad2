use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::config::OrderServiceConfig;
use crate::error::PaymentError;
use crate::models::enums::OrderStatus;
use crate::models::payment::OrderInfo;

/// 订单服务
#[async_trait]
pub trait OrderClient: Send + Sync {
    /// 订单不存在时返回 None
    async fn get_order(&self, order_id: u64) -> Result<Option<OrderInfo>, PaymentError>;

    /// 幂等，重复通知同一状态由订单服务自行去重
    async fn update_order_status(&self, order_id: u64, status: OrderStatus) -> Result<(), PaymentError>;
}

#[derive(Serialize)]
struct UpdateStatusBody {
    status: OrderStatus,
}

/// 基于 REST 的订单服务客户端
///
/// - `GET  {base_url}/orders/{order_id}`
/// - `PUT  {base_url}/orders/{order_id}/status`
pub struct HttpOrderClient {
    client: Client,
    base_url: Url,
}

impl HttpOrderClient {
    pub fn new(config: &OrderServiceConfig) -> Result<Self, PaymentError> {
        // 保证 join 时不丢掉 base_url 的路径部分
        let raw = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let base_url = Url::parse(&raw)
            .map_err(|e| PaymentError::Configuration(format!("订单服务地址无效: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| PaymentError::Configuration(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, PaymentError> {
        self.base_url
            .join(path)
            .map_err(|e| PaymentError::Internal(format!("拼接订单服务地址失败: {}", e)))
    }
}

fn service_error(err: reqwest::Error) -> PaymentError {
    PaymentError::OrderService(err.to_string())
}

#[async_trait]
impl OrderClient for HttpOrderClient {
    async fn get_order(&self, order_id: u64) -> Result<Option<OrderInfo>, PaymentError> {
        let url = self.url(&format!("orders/{}", order_id))?;
        let response = self.client.get(url).send().await.map_err(service_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let order = response.json::<OrderInfo>().await.map_err(service_error)?;
                Ok(Some(order))
            }
            status => Err(PaymentError::OrderService(format!(
                "查询订单 {} 失败: HTTP {}",
                order_id, status
            ))),
        }
    }

    async fn update_order_status(&self, order_id: u64, status: OrderStatus) -> Result<(), PaymentError> {
        let url = self.url(&format!("orders/{}/status", order_id))?;
        let response = self
            .client
            .put(url)
            .json(&UpdateStatusBody { status })
            .send()
            .await
            .map_err(service_error)?;

        if !response.status().is_success() {
            return Err(PaymentError::OrderService(format!(
                "更新订单 {} 状态失败: HTTP {}",
                order_id,
                response.status()
            )));
        }

        info!(order_id, status = %status, "Order status updated");
        Ok(())
    }
}
