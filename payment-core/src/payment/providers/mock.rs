use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::MockSettings;
use crate::error::GatewayError;
use crate::models::enums::{ChannelType, GatewayTradeStatus, RefundStatus};
use crate::models::payment::{
    CallbackNotification, PaymentRequest, PaymentResponse, QueryResponse, RefundQueryResponse,
    RefundRequest, RefundResponse,
};
use crate::payment::gateway::{CallbackParams, GatewayAdapter};
use crate::signer::{MockSigner, Signer};

/// 模拟渠道的行为
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed,
    Reject { code: String, message: String },
    Unavailable,
}

impl MockBehavior {
    pub fn from_settings(settings: &MockSettings) -> Result<Self, GatewayError> {
        match settings.behavior.to_lowercase().as_str() {
            "succeed" => Ok(Self::Succeed),
            "reject" => Ok(Self::Reject {
                code: settings
                    .reject_code
                    .clone()
                    .unwrap_or_else(|| "card_declined".to_string()),
                message: settings
                    .reject_message
                    .clone()
                    .unwrap_or_else(|| "Your card was declined".to_string()),
            }),
            "unavailable" => Ok(Self::Unavailable),
            other => Err(GatewayError::Configuration(format!(
                "Unknown mock behavior: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct MockTrade {
    amount: i64,
    status: GatewayTradeStatus,
    gateway_transaction_id: String,
}

#[derive(Debug, Clone)]
struct MockRefund {
    order_no: String,
    amount: i64,
    status: RefundStatus,
    gateway_refund_id: String,
}

#[derive(Debug, Default)]
struct TradeBook {
    trades: HashMap<String, MockTrade>,
    refunds: HashMap<String, MockRefund>,
}

/// 模拟渠道(类 Stripe): 确定性的支付链接，HMAC 签名的 JSON 回调
pub struct MockGateway {
    base_url: String,
    signer: MockSigner,
    behavior: Mutex<MockBehavior>,
    book: Mutex<TradeBook>,
}

impl MockGateway {
    pub fn new(settings: &MockSettings) -> Result<Self, GatewayError> {
        Ok(Self::with_behavior(
            &settings.secret,
            &settings.base_url,
            MockBehavior::from_settings(settings)?,
        ))
    }

    pub fn with_behavior(secret: &str, base_url: &str, behavior: MockBehavior) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            signer: MockSigner::new(secret),
            behavior: Mutex::new(behavior),
            book: Mutex::new(TradeBook::default()),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        if let Ok(mut current) = self.behavior.lock() {
            *current = behavior;
        }
    }

    fn check_behavior(&self) -> Result<(), GatewayError> {
        let behavior = self
            .behavior
            .lock()
            .map_err(|_| GatewayError::Network("mock gateway poisoned".to_string()))?
            .clone();

        match behavior {
            MockBehavior::Succeed => Ok(()),
            MockBehavior::Reject { code, message } => Err(GatewayError::Rejected { code, message }),
            MockBehavior::Unavailable => {
                Err(GatewayError::Network("mock gateway unavailable".to_string()))
            }
        }
    }

    fn book(&self) -> Result<std::sync::MutexGuard<'_, TradeBook>, GatewayError> {
        self.book
            .lock()
            .map_err(|_| GatewayError::Network("mock trade book poisoned".to_string()))
    }

    /// 模拟用户完成(或放弃)支付，返回交易当前状态
    pub fn settle(&self, order_no: &str, status: GatewayTradeStatus) -> Option<GatewayTradeStatus> {
        let mut book = self.book.lock().ok()?;
        let trade = book.trades.get_mut(order_no)?;
        if trade.status == GatewayTradeStatus::Pending {
            trade.status = status;
        }
        Some(trade.status)
    }

    /// 按交易簿生成一条已签名的回调报文
    pub fn signed_callback(&self, order_no: &str) -> Result<String, GatewayError> {
        let trade = self
            .book()?
            .trades
            .get(order_no)
            .cloned()
            .ok_or_else(|| GatewayError::rejected("resource_missing", order_no))?;

        self.sign_callback(
            order_no,
            &trade.gateway_transaction_id,
            trade.status,
            trade.amount,
        )
    }

    /// 生成任意内容的已签名回调报文
    pub fn sign_callback(
        &self,
        order_no: &str,
        gateway_transaction_id: &str,
        status: GatewayTradeStatus,
        amount: i64,
    ) -> Result<String, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("transaction_no".to_string(), order_no.to_string());
        params.insert("id".to_string(), gateway_transaction_id.to_string());
        params.insert("status".to_string(), status_to_wire(status).to_string());
        params.insert("amount".to_string(), amount.to_string());
        let sign = self.signer.sign(&params)?;
        params.insert("sign".to_string(), sign);

        serde_json::to_string(&params).map_err(|e| GatewayError::ResponseParse(e.to_string()))
    }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Mock
    }

    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentResponse, GatewayError> {
        info!(order_no = %request.order_no, "Creating mock payment");
        self.check_behavior()?;

        let gateway_transaction_id = format!("mock_tx_{}", request.order_no);
        self.book()?.trades.insert(
            request.order_no.clone(),
            MockTrade {
                amount: request.amount,
                status: GatewayTradeStatus::Pending,
                gateway_transaction_id: gateway_transaction_id.clone(),
            },
        );

        let payment_url = format!("{}/pay/{}", self.base_url, request.order_no);
        let raw = json!({
            "id": gateway_transaction_id,
            "url": payment_url,
            "amount": request.amount,
            "currency": request.currency,
        })
        .to_string();

        Ok(PaymentResponse {
            payment_url: Some(payment_url),
            qr_code: Some(format!("{}/qr/{}", self.base_url, request.order_no)),
            transaction_id: Some(gateway_transaction_id),
            raw,
            ..Default::default()
        })
    }

    async fn query(&self, order_no: &str) -> Result<QueryResponse, GatewayError> {
        self.check_behavior()?;

        let trade = self
            .book()?
            .trades
            .get(order_no)
            .cloned()
            .ok_or_else(|| GatewayError::rejected("resource_missing", format!("No such payment: {}", order_no)))?;

        Ok(QueryResponse {
            status: trade.status,
            gateway_transaction_id: Some(trade.gateway_transaction_id.clone()),
            amount: Some(trade.amount),
            raw: json!({
                "id": trade.gateway_transaction_id,
                "status": status_to_wire(trade.status),
                "amount": trade.amount,
            })
            .to_string(),
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse, GatewayError> {
        info!(order_no = %request.order_no, refund_no = %request.refund_no, "Creating mock refund");
        self.check_behavior()?;

        let mut book = self.book()?;
        let trade = book
            .trades
            .get(&request.order_no)
            .cloned()
            .ok_or_else(|| GatewayError::rejected("resource_missing", request.order_no.clone()))?;

        if trade.status != GatewayTradeStatus::Success {
            return Err(GatewayError::rejected("charge_not_paid", "Charge has not succeeded"));
        }

        let refunded: i64 = book
            .refunds
            .values()
            .filter(|r| r.order_no == request.order_no && r.status != RefundStatus::Failed)
            .map(|r| r.amount)
            .sum();
        if refunded + request.refund_amount > trade.amount {
            return Err(GatewayError::rejected(
                "amount_too_large",
                "Refund amount is greater than unrefunded amount",
            ));
        }

        let refund = MockRefund {
            order_no: request.order_no.clone(),
            amount: request.refund_amount,
            status: RefundStatus::Success,
            gateway_refund_id: format!("mock_rf_{}", request.refund_no),
        };
        book.refunds.insert(request.refund_no.clone(), refund.clone());

        Ok(RefundResponse {
            gateway_refund_id: Some(refund.gateway_refund_id.clone()),
            status: refund.status,
            raw: json!({ "id": refund.gateway_refund_id, "status": "succeeded" }).to_string(),
        })
    }

    async fn query_refund(
        &self,
        order_no: &str,
        refund_no: &str,
    ) -> Result<RefundQueryResponse, GatewayError> {
        self.check_behavior()?;

        let refund = self
            .book()?
            .refunds
            .get(refund_no)
            .filter(|r| r.order_no == order_no)
            .cloned()
            .ok_or_else(|| GatewayError::rejected("resource_missing", format!("No such refund: {}", refund_no)))?;

        Ok(RefundQueryResponse {
            status: refund.status,
            gateway_refund_id: Some(refund.gateway_refund_id.clone()),
            refund_amount: Some(refund.amount),
            raw: json!({ "id": refund.gateway_refund_id, "amount": refund.amount }).to_string(),
        })
    }

    fn parse_callback(&self, raw: &str) -> Result<CallbackParams, GatewayError> {
        let body: serde_json::Map<String, Value> =
            serde_json::from_str(raw).map_err(|e| GatewayError::ResponseParse(e.to_string()))?;

        Ok(body
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect())
    }

    fn verify_callback(&self, params: &CallbackParams) -> Result<bool, GatewayError> {
        let valid = self.signer.verify(params)?;
        if !valid {
            warn!(
                transaction_no = params.get("transaction_no").map(String::as_str).unwrap_or(""),
                "Mock callback signature validation failed"
            );
        }
        Ok(valid)
    }

    fn interpret_callback(
        &self,
        params: &CallbackParams,
        raw: &str,
    ) -> Result<CallbackNotification, GatewayError> {
        let transaction_no = params
            .get("transaction_no")
            .cloned()
            .ok_or_else(|| GatewayError::ResponseParse("Missing transaction_no".to_string()))?;

        let status = match params.get("status").map(String::as_str) {
            Some("succeeded") => GatewayTradeStatus::Success,
            Some("failed") => GatewayTradeStatus::Failed,
            Some("canceled") => GatewayTradeStatus::Closed,
            Some("pending") => GatewayTradeStatus::Pending,
            other => {
                return Err(GatewayError::ResponseParse(format!(
                    "Unknown status: {:?}",
                    other
                )));
            }
        };

        let amount = match params.get("amount") {
            Some(value) => Some(
                value
                    .parse::<i64>()
                    .map_err(|_| GatewayError::ResponseParse(format!("Invalid amount: {}", value)))?,
            ),
            None => None,
        };

        Ok(CallbackNotification {
            transaction_no,
            gateway_transaction_id: params.get("id").cloned(),
            status,
            amount,
            raw: raw.to_string(),
        })
    }

    fn ack(&self, success: bool, message: &str) -> String {
        if success {
            json!({ "received": true }).to_string()
        } else {
            json!({ "received": false, "error": message }).to_string()
        }
    }
}

fn status_to_wire(status: GatewayTradeStatus) -> &'static str {
    match status {
        GatewayTradeStatus::Success => "succeeded",
        GatewayTradeStatus::Failed => "failed",
        GatewayTradeStatus::Closed => "canceled",
        GatewayTradeStatus::Pending => "pending",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use crate::models::enums::PaymentMethod;

    fn gateway() -> MockGateway {
        MockGateway::with_behavior("mock_secret", "https://mock-pay.local/", MockBehavior::Succeed)
    }

    fn pay_request(order_no: &str, amount: i64) -> PaymentRequest {
        PaymentRequest {
            order_no: order_no.to_string(),
            amount,
            currency: Currency::CNY,
            subject: "test".to_string(),
            client_ip: None,
            return_url: None,
            notify_url: None,
            method: PaymentMethod::Mock,
            open_id: None,
        }
    }

    fn refund_request(order_no: &str, refund_no: &str, amount: i64) -> RefundRequest {
        RefundRequest {
            order_no: order_no.to_string(),
            refund_no: refund_no.to_string(),
            original_amount: 5000,
            refund_amount: amount,
            currency: Currency::CNY,
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_deterministic_urls() {
        let gateway = gateway();
        let response = gateway.pay(&pay_request("7000001", 5000)).await.unwrap();
        assert_eq!(
            response.payment_url.as_deref(),
            Some("https://mock-pay.local/pay/7000001")
        );
        assert_eq!(response.transaction_id.as_deref(), Some("mock_tx_7000001"));
    }

    #[tokio::test]
    async fn test_behaviors() {
        let gateway = gateway();

        gateway.set_behavior(MockBehavior::Unavailable);
        let err = gateway.pay(&pay_request("1", 100)).await.unwrap_err();
        assert!(err.is_retryable());

        gateway.set_behavior(MockBehavior::Reject {
            code: "card_declined".to_string(),
            message: "declined".to_string(),
        });
        let err = gateway.pay(&pay_request("1", 100)).await.unwrap_err();
        assert_eq!(err, GatewayError::rejected("card_declined", "declined"));
    }

    #[tokio::test]
    async fn test_trade_book_backs_query_and_refund() {
        let gateway = gateway();
        gateway.pay(&pay_request("7000001", 5000)).await.unwrap();

        // 未支付不允许退款
        assert!(gateway.refund(&refund_request("7000001", "r1", 100)).await.is_err());

        assert_eq!(
            gateway.settle("7000001", GatewayTradeStatus::Success),
            Some(GatewayTradeStatus::Success)
        );
        let query = gateway.query("7000001").await.unwrap();
        assert_eq!(query.status, GatewayTradeStatus::Success);
        assert_eq!(query.amount, Some(5000));

        let refund = gateway.refund(&refund_request("7000001", "r1", 3000)).await.unwrap();
        assert_eq!(refund.status, RefundStatus::Success);

        let err = gateway.refund(&refund_request("7000001", "r2", 3000)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected { ref code, .. } if code == "amount_too_large"));

        let queried = gateway.query_refund("7000001", "r1").await.unwrap();
        assert_eq!(queried.refund_amount, Some(3000));
    }

    #[tokio::test]
    async fn test_signed_callback_round_trip() {
        let gateway = gateway();
        gateway.pay(&pay_request("7000001", 5000)).await.unwrap();
        gateway.settle("7000001", GatewayTradeStatus::Success);

        let raw = gateway.signed_callback("7000001").unwrap();
        let params = gateway.parse_callback(&raw).unwrap();
        assert!(gateway.verify_callback(&params).unwrap());

        let notification = gateway.interpret_callback(&params, &raw).unwrap();
        assert_eq!(notification.transaction_no, "7000001");
        assert_eq!(notification.status, GatewayTradeStatus::Success);
        assert_eq!(notification.amount, Some(5000));

        let tampered = raw.replace("\"5000\"", "\"1\"");
        let params = gateway.parse_callback(&tampered).unwrap();
        assert!(!gateway.verify_callback(&params).unwrap());
    }
}
