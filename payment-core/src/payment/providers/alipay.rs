use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::AlipaySettings;
use crate::domain::money::{Currency, Money};
use crate::error::GatewayError;
use crate::models::enums::{ChannelType, GatewayTradeStatus, PaymentMethod, RefundStatus};
use crate::models::payment::{
    CallbackNotification, PaymentRequest, PaymentResponse, QueryResponse, RefundQueryResponse,
    RefundRequest, RefundResponse,
};
use crate::payment::gateway::{CallbackParams, GatewayAdapter};
use crate::payment::http_client::{GatewayHttpClient, HttpClientConfig};
use crate::signer::{AlipaySignType, AlipaySigner, Signer};

/// 接口调用成功的网关返回码
const SUCCESS_CODE: &str = "10000";

pub struct AlipayGateway {
    app_id: String,
    gateway_url: String,
    notify_url: String,
    return_url: Option<String>,
    signer: AlipaySigner,
    client: GatewayHttpClient,
}

impl AlipayGateway {
    pub fn new(settings: &AlipaySettings) -> Result<Self, GatewayError> {
        let sign_type = match settings.sign_type.to_uppercase().as_str() {
            "RSA2" => AlipaySignType::Rsa2,
            "RSA" => AlipaySignType::Rsa,
            other => {
                return Err(GatewayError::Configuration(format!(
                    "Unsupported Alipay sign_type: {}",
                    other
                )));
            }
        };

        let signer = AlipaySigner::new(&settings.private_key, &settings.alipay_public_key, sign_type)?;
        let client = GatewayHttpClient::new(&HttpClientConfig::with_timeout(settings.timeout_secs))?;

        Ok(Self {
            app_id: settings.app_id.clone(),
            gateway_url: settings.gateway_url.clone(),
            notify_url: settings.notify_url.clone(),
            return_url: settings.return_url.clone(),
            signer,
            client,
        })
    }

    // 构建公共请求参数
    fn build_common_params(&self, method: &str) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("app_id".to_string(), self.app_id.clone());
        params.insert("method".to_string(), method.to_string());
        params.insert("format".to_string(), "JSON".to_string());
        params.insert("charset".to_string(), "utf-8".to_string());
        params.insert("sign_type".to_string(), self.signer.sign_type().as_str().to_string());
        params.insert("timestamp".to_string(), beijing_timestamp());
        params.insert("version".to_string(), "1.0".to_string());
        params
    }

    fn signed_params(
        &self,
        method: &str,
        biz_content: &Value,
        notify_url: Option<&str>,
        return_url: Option<&str>,
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let mut params = self.build_common_params(method);
        params.insert("biz_content".to_string(), biz_content.to_string());
        if let Some(url) = notify_url {
            params.insert("notify_url".to_string(), url.to_string());
        }
        if let Some(url) = return_url {
            params.insert("return_url".to_string(), url.to_string());
        }

        let sign = self.signer.sign(&params)?;
        params.insert("sign".to_string(), sign);
        Ok(params)
    }

    fn encode(params: &BTreeMap<String, String>) -> Result<String, GatewayError> {
        serde_urlencoded::to_string(params)
            .map_err(|e| GatewayError::ResponseParse(format!("Failed to encode params: {}", e)))
    }

    /// 服务端接口调用，返回 `<method>_response` 节点
    async fn execute(&self, method: &str, biz_content: Value) -> Result<(Value, String), GatewayError> {
        self.execute_with_notify(method, biz_content, None).await
    }

    async fn execute_with_notify(
        &self,
        method: &str,
        biz_content: Value,
        notify_url: Option<&str>,
    ) -> Result<(Value, String), GatewayError> {
        let params = self.signed_params(method, &biz_content, notify_url, None)?;
        let raw = self.client.post_form(&self.gateway_url, &params).await?;

        let response: Value = serde_json::from_str(&raw)
            .map_err(|e| GatewayError::ResponseParse(e.to_string()))?;

        let response_key = format!("{}_response", method.replace('.', "_"));
        let data = response
            .get(&response_key)
            .cloned()
            .ok_or_else(|| {
                GatewayError::ResponseParse(format!("Response does not contain {}", response_key))
            })?;

        let code = data["code"].as_str().unwrap_or("");
        if code != SUCCESS_CODE {
            let err_code = data["sub_code"].as_str().unwrap_or(code);
            let err_msg = data["sub_msg"]
                .as_str()
                .or_else(|| data["msg"].as_str())
                .unwrap_or("Unknown error");
            return Err(GatewayError::rejected(err_code, err_msg));
        }

        Ok((data, raw))
    }

    fn ensure_cny(currency: Currency) -> Result<(), GatewayError> {
        if currency != Currency::CNY {
            return Err(GatewayError::Unsupported(format!(
                "Alipay only settles CNY, got {}",
                currency
            )));
        }
        Ok(())
    }

    // 下单与退款都只接受人民币，回调与查询中的金额同样按人民币解析
    fn parse_amount(value: &str) -> Result<i64, GatewayError> {
        Money::from_major_str(value, Currency::CNY)
            .map(|m| m.amount)
            .map_err(|e| GatewayError::ResponseParse(e.to_string()))
    }
}

#[async_trait]
impl GatewayAdapter for AlipayGateway {
    fn name(&self) -> &'static str {
        "alipay"
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Alipay
    }

    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentResponse, GatewayError> {
        info!(order_no = %request.order_no, method = %request.method, "Creating Alipay payment");
        Self::ensure_cny(request.currency)?;

        let total_amount = Money::new(request.amount, request.currency).to_major_string();
        let notify_url = request.notify_url.as_deref().unwrap_or(&self.notify_url);
        let return_url = request.return_url.as_deref().or(self.return_url.as_deref());

        let (method, product_code) = match request.method {
            PaymentMethod::AlipayPage => ("alipay.trade.page.pay", "FAST_INSTANT_TRADE_PAY"),
            PaymentMethod::AlipayWap => ("alipay.trade.wap.pay", "QUICK_WAP_WAY"),
            PaymentMethod::AlipayApp => ("alipay.trade.app.pay", "QUICK_MSECURITY_PAY"),
            PaymentMethod::AlipayQr => ("alipay.trade.precreate", "FACE_TO_FACE_PAYMENT"),
            other => {
                return Err(GatewayError::Unsupported(format!(
                    "Unsupported payment method: {} for Alipay",
                    other
                )));
            }
        };

        let biz_content = json!({
            "out_trade_no": request.order_no,
            "total_amount": total_amount,
            "subject": request.subject,
            "product_code": product_code,
        });

        match request.method {
            PaymentMethod::AlipayPage | PaymentMethod::AlipayWap => {
                let params = self.signed_params(method, &biz_content, Some(notify_url), return_url)?;
                let query = Self::encode(&params)?;
                Ok(PaymentResponse {
                    payment_url: Some(format!("{}?{}", self.gateway_url, query)),
                    raw: query,
                    ..Default::default()
                })
            }
            PaymentMethod::AlipayApp => {
                let params = self.signed_params(method, &biz_content, Some(notify_url), None)?;
                let order_string = Self::encode(&params)?;
                Ok(PaymentResponse {
                    app_params: Some(json!({ "order_string": order_string })),
                    raw: order_string,
                    ..Default::default()
                })
            }
            _ => {
                let (data, raw) = self
                    .execute_with_notify(method, biz_content, Some(notify_url))
                    .await?;
                let qr_code = data["qr_code"]
                    .as_str()
                    .ok_or_else(|| GatewayError::ResponseParse("Missing qr_code".to_string()))?;
                Ok(PaymentResponse {
                    qr_code: Some(qr_code.to_string()),
                    raw,
                    ..Default::default()
                })
            }
        }
    }

    async fn query(&self, order_no: &str) -> Result<QueryResponse, GatewayError> {
        info!(order_no = %order_no, "Querying Alipay payment status");

        let (data, raw) = self
            .execute("alipay.trade.query", json!({ "out_trade_no": order_no }))
            .await?;

        let status = map_trade_status(data["trade_status"].as_str().unwrap_or(""));
        let amount = match data["total_amount"].as_str() {
            Some(value) => Some(Self::parse_amount(value)?),
            None => None,
        };

        Ok(QueryResponse {
            status,
            gateway_transaction_id: data["trade_no"].as_str().map(|s| s.to_string()),
            amount,
            raw,
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse, GatewayError> {
        info!(
            order_no = %request.order_no,
            refund_no = %request.refund_no,
            "Creating Alipay refund"
        );
        Self::ensure_cny(request.currency)?;

        let mut biz_content = json!({
            "out_trade_no": request.order_no,
            "refund_amount": Money::new(request.refund_amount, request.currency).to_major_string(),
            "out_request_no": request.refund_no,
        });
        if let Some(reason) = &request.reason {
            biz_content["refund_reason"] = Value::String(reason.clone());
        }

        let (data, raw) = self.execute("alipay.trade.refund", biz_content).await?;

        // fund_change=Y 表示本次退款已发生资金变化
        let status = match data["fund_change"].as_str() {
            Some("Y") => RefundStatus::Success,
            _ => RefundStatus::Pending,
        };

        Ok(RefundResponse {
            gateway_refund_id: data["trade_no"].as_str().map(|s| s.to_string()),
            status,
            raw,
        })
    }

    async fn query_refund(
        &self,
        order_no: &str,
        refund_no: &str,
    ) -> Result<RefundQueryResponse, GatewayError> {
        info!(order_no = %order_no, refund_no = %refund_no, "Querying Alipay refund status");

        let (data, raw) = self
            .execute(
                "alipay.trade.fastpay.refund.query",
                json!({ "out_trade_no": order_no, "out_request_no": refund_no }),
            )
            .await?;

        let status = match data["refund_status"].as_str() {
            Some("REFUND_SUCCESS") => RefundStatus::Success,
            _ => RefundStatus::Pending,
        };
        let refund_amount = match data["refund_amount"].as_str() {
            Some(value) => Some(Self::parse_amount(value)?),
            None => None,
        };

        Ok(RefundQueryResponse {
            status,
            gateway_refund_id: data["trade_no"].as_str().map(|s| s.to_string()),
            refund_amount,
            raw,
        })
    }

    fn parse_callback(&self, raw: &str) -> Result<CallbackParams, GatewayError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw.trim())
            .map_err(|e| GatewayError::ResponseParse(e.to_string()))?;
        Ok(pairs.into_iter().collect())
    }

    fn verify_callback(&self, params: &CallbackParams) -> Result<bool, GatewayError> {
        let valid = self.signer.verify(params)?;
        if !valid {
            warn!(
                out_trade_no = params.get("out_trade_no").map(String::as_str).unwrap_or(""),
                "Alipay notification signature validation failed"
            );
        }
        Ok(valid)
    }

    fn interpret_callback(
        &self,
        params: &CallbackParams,
        raw: &str,
    ) -> Result<CallbackNotification, GatewayError> {
        let app_id = params
            .get("app_id")
            .ok_or_else(|| GatewayError::ResponseParse("Missing app_id".to_string()))?;
        if app_id != &self.app_id {
            return Err(GatewayError::rejected("APP_ID_MISMATCH", "App ID mismatch"));
        }

        let transaction_no = params
            .get("out_trade_no")
            .cloned()
            .ok_or_else(|| GatewayError::ResponseParse("Missing out_trade_no".to_string()))?;

        let trade_status = params
            .get("trade_status")
            .ok_or_else(|| GatewayError::ResponseParse("Missing trade_status".to_string()))?;

        let amount = match params.get("total_amount") {
            Some(value) => Some(Self::parse_amount(value)?),
            None => None,
        };

        Ok(CallbackNotification {
            transaction_no,
            gateway_transaction_id: params.get("trade_no").cloned(),
            status: map_trade_status(trade_status),
            amount,
            raw: raw.to_string(),
        })
    }

    fn ack(&self, success: bool, _message: &str) -> String {
        if success { "success" } else { "fail" }.to_string()
    }
}

fn map_trade_status(trade_status: &str) -> GatewayTradeStatus {
    match trade_status {
        "TRADE_SUCCESS" | "TRADE_FINISHED" => GatewayTradeStatus::Success,
        // 超时未付款关闭，或支付完成后全额退款
        "TRADE_CLOSED" => GatewayTradeStatus::Closed,
        _ => GatewayTradeStatus::Pending,
    }
}

// 支付宝要求 GMT+8 的请求时间
fn beijing_timestamp() -> String {
    let now = Utc::now();
    match FixedOffset::east_opt(8 * 3600) {
        Some(offset) => now.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => now.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}
