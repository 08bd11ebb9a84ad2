use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{error, info, warn};

use crate::config::WechatSettings;
use crate::error::GatewayError;
use crate::models::enums::{ChannelType, GatewayTradeStatus, PaymentMethod, RefundStatus};
use crate::models::payment::{
    CallbackNotification, PaymentRequest, PaymentResponse, QueryResponse, RefundQueryResponse,
    RefundRequest, RefundResponse,
};
use crate::payment::gateway::{CallbackParams, GatewayAdapter};
use crate::payment::http_client::{GatewayHttpClient, HttpClientConfig};
use crate::signer::{Signer, WechatSignType, WechatSigner, random_string};

const NONCE_LEN: usize = 32;

/// 微信支付 API v2 适配器
pub struct WechatPayGateway {
    app_id: String,
    mch_id: String,
    gateway_url: String,
    notify_url: String,
    signer: WechatSigner,
    client: GatewayHttpClient,
    // 退款接口需要商户证书
    cert_client: Option<GatewayHttpClient>,
}

impl WechatPayGateway {
    pub fn new(settings: &WechatSettings) -> Result<Self, GatewayError> {
        let sign_type = match settings.sign_type.to_uppercase().as_str() {
            "MD5" => WechatSignType::Md5,
            "HMAC-SHA256" => WechatSignType::HmacSha256,
            other => {
                return Err(GatewayError::Configuration(format!(
                    "Unsupported Wechat sign_type: {}",
                    other
                )));
            }
        };

        let http_config = HttpClientConfig::with_timeout(settings.timeout_secs);
        let client = GatewayHttpClient::new(&http_config)?;

        let cert_client = match (&settings.cert_path, &settings.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let mut pem = std::fs::read(cert_path).map_err(|e| {
                    GatewayError::Configuration(format!("读取商户证书失败 {}: {}", cert_path, e))
                })?;
                let key = std::fs::read(key_path).map_err(|e| {
                    GatewayError::Configuration(format!("读取商户私钥失败 {}: {}", key_path, e))
                })?;
                pem.push(b'\n');
                pem.extend_from_slice(&key);
                Some(GatewayHttpClient::with_identity(&http_config, &pem)?)
            }
            _ => None,
        };

        Ok(Self {
            app_id: settings.app_id.clone(),
            mch_id: settings.mch_id.clone(),
            gateway_url: settings.gateway_url.trim_end_matches('/').to_string(),
            notify_url: settings.notify_url.clone(),
            signer: WechatSigner::new(settings.api_key.clone(), sign_type),
            client,
            cert_client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.gateway_url, path)
    }

    // 公共参数: appid、mch_id、随机串以及非默认的签名类型
    fn base_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("appid".to_string(), self.app_id.clone());
        params.insert("mch_id".to_string(), self.mch_id.clone());
        params.insert("nonce_str".to_string(), random_string(NONCE_LEN));
        if self.signer.sign_type() == WechatSignType::HmacSha256 {
            params.insert(
                "sign_type".to_string(),
                WechatSignType::HmacSha256.as_str().to_string(),
            );
        }
        params
    }

    /// 签名并发送请求，返回已校验的响应参数与原始报文
    async fn call(
        &self,
        client: &GatewayHttpClient,
        path: &str,
        mut params: BTreeMap<String, String>,
    ) -> Result<(BTreeMap<String, String>, String), GatewayError> {
        let sign = self.signer.sign(&params)?;
        params.insert("sign".to_string(), sign);

        let raw = client.post_xml(&self.endpoint(path), to_xml(&params)).await?;
        let response = from_xml(&raw)?;
        self.check_response(&response)?;

        Ok((response, raw))
    }

    fn check_response(&self, response: &BTreeMap<String, String>) -> Result<(), GatewayError> {
        let return_code = response.get("return_code").map(String::as_str).unwrap_or("FAIL");
        if return_code != "SUCCESS" {
            let msg = response.get("return_msg").cloned().unwrap_or_default();
            return Err(GatewayError::rejected(return_code, msg));
        }

        // 通信成功的响应均带签名
        if response.contains_key("sign") && !self.signer.verify(response)? {
            error!("Wechat response signature verification failed");
            return Err(GatewayError::InvalidSignature(
                "Wechat response signature mismatch".to_string(),
            ));
        }

        let result_code = response.get("result_code").map(String::as_str).unwrap_or("FAIL");
        if result_code != "SUCCESS" {
            let code = response
                .get("err_code")
                .cloned()
                .unwrap_or_else(|| result_code.to_string());
            let msg = response.get("err_code_des").cloned().unwrap_or_default();
            return Err(GatewayError::rejected(code, msg));
        }

        Ok(())
    }

    fn trade_type(method: PaymentMethod) -> Result<&'static str, GatewayError> {
        match method {
            PaymentMethod::WechatNative => Ok("NATIVE"),
            PaymentMethod::WechatJsapi => Ok("JSAPI"),
            PaymentMethod::WechatApp => Ok("APP"),
            PaymentMethod::WechatH5 => Ok("MWEB"),
            other => Err(GatewayError::Unsupported(format!(
                "Unsupported payment method: {} for Wechat Pay",
                other
            ))),
        }
    }

    // APP 调起参数需要用商户密钥重新签名
    fn app_params(&self, prepay_id: &str) -> Result<serde_json::Value, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("appid".to_string(), self.app_id.clone());
        params.insert("partnerid".to_string(), self.mch_id.clone());
        params.insert("prepayid".to_string(), prepay_id.to_string());
        params.insert("package".to_string(), "Sign=WXPay".to_string());
        params.insert("noncestr".to_string(), random_string(NONCE_LEN));
        params.insert("timestamp".to_string(), Utc::now().timestamp().to_string());
        let sign = self.signer.sign(&params)?;
        params.insert("sign".to_string(), sign);

        Ok(serde_json::to_value(params).unwrap_or_default())
    }

    fn jsapi_params(&self, prepay_id: &str) -> Result<serde_json::Value, GatewayError> {
        let mut params = BTreeMap::new();
        params.insert("appId".to_string(), self.app_id.clone());
        params.insert("timeStamp".to_string(), Utc::now().timestamp().to_string());
        params.insert("nonceStr".to_string(), random_string(NONCE_LEN));
        params.insert("package".to_string(), format!("prepay_id={}", prepay_id));
        params.insert(
            "signType".to_string(),
            self.signer.sign_type().as_str().to_string(),
        );
        let sign = self.signer.sign(&params)?;
        params.insert("paySign".to_string(), sign);

        Ok(serde_json::to_value(params).unwrap_or_default())
    }
}

#[async_trait]
impl GatewayAdapter for WechatPayGateway {
    fn name(&self) -> &'static str {
        "wechat_pay"
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Wechat
    }

    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentResponse, GatewayError> {
        info!(order_no = %request.order_no, method = %request.method, "Creating Wechat payment");

        let trade_type = Self::trade_type(request.method)?;

        let mut params = self.base_params();
        params.insert("body".to_string(), request.subject.clone());
        params.insert("out_trade_no".to_string(), request.order_no.clone());
        params.insert("total_fee".to_string(), request.amount.to_string());
        params.insert("fee_type".to_string(), request.currency.to_string());
        params.insert(
            "spbill_create_ip".to_string(),
            request.client_ip.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
        );
        params.insert(
            "notify_url".to_string(),
            request.notify_url.clone().unwrap_or_else(|| self.notify_url.clone()),
        );
        params.insert("trade_type".to_string(), trade_type.to_string());

        match request.method {
            PaymentMethod::WechatJsapi => {
                let open_id = request.open_id.clone().ok_or_else(|| {
                    GatewayError::rejected("INVALID_REQUEST", "JSAPI 支付缺少 openid")
                })?;
                params.insert("openid".to_string(), open_id);
            }
            PaymentMethod::WechatNative => {
                params.insert("product_id".to_string(), request.order_no.clone());
            }
            _ => {}
        }

        let (response, raw) = self.call(&self.client, "pay/unifiedorder", params).await?;

        let prepay_id = response
            .get("prepay_id")
            .cloned()
            .ok_or_else(|| GatewayError::ResponseParse("Missing prepay_id".to_string()))?;

        let mut result = PaymentResponse {
            transaction_id: Some(prepay_id.clone()),
            raw,
            ..Default::default()
        };

        match request.method {
            PaymentMethod::WechatNative => {
                result.qr_code = response.get("code_url").cloned();
            }
            PaymentMethod::WechatH5 => {
                result.payment_url = response.get("mweb_url").cloned();
            }
            PaymentMethod::WechatApp => {
                result.app_params = Some(self.app_params(&prepay_id)?);
            }
            PaymentMethod::WechatJsapi => {
                result.app_params = Some(self.jsapi_params(&prepay_id)?);
            }
            _ => {}
        }

        Ok(result)
    }

    async fn query(&self, order_no: &str) -> Result<QueryResponse, GatewayError> {
        info!(order_no = %order_no, "Querying Wechat payment status");

        let mut params = self.base_params();
        params.insert("out_trade_no".to_string(), order_no.to_string());

        let (response, raw) = self.call(&self.client, "pay/orderquery", params).await?;

        let trade_state = response.get("trade_state").map(String::as_str).unwrap_or("");
        let status = map_trade_state(trade_state);

        let amount = response.get("total_fee").and_then(|s| s.parse::<i64>().ok());

        Ok(QueryResponse {
            status,
            gateway_transaction_id: response.get("transaction_id").cloned(),
            amount,
            raw,
        })
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse, GatewayError> {
        info!(
            order_no = %request.order_no,
            refund_no = %request.refund_no,
            "Creating Wechat refund"
        );

        let client = self.cert_client.as_ref().ok_or_else(|| {
            GatewayError::Configuration("Wechat refund requires merchant certificate".to_string())
        })?;

        let mut params = self.base_params();
        params.insert("out_trade_no".to_string(), request.order_no.clone());
        params.insert("out_refund_no".to_string(), request.refund_no.clone());
        params.insert("total_fee".to_string(), request.original_amount.to_string());
        params.insert("refund_fee".to_string(), request.refund_amount.to_string());
        if let Some(reason) = &request.reason {
            params.insert("refund_desc".to_string(), reason.clone());
        }

        let (response, raw) = self.call(client, "secapi/pay/refund", params).await?;

        // 申请受理成功，退款结果需通过退款查询确认
        Ok(RefundResponse {
            gateway_refund_id: response.get("refund_id").cloned(),
            status: RefundStatus::Pending,
            raw,
        })
    }

    async fn query_refund(
        &self,
        order_no: &str,
        refund_no: &str,
    ) -> Result<RefundQueryResponse, GatewayError> {
        info!(order_no = %order_no, refund_no = %refund_no, "Querying Wechat refund status");

        let mut params = self.base_params();
        params.insert("out_refund_no".to_string(), refund_no.to_string());

        let (response, raw) = self.call(&self.client, "pay/refundquery", params).await?;

        let refund_count = response
            .get("refund_count")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);

        for i in 0..refund_count {
            let current = response
                .get(&format!("out_refund_no_{}", i))
                .map(String::as_str)
                .unwrap_or("");
            if current != refund_no {
                continue;
            }

            let status = match response
                .get(&format!("refund_status_{}", i))
                .map(String::as_str)
                .unwrap_or("")
            {
                "SUCCESS" => RefundStatus::Success,
                "REFUNDCLOSE" => RefundStatus::Closed,
                "CHANGE" => RefundStatus::Failed,
                _ => RefundStatus::Pending,
            };

            return Ok(RefundQueryResponse {
                status,
                gateway_refund_id: response.get(&format!("refund_id_{}", i)).cloned(),
                refund_amount: response
                    .get(&format!("refund_fee_{}", i))
                    .and_then(|s| s.parse::<i64>().ok()),
                raw,
            });
        }

        Err(GatewayError::rejected(
            "REFUNDNOTEXIST",
            format!("refund {} not found in response", refund_no),
        ))
    }

    fn parse_callback(&self, raw: &str) -> Result<CallbackParams, GatewayError> {
        from_xml(raw)
    }

    fn verify_callback(&self, params: &CallbackParams) -> Result<bool, GatewayError> {
        let valid = self.signer.verify(params)?;
        if !valid {
            warn!(
                out_trade_no = params.get("out_trade_no").map(String::as_str).unwrap_or(""),
                "Wechat callback signature validation failed"
            );
        }
        Ok(valid)
    }

    fn interpret_callback(
        &self,
        params: &CallbackParams,
        raw: &str,
    ) -> Result<CallbackNotification, GatewayError> {
        let return_code = params.get("return_code").map(String::as_str).unwrap_or("FAIL");
        if return_code != "SUCCESS" {
            let msg = params.get("return_msg").cloned().unwrap_or_default();
            return Err(GatewayError::rejected(return_code, msg));
        }

        let transaction_no = params
            .get("out_trade_no")
            .cloned()
            .ok_or_else(|| GatewayError::ResponseParse("Missing out_trade_no".to_string()))?;

        let status = match params.get("result_code").map(String::as_str) {
            Some("SUCCESS") => GatewayTradeStatus::Success,
            _ => GatewayTradeStatus::Failed,
        };

        let amount = match params.get("total_fee") {
            Some(fee) => Some(
                fee.parse::<i64>()
                    .map_err(|_| GatewayError::ResponseParse(format!("Invalid total_fee: {}", fee)))?,
            ),
            None => None,
        };

        Ok(CallbackNotification {
            transaction_no,
            gateway_transaction_id: params.get("transaction_id").cloned(),
            status,
            amount,
            raw: raw.to_string(),
        })
    }

    fn ack(&self, success: bool, message: &str) -> String {
        let (code, msg) = if success { ("SUCCESS", "OK") } else { ("FAIL", message) };
        let mut params = BTreeMap::new();
        params.insert("return_code".to_string(), code.to_string());
        params.insert("return_msg".to_string(), msg.to_string());
        to_xml(&params)
    }
}

fn map_trade_state(trade_state: &str) -> GatewayTradeStatus {
    match trade_state {
        "SUCCESS" | "REFUND" => GatewayTradeStatus::Success,
        "CLOSED" | "REVOKED" => GatewayTradeStatus::Closed,
        "PAYERROR" => GatewayTradeStatus::Failed,
        // NOTPAY、USERPAYING 以及未知状态
        _ => GatewayTradeStatus::Pending,
    }
}

/// 参数编码为 `<xml>` 报文，值统一使用 CDATA
pub fn to_xml(params: &BTreeMap<String, String>) -> String {
    let mut xml = String::from("<xml>");
    for (key, value) in params {
        // CDATA 内不能出现 "]]>"
        let value = value.replace("]]>", "]]]]><![CDATA[>");
        xml.push_str(&format!("<{key}><![CDATA[{value}]]></{key}>"));
    }
    xml.push_str("</xml>");
    xml
}

/// 解析 `<xml>` 报文的一级子节点
pub fn from_xml(xml: &str) -> Result<BTreeMap<String, String>, GatewayError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut params = BTreeMap::new();
    let mut depth = 0usize;
    let mut current_key: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth == 2 {
                    let key = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    insert_unique(&mut params, &key)?;
                    current_key = Some(key);
                }
            }
            Ok(Event::Empty(e)) => {
                if depth == 1 {
                    let key = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    insert_unique(&mut params, &key)?;
                }
            }
            Ok(Event::Text(e)) => {
                if let (2, Some(key)) = (depth, &current_key) {
                    let text = e
                        .unescape()
                        .map_err(|e| GatewayError::ResponseParse(e.to_string()))?;
                    if let Some(value) = params.get_mut(key) {
                        value.push_str(&text);
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if let (2, Some(key)) = (depth, &current_key) {
                    let text = String::from_utf8_lossy(&e.into_inner()).to_string();
                    if let Some(value) = params.get_mut(key) {
                        value.push_str(&text);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    current_key = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(GatewayError::ResponseParse(e.to_string())),
            _ => (),
        }
    }

    if depth != 0 {
        return Err(GatewayError::ResponseParse("Unterminated XML document".to_string()));
    }

    Ok(params)
}

// 重复字段会让签名校验与取值看到不同的内容，一律拒绝
fn insert_unique(params: &mut BTreeMap<String, String>, key: &str) -> Result<(), GatewayError> {
    if params.contains_key(key) {
        return Err(GatewayError::ResponseParse(format!(
            "Duplicate XML element: {}",
            key
        )));
    }
    params.insert(key.to_string(), String::new());
    Ok(())
}
