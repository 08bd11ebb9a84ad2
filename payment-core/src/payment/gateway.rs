use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::enums::ChannelType;
use crate::models::payment::{
    CallbackNotification, PaymentRequest, PaymentResponse, QueryResponse, RefundQueryResponse,
    RefundRequest, RefundResponse,
};

/// 已解码的回调参数
pub type CallbackParams = BTreeMap<String, String>;

/// 支付渠道适配器公共接口
///
/// 每个渠道实现各自的报文编解码与签名，对外暴露统一的
/// 下单、查询、退款、退款查询与回调验签能力。
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    /// 获取支付适配器名称
    fn name(&self) -> &'static str;

    fn channel_type(&self) -> ChannelType;

    /// 创建支付交易
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentResponse, GatewayError>;

    /// 查询交易状态
    async fn query(&self, order_no: &str) -> Result<QueryResponse, GatewayError>;

    /// 发起退款
    async fn refund(&self, request: &RefundRequest) -> Result<RefundResponse, GatewayError>;

    /// 查询退款状态
    async fn query_refund(
        &self,
        order_no: &str,
        refund_no: &str,
    ) -> Result<RefundQueryResponse, GatewayError>;

    /// 解码回调报文
    fn parse_callback(&self, raw: &str) -> Result<CallbackParams, GatewayError>;

    /// 校验回调签名
    fn verify_callback(&self, params: &CallbackParams) -> Result<bool, GatewayError>;

    /// 将已验签的回调参数归一化
    fn interpret_callback(
        &self,
        params: &CallbackParams,
        raw: &str,
    ) -> Result<CallbackNotification, GatewayError>;

    /// 返回给渠道的应答报文
    fn ack(&self, success: bool, message: &str) -> String;
}
