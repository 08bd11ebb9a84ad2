mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use httpmock::prelude::*;
use rust_decimal_macros::dec;

use common::{Stack, command, orders_with, stack};
use payment_core::PaymentError;
use payment_core::config::WechatSettings;
use payment_core::models::enums::{ChannelType, PaymentMethod, RefundStatus, TransactionStatus};
use payment_core::payment::GatewayRegistry;
use payment_core::payment::providers::WechatPayGateway;
use payment_core::payment::providers::wechat::to_xml;
use payment_core::signer::{Signer, WechatSignType, WechatSigner};

const APP_ID: &str = "wx2421b1c4370ec43b";
const MCH_ID: &str = "10000100";
const API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";
const PREPAY_ID: &str = "wx201410272009395522657a690389285100";
const CODE_URL: &str = "weixin://wxpay/bizpayurl?pr=8ZV7Ozq";

fn signed_xml(pairs: &[(&str, &str)]) -> String {
    let mut params: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    params.insert("appid".to_string(), APP_ID.to_string());
    params.insert("mch_id".to_string(), MCH_ID.to_string());
    params.insert("nonce_str".to_string(), "5K8264ILTKCH16CQ".to_string());

    let signer = WechatSigner::new(API_KEY, WechatSignType::Md5);
    let sign = signer.sign(&params).unwrap();
    params.insert("sign".to_string(), sign);
    to_xml(&params)
}

fn wechat_stack(server: &MockServer, notifications: usize) -> Stack {
    let gateway = WechatPayGateway::new(&WechatSettings {
        app_id: APP_ID.to_string(),
        mch_id: MCH_ID.to_string(),
        api_key: API_KEY.to_string(),
        sign_type: "MD5".to_string(),
        gateway_url: server.base_url(),
        notify_url: "https://pay.example.com/notify/wechat_main".to_string(),
        cert_path: None,
        key_path: None,
        timeout_secs: 5,
    })
    .unwrap();

    let mut gateways = GatewayRegistry::new();
    gateways.register("wechat_main", Arc::new(gateway));
    stack(
        gateways,
        vec![common::channel("wechat_main", ChannelType::Wechat, 1, dec!(0.6))],
        orders_with(5000, notifications),
    )
}

async fn mock_unified_order(server: &MockServer) -> httpmock::Mock<'_> {
    let body = signed_xml(&[
        ("return_code", "SUCCESS"),
        ("return_msg", "OK"),
        ("result_code", "SUCCESS"),
        ("trade_type", "NATIVE"),
        ("prepay_id", PREPAY_ID),
        ("code_url", CODE_URL),
    ]);
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/pay/unifiedorder")
                .body_contains("<trade_type><![CDATA[NATIVE]]></trade_type>")
                .body_contains("<total_fee><![CDATA[5000]]></total_fee>");
            then.status(200)
                .header("Content-Type", "text/xml")
                .body(body);
        })
        .await
}

fn callback(out_trade_no: &str, total_fee: &str) -> String {
    signed_xml(&[
        ("return_code", "SUCCESS"),
        ("result_code", "SUCCESS"),
        ("out_trade_no", out_trade_no),
        ("total_fee", total_fee),
        ("transaction_id", "4200000123202410150000000001"),
        ("trade_type", "NATIVE"),
    ])
}

#[tokio::test]
async fn test_native_pay_then_query_reconciles() {
    let server = MockServer::start_async().await;
    let unified = mock_unified_order(&server).await;
    let query = server
        .mock_async(|when, then| {
            when.method(POST).path("/pay/orderquery");
            then.status(200).body(signed_xml(&[
                ("return_code", "SUCCESS"),
                ("result_code", "SUCCESS"),
                ("trade_state", "SUCCESS"),
                ("total_fee", "5000"),
                ("transaction_id", "4200000123202410150000000001"),
            ]));
        })
        .await;

    let s = wechat_stack(&server, 1);
    let created = s
        .manager
        .create_payment(command(5000, PaymentMethod::WechatNative))
        .await
        .unwrap();
    unified.assert_async().await;

    assert_eq!(created.credential.qr_code.as_deref(), Some(CODE_URL));
    assert_eq!(created.credential.transaction_id.as_deref(), Some(PREPAY_ID));
    assert_eq!(created.transaction.status, TransactionStatus::Pending);

    let tx = s.manager.query_payment(created.transaction.payment_id).await.unwrap();
    query.assert_async().await;
    assert_eq!(tx.status, TransactionStatus::Success);
    assert_eq!(
        tx.gateway_transaction_id.as_deref(),
        Some("4200000123202410150000000001")
    );
    assert!(tx.paid_at.is_some());
}

#[tokio::test]
async fn test_tampered_total_fee_is_rejected() {
    let server = MockServer::start_async().await;
    mock_unified_order(&server).await;

    let s = wechat_stack(&server, 1);
    let created = s
        .manager
        .create_payment(command(5000, PaymentMethod::WechatNative))
        .await
        .unwrap();
    let payment_id = created.transaction.payment_id;
    let genuine = callback(&created.transaction.transaction_no(), "5000");

    let tampered = genuine.replace(
        "<total_fee><![CDATA[5000]]></total_fee>",
        "<total_fee><![CDATA[1]]></total_fee>",
    );
    assert_ne!(tampered, genuine);

    let err = s.manager.handle_callback("wechat_main", &tampered).await.unwrap_err();
    assert!(matches!(err, PaymentError::SignatureInvalid(_)));
    let ack = s.manager.failure_ack("wechat_main", &err).unwrap();
    assert!(ack.contains("<return_code><![CDATA[FAIL]]></return_code>"));

    let stored = s.manager.get_payment(payment_id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);

    let outcome = s.manager.handle_callback("wechat_main", &genuine).await.unwrap();
    assert!(outcome.transitioned);
    assert_eq!(outcome.status, TransactionStatus::Success);
    assert!(outcome.ack.contains("<return_code><![CDATA[SUCCESS]]></return_code>"));
}

#[tokio::test]
async fn test_business_failure_keeps_pending_record() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/pay/unifiedorder");
            then.status(200).body(signed_xml(&[
                ("return_code", "SUCCESS"),
                ("result_code", "FAIL"),
                ("err_code", "ORDERPAID"),
                ("err_code_des", "该订单已支付"),
            ]));
        })
        .await;

    let s = wechat_stack(&server, 0);
    match s.manager.create_payment(command(5000, PaymentMethod::WechatNative)).await {
        Err(PaymentError::GatewayRejected { code, .. }) => assert_eq!(code, "ORDERPAID"),
        other => panic!("预期渠道拒绝，实际为 {:?}", other),
    }

    let (items, total) = s.manager.list_payments(&Default::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_forged_response_signature() {
    let server = MockServer::start_async().await;
    let forged = signed_xml(&[
        ("return_code", "SUCCESS"),
        ("result_code", "SUCCESS"),
        ("prepay_id", PREPAY_ID),
        ("code_url", CODE_URL),
    ])
    .replace(CODE_URL, "weixin://wxpay/bizpayurl?pr=attacker");
    server
        .mock_async(|when, then| {
            when.method(POST).path("/pay/unifiedorder");
            then.status(200).body(forged);
        })
        .await;

    let s = wechat_stack(&server, 0);
    assert!(matches!(
        s.manager.create_payment(command(5000, PaymentMethod::WechatNative)).await,
        Err(PaymentError::SignatureInvalid(_))
    ));
}

#[tokio::test]
async fn test_refund_without_certificate_is_marked_failed() {
    let server = MockServer::start_async().await;
    mock_unified_order(&server).await;

    let s = wechat_stack(&server, 1);
    let created = s
        .manager
        .create_payment(command(5000, PaymentMethod::WechatNative))
        .await
        .unwrap();
    let payment_id = created.transaction.payment_id;
    let raw = callback(&created.transaction.transaction_no(), "5000");
    s.manager.handle_callback("wechat_main", &raw).await.unwrap();

    let err = s.manager.refund(payment_id, 1000, None).await.unwrap_err();
    assert!(matches!(err, PaymentError::Configuration(_)));
    assert!(!err.is_retryable());

    let refunds = s.manager.list_refunds(payment_id).await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].status, RefundStatus::Failed);

    // 原支付状态不受影响
    let payment = s.manager.get_payment(payment_id).await.unwrap();
    assert_eq!(payment.status, TransactionStatus::Success);
}
