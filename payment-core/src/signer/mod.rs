use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use rand::{Rng, rng};
use sha2::Sha256;

use crate::error::GatewayError;

pub mod alipay;
pub mod mock;
pub mod wechat;

pub use alipay::{AlipaySignType, AlipaySigner};
pub use mock::MockSigner;
pub use wechat::{WechatSignType, WechatSigner};

/// 渠道签名字段
pub const SIGN_FIELD: &str = "sign";

/// 参数签名/验签
///
/// 签名结果是确定性的；`sign` 字段从不参与待签名串。
pub trait Signer: Send + Sync {
    fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, GatewayError>;

    /// 校验 `params` 中携带的 `sign`，缺失签名视为校验失败
    fn verify(&self, params: &BTreeMap<String, String>) -> Result<bool, GatewayError>;
}

/// 构建待签名串: 按键名字典序，跳过空值与排除字段，以 `k=v&...` 连接
pub fn canonicalize(params: &BTreeMap<String, String>, exclude: &[&str]) -> String {
    params
        .iter()
        .filter(|(key, value)| !value.is_empty() && !exclude.contains(&key.as_str()))
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

// 生成随机字符串
pub fn random_string(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rng();

    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

// HMAC-SHA256 签名，返回小写十六进制
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> Result<String, GatewayError> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| GatewayError::Crypto(format!("Invalid HMAC key: {}", e)))?;
    mac.update(message);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// 常量时间比较签名
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a.as_bytes(), b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonicalize_sorts_and_skips() {
        let p = params(&[
            ("mch_id", "10000100"),
            ("body", "test"),
            ("sign", "XXXX"),
            ("attach", ""),
            ("appid", "wx123"),
        ]);

        assert_eq!(
            canonicalize(&p, &[SIGN_FIELD]),
            "appid=wx123&body=test&mch_id=10000100"
        );
        assert_eq!(
            canonicalize(&p, &[SIGN_FIELD, "body"]),
            "appid=wx123&mch_id=10000100"
        );
    }

    #[test]
    fn test_random_string() {
        let nonce = random_string(32);
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(nonce, random_string(32));
    }

    #[test]
    fn test_hmac_sha256_hex() {
        let result = hmac_sha256_hex(b"secret", b"hello world").unwrap();
        assert_eq!(
            result,
            "734cc62f32841568f45715aeb9f4d7891324e6d948e4c6c60c0621cdac48623a"
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("ABC", "ABC"));
        assert!(!constant_time_eq("ABC", "ABD"));
        assert!(!constant_time_eq("ABC", "ABCD"));
    }
}
