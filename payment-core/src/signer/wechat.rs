use std::collections::BTreeMap;

use openssl::hash::{MessageDigest, hash};

use super::{SIGN_FIELD, Signer, canonicalize, constant_time_eq, hmac_sha256_hex};
use crate::error::GatewayError;

/// 微信支付 v2 签名类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WechatSignType {
    #[default]
    Md5,
    HmacSha256,
}

impl WechatSignType {
    /// 请求中 `sign_type` 字段的取值
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::HmacSha256 => "HMAC-SHA256",
        }
    }
}

#[derive(Clone)]
pub struct WechatSigner {
    api_key: String,
    sign_type: WechatSignType,
}

impl WechatSigner {
    pub fn new(api_key: impl Into<String>, sign_type: WechatSignType) -> Self {
        Self {
            api_key: api_key.into(),
            sign_type,
        }
    }

    pub fn sign_type(&self) -> WechatSignType {
        self.sign_type
    }

    fn string_to_sign(&self, params: &BTreeMap<String, String>) -> String {
        format!("{}&key={}", canonicalize(params, &[SIGN_FIELD]), self.api_key)
    }
}

impl Signer for WechatSigner {
    fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, GatewayError> {
        let content = self.string_to_sign(params);

        let digest = match self.sign_type {
            WechatSignType::Md5 => hex::encode(hash(MessageDigest::md5(), content.as_bytes())?),
            WechatSignType::HmacSha256 => {
                hmac_sha256_hex(self.api_key.as_bytes(), content.as_bytes())?
            }
        };

        Ok(digest.to_uppercase())
    }

    fn verify(&self, params: &BTreeMap<String, String>) -> Result<bool, GatewayError> {
        let provided = match params.get(SIGN_FIELD) {
            Some(sign) if !sign.is_empty() => sign,
            _ => return Ok(false),
        };

        let calculated = self.sign(params)?;
        Ok(constant_time_eq(&calculated, provided))
    }
}

impl std::fmt::Debug for WechatSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WechatSigner")
            .field("api_key", &"*****")
            .field("sign_type", &self.sign_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    // 微信支付文档中的签名示例
    fn doc_params() -> BTreeMap<String, String> {
        [
            ("appid", "wxd930ea5d5a258f4f"),
            ("mch_id", "10000100"),
            ("device_info", "1000"),
            ("body", "test"),
            ("nonce_str", "ibuaiVcKdpRxkhJA"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_md5_sign_matches_documented_example() {
        let signer = WechatSigner::new("192006250b4c09247ec02edce69f6a2d", WechatSignType::Md5);
        let sign = signer.sign(&doc_params()).unwrap();
        assert_eq!(sign, "9A0A8659F005D6984697E2CA0A9CF3B7");
    }

    #[test]
    fn test_hmac_sign_is_uppercase_hex() {
        let signer = WechatSigner::new("192006250b4c09247ec02edce69f6a2d", WechatSignType::HmacSha256);
        let sign = signer.sign(&doc_params()).unwrap();
        assert_eq!(sign.len(), 64);
        assert_eq!(sign, sign.to_uppercase());
    }

    #[rstest]
    #[case(WechatSignType::Md5)]
    #[case(WechatSignType::HmacSha256)]
    fn test_verify_and_tamper(#[case] sign_type: WechatSignType) {
        let signer = WechatSigner::new("api_key_for_test", sign_type);
        let mut params = doc_params();
        params.insert("total_fee".to_string(), "5000".to_string());
        let sign = signer.sign(&params).unwrap();
        params.insert("sign".to_string(), sign);

        assert!(signer.verify(&params).unwrap());

        // 任意一个值被篡改都应验签失败
        let mut tampered = params.clone();
        tampered.insert("total_fee".to_string(), "1".to_string());
        assert!(!signer.verify(&tampered).unwrap());
    }

    #[test]
    fn test_verify_without_sign_fails() {
        let signer = WechatSigner::new("key", WechatSignType::Md5);
        assert!(!signer.verify(&doc_params()).unwrap());
    }
}
