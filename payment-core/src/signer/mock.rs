use std::collections::BTreeMap;

use super::{SIGN_FIELD, Signer, canonicalize, constant_time_eq, hmac_sha256_hex};
use crate::error::GatewayError;

/// 模拟渠道签名: HMAC-SHA256，小写十六进制
#[derive(Clone)]
pub struct MockSigner {
    secret: String,
}

impl MockSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl Signer for MockSigner {
    fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, GatewayError> {
        let content = canonicalize(params, &[SIGN_FIELD]);
        hmac_sha256_hex(self.secret.as_bytes(), content.as_bytes())
    }

    fn verify(&self, params: &BTreeMap<String, String>) -> Result<bool, GatewayError> {
        let Some(provided) = params.get(SIGN_FIELD) else {
            return Ok(false);
        };

        Ok(constant_time_eq(&self.sign(params)?, provided))
    }
}

impl std::fmt::Debug for MockSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSigner").field("secret", &"*****").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_signature() {
        let signer = MockSigner::new("test_secret");
        let mut params = BTreeMap::new();
        params.insert("transaction_no".to_string(), "7000001".to_string());
        params.insert("amount".to_string(), "5000".to_string());
        params.insert("status".to_string(), "succeeded".to_string());

        let sign = signer.sign(&params).unwrap();
        assert_eq!(sign, sign.to_lowercase());
        params.insert("sign".to_string(), sign);
        assert!(signer.verify(&params).unwrap());

        // 修改参数后，签名应该失效
        let mut tampered = params.clone();
        tampered.insert("amount".to_string(), "1".to_string());
        assert!(!signer.verify(&tampered).unwrap());

        // 不同密钥签出的结果不被接受
        assert!(!MockSigner::new("other").verify(&params).unwrap());
    }
}
