use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use tracing::debug;

use super::{SIGN_FIELD, Signer, canonicalize};
use crate::error::GatewayError;

/// 验签时额外剔除的字段
pub const SIGN_TYPE_FIELD: &str = "sign_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlipaySignType {
    /// SHA256WithRSA
    #[default]
    Rsa2,
    /// SHA1WithRSA
    Rsa,
}

impl AlipaySignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa2 => "RSA2",
            Self::Rsa => "RSA",
        }
    }

    fn digest(&self) -> MessageDigest {
        match self {
            Self::Rsa2 => MessageDigest::sha256(),
            Self::Rsa => MessageDigest::sha1(),
        }
    }
}

/// 支付宝 RSA 签名器，应用私钥签名，支付宝公钥验签
#[derive(Clone)]
pub struct AlipaySigner {
    private_key: PKey<Private>,
    alipay_public_key: PKey<Public>,
    sign_type: AlipaySignType,
}

impl AlipaySigner {
    /// 密钥可以是完整 PEM，也可以是支付宝开放平台导出的裸 base64
    pub fn new(
        private_key: &str,
        alipay_public_key: &str,
        sign_type: AlipaySignType,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            private_key: load_private_key(private_key)?,
            alipay_public_key: load_public_key(alipay_public_key)?,
            sign_type,
        })
    }

    pub fn sign_type(&self) -> AlipaySignType {
        self.sign_type
    }

    fn sign_content(&self, content: &str) -> Result<String, GatewayError> {
        let mut signer = openssl::sign::Signer::new(self.sign_type.digest(), &self.private_key)?;
        signer.update(content.as_bytes())?;
        let signature = signer.sign_to_vec()?;

        Ok(STANDARD.encode(signature))
    }

    fn verify_content(&self, content: &str, sign: &str) -> Result<bool, GatewayError> {
        let sign_bytes = match STANDARD.decode(sign) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "Alipay sign is not valid base64");
                return Ok(false);
            }
        };

        let mut verifier =
            openssl::sign::Verifier::new(self.sign_type.digest(), &self.alipay_public_key)?;
        verifier.update(content.as_bytes())?;

        // 签名长度不合法时 openssl 返回错误而不是 false
        match verifier.verify(&sign_bytes) {
            Ok(valid) => Ok(valid),
            Err(e) => {
                debug!(error = %e, "Alipay signature verification error");
                Ok(false)
            }
        }
    }
}

impl Signer for AlipaySigner {
    fn sign(&self, params: &BTreeMap<String, String>) -> Result<String, GatewayError> {
        self.sign_content(&canonicalize(params, &[SIGN_FIELD]))
    }

    fn verify(&self, params: &BTreeMap<String, String>) -> Result<bool, GatewayError> {
        let provided = match params.get(SIGN_FIELD) {
            Some(sign) if !sign.is_empty() => sign,
            _ => return Ok(false),
        };

        let content = canonicalize(params, &[SIGN_FIELD, SIGN_TYPE_FIELD]);
        self.verify_content(&content, provided)
    }
}

impl std::fmt::Debug for AlipaySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlipaySigner")
            .field("private_key", &"*****")
            .field("sign_type", &self.sign_type)
            .finish()
    }
}

fn load_private_key(key: &str) -> Result<PKey<Private>, GatewayError> {
    let key = key.trim();
    if key.contains("-----BEGIN") {
        return Ok(PKey::private_key_from_pem(key.as_bytes())?);
    }

    // 开放平台导出的私钥可能是 PKCS#8 也可能是 PKCS#1
    PKey::private_key_from_pem(wrap_pem(key, "PRIVATE KEY").as_bytes())
        .or_else(|_| PKey::private_key_from_pem(wrap_pem(key, "RSA PRIVATE KEY").as_bytes()))
        .map_err(|e| GatewayError::Configuration(format!("无法加载支付宝应用私钥: {}", e)))
}

fn load_public_key(key: &str) -> Result<PKey<Public>, GatewayError> {
    let key = key.trim();
    let pem = if key.contains("-----BEGIN") {
        key.to_string()
    } else {
        wrap_pem(key, "PUBLIC KEY")
    };

    PKey::public_key_from_pem(pem.as_bytes())
        .map_err(|e| GatewayError::Configuration(format!("无法加载支付宝公钥: {}", e)))
}

/// 将裸 base64 密钥按 64 列折行包装为 PEM
fn wrap_pem(body: &str, label: &str) -> String {
    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for line in compact.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}
