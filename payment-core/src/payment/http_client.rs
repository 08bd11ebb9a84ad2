use std::time::Duration;

use reqwest::{Client, RequestBuilder, header};
use tracing::debug;

use crate::error::GatewayError;

// HTTP客户端配置
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("PaymentCore/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(timeout_secs.min(10)),
            ..Default::default()
        }
    }
}

/// 渠道 HTTP 客户端，所有请求都受超时约束
#[derive(Clone)]
pub struct GatewayHttpClient {
    client: Client,
}

impl GatewayHttpClient {
    pub fn new(config: &HttpClientConfig) -> Result<Self, GatewayError> {
        let client = Self::builder(config)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// 带商户证书的客户端(双向 TLS)，`pem` 需同时包含证书与私钥
    pub fn with_identity(config: &HttpClientConfig, pem: &[u8]) -> Result<Self, GatewayError> {
        let identity = reqwest::Identity::from_pem(pem)
            .map_err(|e| GatewayError::Configuration(format!("Invalid merchant certificate: {}", e)))?;

        let client = Self::builder(config)
            .use_rustls_tls()
            .identity(identity)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn builder(config: &HttpClientConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .pool_max_idle_per_host(10)
    }

    pub async fn post_xml(&self, url: &str, body: String) -> Result<String, GatewayError> {
        let request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body);

        self.send(url, request).await
    }

    pub async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
    ) -> Result<String, GatewayError> {
        let request = self.client.post(url).form(form);
        self.send(url, request).await
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<String, GatewayError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_reqwest_error)?;

        debug!(url = %url, status = %status.as_u16(), "Gateway HTTP response");

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(GatewayError::Network(format!("HTTP {} from {}", status.as_u16(), url)));
        }
        if !status.is_success() {
            return Err(GatewayError::rejected(
                format!("HTTP_{}", status.as_u16()),
                body,
            ));
        }

        Ok(body)
    }
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Network(err.to_string())
    }
}
