use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::gateway::{GatewayError, GatewayReference, PaymentGateway, Verification};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Paystack Client
// ============================================================================
//
// POST {base}/transaction/initialize     { email, amount }  (amount in kobo)
// GET  {base}/transaction/verify/{ref}
//
// Both authenticated with the secret key as a bearer token. No retries here;
// a circuit breaker stops us hammering a gateway that is down.
//
// ============================================================================

pub const DEFAULT_BASE_URL: &str = "https://api.paystack.co";

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct PaystackClient {
    client: Client,
    base_url: String,
    secret_key: String,
    breaker: CircuitBreaker,
}

/// Paystack wraps every payload as `{ status, message, data }`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    reference: String,
    authorization_url: Option<String>,
    access_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: String,
    amount: u64,
}

impl PaystackClient {
    pub fn new(config: PaystackConfig) -> Result<Self, GatewayError> {
        Self::with_breaker(config, CircuitBreakerConfig::default())
    }

    pub fn with_breaker(
        config: PaystackConfig,
        breaker: CircuitBreakerConfig,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("order-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key,
            breaker: CircuitBreaker::new("paystack", breaker),
        })
    }

    /// Handle on the breaker guarding this client; clones share its state.
    pub fn breaker(&self) -> CircuitBreaker {
        self.breaker.clone()
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
        let call = async {
            let response = request
                .bearer_auth(&self.secret_key)
                .send()
                .await
                .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| GatewayError::Malformed(e.to_string()))?;

            check_status(status, body)
        };

        self.breaker
            .call_filtered(call, |e| !matches!(e, GatewayError::Rejected { .. }))
            .await
            .map_err(|e| match e {
                CircuitBreakerError::CircuitOpen => {
                    GatewayError::Unavailable("circuit open".to_string())
                }
                CircuitBreakerError::OperationFailed(inner) => inner,
            })
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn initialize(
        &self,
        amount_minor: u64,
        email: &str,
    ) -> Result<GatewayReference, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let request = self
            .client
            .post(url)
            .json(&json!({ "email": email, "amount": amount_minor }));

        let body = self.send(request).await?;
        let reference = parse_initialize(body)?;

        tracing::info!(
            reference = %reference.reference,
            amount_minor = amount_minor,
            "Paystack transaction initialized"
        );
        Ok(reference)
    }

    async fn verify(&self, reference: &str) -> Result<Verification, GatewayError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let body = self.send(self.client.get(url)).await?;
        let verification = parse_verify(body)?;

        tracing::debug!(
            reference = %verification.reference,
            status = %verification.status,
            amount_minor = verification.amount_minor,
            "Paystack transaction verified"
        );
        Ok(verification)
    }
}

fn check_status(status: StatusCode, body: Value) -> Result<Value, GatewayError> {
    if status.is_success() {
        return Ok(body);
    }

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no message")
        .to_string();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Unavailable(format!("HTTP {}: {}", status.as_u16(), message)));
    }

    Err(GatewayError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn unwrap_envelope<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, GatewayError> {
    let envelope: Envelope<T> =
        serde_json::from_value(body).map_err(|e| GatewayError::Malformed(e.to_string()))?;

    if !envelope.status {
        return Err(GatewayError::Rejected {
            status: 200,
            message: envelope.message,
        });
    }

    envelope
        .data
        .ok_or_else(|| GatewayError::Malformed("response carried no data".to_string()))
}

fn parse_initialize(body: Value) -> Result<GatewayReference, GatewayError> {
    let data: InitializeData = unwrap_envelope(body)?;

    Ok(GatewayReference {
        reference: data.reference,
        authorization_url: data.authorization_url,
        access_code: data.access_code,
    })
}

fn parse_verify(body: Value) -> Result<Verification, GatewayError> {
    let raw = body.get("data").cloned().unwrap_or(Value::Null);
    let data: VerifyData = unwrap_envelope(body)?;

    Ok(Verification {
        confirmed: data.status == "success",
        reference: data.reference,
        status: data.status,
        amount_minor: data.amount,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::CircuitState;

    #[test]
    fn test_parse_initialize_response() {
        let body = json!({
            "status": true,
            "message": "Authorization URL created",
            "data": {
                "authorization_url": "https://checkout.paystack.com/0peioxfhpn",
                "access_code": "0peioxfhpn",
                "reference": "7PVGX8MEk85tgeEpVDtD"
            }
        });

        let reference = parse_initialize(body).unwrap();
        assert_eq!(reference.reference, "7PVGX8MEk85tgeEpVDtD");
        assert_eq!(reference.access_code.as_deref(), Some("0peioxfhpn"));
    }

    #[test]
    fn test_parse_verify_success_and_abandoned() {
        let body = json!({
            "status": true,
            "message": "Verification successful",
            "data": { "reference": "ref_1", "status": "success", "amount": 2550, "currency": "NGN" }
        });
        let verification = parse_verify(body).unwrap();
        assert!(verification.confirmed);
        assert_eq!(verification.amount_minor, 2550);
        assert_eq!(verification.raw["currency"], "NGN");

        let body = json!({
            "status": true,
            "message": "Verification successful",
            "data": { "reference": "ref_2", "status": "abandoned", "amount": 2550 }
        });
        let verification = parse_verify(body).unwrap();
        assert!(!verification.confirmed);
        assert_eq!(verification.status, "abandoned");
    }

    #[test]
    fn test_envelope_failures() {
        let refused = json!({ "status": false, "message": "Invalid key" });
        assert_eq!(
            parse_verify(refused).unwrap_err(),
            GatewayError::Rejected {
                status: 200,
                message: "Invalid key".to_string()
            }
        );

        let empty = json!({ "status": true, "message": "ok" });
        assert!(matches!(parse_initialize(empty), Err(GatewayError::Malformed(_))));
    }

    #[test]
    fn test_http_status_classification() {
        let body = json!({ "message": "Transaction reference not found" });
        assert_eq!(
            check_status(StatusCode::NOT_FOUND, body.clone()).unwrap_err(),
            GatewayError::Rejected {
                status: 404,
                message: "Transaction reference not found".to_string()
            }
        );
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, body.clone()),
            Err(GatewayError::Unavailable(_))
        ));
        assert!(check_status(StatusCode::OK, body).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_unavailable_then_circuit_opens() {
        let client = PaystackClient::with_breaker(
            PaystackConfig {
                secret_key: "sk_test".to_string(),
                base_url: "http://127.0.0.1:1".to_string(),
                timeout: Duration::from_secs(2),
            },
            CircuitBreakerConfig {
                failure_threshold: 1,
                open_for: Duration::from_secs(60),
                success_threshold: 1,
            },
        )
        .unwrap();

        let first = client.verify("ref_1").await.unwrap_err();
        assert!(matches!(first, GatewayError::Unavailable(_)));

        let second = client.verify("ref_1").await.unwrap_err();
        assert_eq!(second, GatewayError::Unavailable("circuit open".to_string()));
        assert_eq!(client.breaker().state().await, CircuitState::Open);
    }
}
