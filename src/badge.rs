//! External badge issuance.
//!
//! When a learner is certified we notify the configured badge platform and
//! record the badge URL it hands back. Issuance is best-effort: a failure
//! here must never fail or roll back the certification itself.

use serde::{Deserialize, Serialize};

use crate::models::{Certificate, User};

#[derive(Serialize)]
struct IssuanceReq<'a> {
    recipient_name: &'a str,
    recipient_email: &'a str,
    certificate_number: &'a str,
    issued_on: chrono::NaiveDate,
    expires_on: chrono::NaiveDate,
}

#[derive(Deserialize)]
struct IssuanceResp {
    badge_url: String,
}

#[derive(Clone)]
pub struct BadgeClient {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl BadgeClient {
    /// Reads `BADGE_API_URL`; when unset, issuance requests are skipped and
    /// certificates simply carry no badge reference.
    pub fn from_env() -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: std::env::var("BADGE_API_URL").ok(),
        }
    }

    pub async fn request_issuance(&self, cert: &Certificate, learner: &User) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?;
        let req = IssuanceReq {
            recipient_name: &learner.full_name,
            recipient_email: &learner.email,
            certificate_number: &cert.certificate_number,
            issued_on: cert.issued_on,
            expires_on: cert.expires_on,
        };
        let result = self
            .http
            .post(endpoint)
            .json(&req)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(resp) => match resp.json::<IssuanceResp>().await {
                Ok(body) => Some(body.badge_url),
                Err(e) => {
                    tracing::warn!(error=%e, "badge platform returned an unreadable response");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    error=%e,
                    certificate_number = %cert.certificate_number,
                    "badge issuance request failed"
                );
                None
            }
        }
    }
}
