//! HTTP client for the upstream bookkeeping service.
//!
//! Read-only: the upstream is the system of record for raw transactions,
//! accounts and categories; nothing is ever written back. Transient
//! transport failures are retried with doubling backoff inside the run.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Per-request wall-clock bound; a hung upstream fails the attempt rather
/// than the whole run.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// An account as exposed by the upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamAccount {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// A transaction as exposed by the upstream service. Amounts arrive in
/// currency units and are converted to cents at the ingest boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamTransaction {
    pub id: String,
    pub account_id: String,
    pub date: String,
    pub amount: f64,
    #[serde(default)]
    pub payee_name: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub cleared: Option<String>,
    #[serde(default)]
    pub import_id: Option<String>,
}

/// A category snapshot row from the upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    budget_id: String,
}

impl UpstreamClient {
    pub fn new(base_url: &str, token: &str, budget_id: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            budget_id: budget_id.to_string(),
        }
    }

    /// Build a client from configured credentials, or explain what is
    /// missing. The token itself never reaches the error message or logs.
    pub fn from_config(config: &crate::config::Config) -> AppResult<Self> {
        let base_url = config
            .upstream_url
            .as_deref()
            .ok_or_else(|| AppError::Validation("UPSTREAM_URL is not configured".into()))?;
        let token = config
            .upstream_token
            .as_deref()
            .ok_or_else(|| AppError::Validation("UPSTREAM_TOKEN is not configured".into()))?;
        let budget_id = config
            .upstream_budget_id
            .as_deref()
            .ok_or_else(|| AppError::Validation("UPSTREAM_BUDGET_ID is not configured".into()))?;
        Ok(Self::new(base_url, token, budget_id))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        let url = format!("{}/budgets/{}/{}", self.base_url, self.budget_id, path);
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<T>().await.map_err(|e| {
                            AppError::Upstream(format!("malformed upstream response: {e}"))
                        });
                    }
                    // Client errors are permanent; no point in retrying
                    if status.is_client_error() {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(AppError::Upstream(format!(
                            "upstream rejected request ({status}): {body}"
                        )));
                    }
                    last_error = format!("upstream returned {status}");
                }
                Err(e) => {
                    last_error = format!("transport error: {e}");
                }
            }

            if attempt < MAX_ATTEMPTS {
                log::warn!(
                    "Upstream fetch failed (attempt {attempt}/{MAX_ATTEMPTS}): {last_error}; retrying in {backoff_ms}ms"
                );
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
            }
        }

        Err(AppError::Upstream(last_error))
    }

    pub async fn fetch_accounts(&self) -> AppResult<Vec<UpstreamAccount>> {
        #[derive(Deserialize)]
        struct AccountsResponse {
            accounts: Vec<UpstreamAccount>,
        }
        let resp: AccountsResponse = self.get_json("accounts").await?;
        Ok(resp.accounts)
    }

    /// Transactions posted on or after `since_date` (ISO day).
    pub async fn fetch_transactions(&self, since_date: &str) -> AppResult<Vec<UpstreamTransaction>> {
        #[derive(Deserialize)]
        struct TransactionsResponse {
            transactions: Vec<UpstreamTransaction>,
        }
        let resp: TransactionsResponse = self
            .get_json(&format!("transactions?since_date={since_date}"))
            .await?;
        Ok(resp.transactions)
    }

    pub async fn fetch_categories(&self) -> AppResult<Vec<UpstreamCategory>> {
        #[derive(Deserialize)]
        struct CategoriesResponse {
            categories: Vec<UpstreamCategory>,
        }
        let resp: CategoriesResponse = self.get_json("categories").await?;
        Ok(resp.categories)
    }
}

/// Convert a currency-unit amount to integer cents.
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Interpret the upstream cleared flag.
pub fn cleared_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("cleared") | Some("reconciled") | Some("true") | Some("1")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_cents() {
        assert_eq!(to_cents(12.34), 1234);
        assert_eq!(to_cents(-12.345), -1235); // half rounds away from zero
        assert_eq!(to_cents(0.0), 0);
        assert_eq!(to_cents(-0.01), -1);
    }

    #[test]
    fn test_cleared_flag() {
        assert!(cleared_flag(Some("cleared")));
        assert!(cleared_flag(Some("Reconciled")));
        assert!(cleared_flag(Some("1")));
        assert!(!cleared_flag(Some("uncleared")));
        assert!(!cleared_flag(Some("")));
        assert!(!cleared_flag(None));
    }

    #[test]
    fn test_transaction_deserializes_with_sparse_fields() {
        let json = r#"{"id":"t1","account_id":"a1","date":"2025-01-05","amount":-42.5}"#;
        let txn: UpstreamTransaction = serde_json::from_str(json).expect("parse");
        assert_eq!(txn.payee_name, None);
        assert_eq!(to_cents(txn.amount), -4250);
    }
}
