// src/tasks/payments_export.rs
//! Pull customer aggregates out of a payment-provider API into a CSV file.
//!
//! Pages through the provider's payments endpoint (HTTP basic auth),
//! folds the payments into per-customer summaries, and writes one CSV
//! artifact. Rate limiting (HTTP 429) is handled with an explicit bounded
//! retry loop and exponential backoff honouring `Retry-After` - never by
//! recursion - so sustained throttling fails the run instead of growing
//! the stack.

use ahash::AHashMap;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PaymentsConfig;
use crate::error::{Result, StoreError};
use crate::interrupt::check_interrupted;
use crate::{log_info, log_warn};

/// Retry bound for one page fetch.
pub const MAX_FETCH_RETRIES: usize = 5;
/// Cap on a server-provided Retry-After wait.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// One payment as the provider reports it. Unknown fields are ignored;
/// missing customer details stay `None` rather than failing the page.
#[derive(Debug, Clone, Deserialize)]
pub struct Payment {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    /// Smallest currency unit (paise).
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Unix epoch seconds.
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentPage {
    #[serde(default)]
    pub items: Vec<Payment>,
}

/// Errors at the provider boundary, separated so the fetch loop can tell
/// throttling apart from plain failures.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<u64> },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// The provider seam. The live implementation speaks HTTP; tests stub it.
pub trait PaymentsApi {
    fn fetch_page(&self, skip: usize, count: usize) -> std::result::Result<PaymentPage, ApiError>;
}

/// Live client over the provider's REST API.
pub struct HttpPaymentsApi {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl HttpPaymentsApi {
    pub fn new(config: &PaymentsConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::PaymentsApi(e.to_string()))?;
        Ok(HttpPaymentsApi {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }
}

impl PaymentsApi for HttpPaymentsApi {
    fn fetch_page(&self, skip: usize, count: usize) -> std::result::Result<PaymentPage, ApiError> {
        let url = format!("{}/payments", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .query(&[("count", count.to_string()), ("skip", skip.to_string())])
            .send()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited {
                retry_after: parse_retry_after(&response),
            });
        }
        if !response.status().is_success() {
            return Err(ApiError::Http(format!(
                "payments request failed: {}",
                response.status()
            )));
        }

        response
            .json::<PaymentPage>()
            .map_err(|e| ApiError::Transport(format!("invalid payments payload: {}", e)))
    }
}

/// Integer-seconds `Retry-After`, capped. Anything else means "no hint".
fn parse_retry_after(response: &reqwest::blocking::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|secs| secs.min(MAX_RETRY_AFTER_SECS))
}

/// Fetch every payment, page by page, with a bounded retry loop per page.
pub fn fetch_all_payments(
    api: &dyn PaymentsApi,
    batch_size: usize,
    rate_limit_secs: u64,
) -> Result<Vec<Payment>> {
    let mut payments = Vec::new();
    let mut skip = 0usize;

    loop {
        check_interrupted()?;
        let page = fetch_page_with_retry(api, skip, batch_size)?;
        let fetched = page.items.len();
        payments.extend(page.items);
        log_info!("fetched {} payment(s) so far", payments.len());

        if fetched < batch_size {
            break;
        }
        skip += fetched;
        if rate_limit_secs > 0 {
            std::thread::sleep(Duration::from_secs(rate_limit_secs));
        }
    }

    Ok(payments)
}

fn fetch_page_with_retry(
    api: &dyn PaymentsApi,
    skip: usize,
    count: usize,
) -> Result<PaymentPage> {
    let mut backoff = Duration::from_secs(1);
    let mut last_err = None;

    for attempt in 1..=MAX_FETCH_RETRIES {
        check_interrupted()?;
        match api.fetch_page(skip, count) {
            Ok(page) => return Ok(page),
            Err(ApiError::RateLimited { retry_after }) => {
                let wait = retry_after.map(Duration::from_secs).unwrap_or(backoff);
                log_warn!(
                    "rate limited, waiting {:?} before retry {}/{}",
                    wait,
                    attempt,
                    MAX_FETCH_RETRIES
                );
                std::thread::sleep(wait);
                backoff = backoff.saturating_mul(2);
                last_err = Some("rate limited".to_string());
            }
            Err(e) => {
                log_warn!(
                    "page fetch failed (attempt {}/{}): {}",
                    attempt,
                    MAX_FETCH_RETRIES,
                    e
                );
                if attempt < MAX_FETCH_RETRIES {
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                last_err = Some(e.to_string());
            }
        }
    }

    Err(StoreError::PaymentsApi(format!(
        "giving up after {} attempts: {}",
        MAX_FETCH_RETRIES,
        last_err.unwrap_or_else(|| "unknown error".to_string())
    )))
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerSummary {
    pub email: String,
    pub contact: String,
    pub payment_count: u64,
    pub total_paise: i64,
    pub first_payment_at: i64,
    pub last_payment_at: i64,
    pub methods: BTreeSet<String>,
    pub statuses: BTreeSet<String>,
}

impl CustomerSummary {
    pub fn total_rupees(&self) -> f64 {
        self.total_paise as f64 / 100.0
    }
}

/// Fold payments into per-customer summaries, keyed by (email, contact).
/// Payments carrying neither are dropped. A pure accumulation step: the
/// result is a value owned by the caller, nothing survives between runs.
pub fn aggregate_customers(payments: &[Payment]) -> Vec<CustomerSummary> {
    let mut by_customer: AHashMap<(String, String), CustomerSummary> = AHashMap::new();

    for payment in payments {
        let email = payment.email.clone().unwrap_or_default();
        let contact = payment.contact.clone().unwrap_or_default();
        if email.is_empty() && contact.is_empty() {
            continue;
        }

        let entry = by_customer
            .entry((email.clone(), contact.clone()))
            .or_insert_with(|| CustomerSummary {
                email,
                contact,
                payment_count: 0,
                total_paise: 0,
                first_payment_at: payment.created_at,
                last_payment_at: payment.created_at,
                methods: BTreeSet::new(),
                statuses: BTreeSet::new(),
            });

        entry.payment_count += 1;
        entry.total_paise += payment.amount;
        entry.first_payment_at = entry.first_payment_at.min(payment.created_at);
        entry.last_payment_at = entry.last_payment_at.max(payment.created_at);
        if let Some(method) = &payment.method {
            entry.methods.insert(method.clone());
        }
        if let Some(status) = &payment.status {
            entry.statuses.insert(status.clone());
        }
    }

    let mut customers: Vec<CustomerSummary> = by_customer.into_values().collect();
    customers.sort_by(|a, b| (&a.email, &a.contact).cmp(&(&b.email, &b.contact)));
    customers
}

// ---------------------------------------------------------------------------
// CSV artifact
// ---------------------------------------------------------------------------

const CSV_HEADER: &str = "customer_email,customer_contact,payment_count,total_amount_paise,\
total_amount_rupees,first_payment_date,last_payment_date,payment_methods,payment_statuses";

/// Quote a CSV field when it contains a delimiter, quote or newline.
pub fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn format_epoch(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub fn write_csv(path: &Path, customers: &[CustomerSummary]) -> Result<()> {
    let mut out = std::fs::File::create(path)?;
    writeln!(out, "{}", CSV_HEADER)?;
    for c in customers {
        let methods: Vec<&str> = c.methods.iter().map(String::as_str).collect();
        let statuses: Vec<&str> = c.statuses.iter().map(String::as_str).collect();
        writeln!(
            out,
            "{},{},{},{},{:.2},{},{},{},{}",
            csv_escape(&c.email),
            csv_escape(&c.contact),
            c.payment_count,
            c.total_paise,
            c.total_rupees(),
            format_epoch(c.first_payment_at),
            format_epoch(c.last_payment_at),
            csv_escape(&methods.join(",")),
            csv_escape(&statuses.join(",")),
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub payments_fetched: u64,
    pub customers: u64,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

pub fn run(api: &dyn PaymentsApi, config: &PaymentsConfig) -> Result<ExportReport> {
    if config.dry_run {
        log_info!(
            "DRY RUN: would fetch payments from {} in pages of {} and write {}",
            config.base_url,
            config.batch_size,
            config.output_file
        );
        return Ok(ExportReport {
            payments_fetched: 0,
            customers: 0,
            output: None,
            dry_run: true,
        });
    }

    let payments = fetch_all_payments(api, config.batch_size, config.rate_limit_secs)?;
    let customers = aggregate_customers(&payments);
    let output = PathBuf::from(&config.output_file);
    write_csv(&output, &customers)?;

    log_info!("=== payment export summary ===");
    log_info!("  payments fetched: {}", payments.len());
    log_info!("  customers:        {}", customers.len());
    log_info!("  written to:       {}", output.display());

    Ok(ExportReport {
        payments_fetched: payments.len() as u64,
        customers: customers.len() as u64,
        output: Some(output),
        dry_run: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(
        id: &str,
        email: Option<&str>,
        contact: Option<&str>,
        amount: i64,
        method: &str,
        status: &str,
        created_at: i64,
    ) -> Payment {
        Payment {
            id: id.to_string(),
            email: email.map(String::from),
            contact: contact.map(String::from),
            amount,
            method: Some(method.to_string()),
            status: Some(status.to_string()),
            created_at,
        }
    }

    #[test]
    fn test_aggregate_dedupes_by_customer() {
        let payments = vec![
            payment("p1", Some("a@x.com"), Some("+91"), 100, "card", "captured", 10),
            payment("p2", Some("a@x.com"), Some("+91"), 250, "upi", "captured", 30),
            payment("p3", Some("b@x.com"), None, 500, "card", "failed", 20),
        ];
        let customers = aggregate_customers(&payments);
        assert_eq!(customers.len(), 2);

        let a = &customers[0];
        assert_eq!(a.email, "a@x.com");
        assert_eq!(a.payment_count, 2);
        assert_eq!(a.total_paise, 350);
        assert_eq!(a.first_payment_at, 10);
        assert_eq!(a.last_payment_at, 30);
        assert_eq!(a.methods.len(), 2);
        assert!((a.total_rupees() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_drops_anonymous_payments() {
        let payments = vec![payment("p1", None, None, 100, "card", "captured", 10)];
        assert!(aggregate_customers(&payments).is_empty());
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_format_epoch() {
        assert_eq!(format_epoch(0), "1970-01-01 00:00:00");
    }
}
