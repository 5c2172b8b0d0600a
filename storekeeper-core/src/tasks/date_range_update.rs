// src/tasks/date_range_update.rs
//! Mark a date range of settled orders as delivered.
//!
//! Orders created within an inclusive `[start, end]` range, paid (or cash
//! on delivery) and still in a pre-delivery status get
//! `deliveryStatus = "DELIVERED"`. Timestamps are stored as RFC 3339 UTC
//! strings, so the range filter is a plain string comparison.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};

use crate::error::{Result, StoreError};
use crate::interrupt::check_interrupted;
use crate::store::Store;
use crate::tasks::{log_batch_progress, UpdateSummary};
use crate::{log_error, log_info};

pub const ELIGIBLE_PAYMENT_STATUSES: [&str; 2] = ["CASH_ON_DELIVERY", "PAID"];
pub const ELIGIBLE_DELIVERY_STATUSES: [&str; 3] = ["PENDING", "DISPATCHED", "PREPARING"];

#[derive(Debug, Clone)]
pub struct DateRangeConfig {
    pub collection: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl DateRangeConfig {
    /// Parse and validate the CLI-provided boundaries. Fatal before any
    /// connection is opened: bad syntax or an inverted range never reach
    /// the store.
    pub fn for_orders(
        start_raw: &str,
        end_raw: &str,
        batch_size: usize,
        dry_run: bool,
    ) -> Result<Self> {
        let start = parse_boundary(start_raw, false)?;
        let end = parse_boundary(end_raw, true)?;
        if start > end {
            return Err(StoreError::Config(format!(
                "start date {} is after end date {}",
                start_raw, end_raw
            )));
        }
        Ok(DateRangeConfig {
            collection: "orders".to_string(),
            start,
            end,
            batch_size,
            dry_run,
        })
    }

    fn selection_filter(&self) -> Value {
        json!({
            "createdAt": {
                "$gte": format_timestamp(&self.start),
                "$lte": format_timestamp(&self.end)
            },
            "paymentStatus": {"$in": ELIGIBLE_PAYMENT_STATUSES},
            "deliveryStatus": {"$in": ELIGIBLE_DELIVERY_STATUSES}
        })
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS`, or full RFC 3339. A
/// date-only end boundary extends to the last second of that day so the
/// range stays inclusive.
pub fn parse_boundary(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        // hms values above are always valid for a parsed date
        return Ok(time
            .ok_or_else(|| StoreError::Config(format!("invalid date: {}", raw)))?
            .and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.and_utc());
    }
    Err(StoreError::Config(format!(
        "invalid date {:?}: expected YYYY-MM-DD or RFC 3339",
        raw
    )))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn run(store: &Store, config: &DateRangeConfig) -> Result<UpdateSummary> {
    let coll = store.collection(&config.collection);
    let filter = config.selection_filter();

    let mut summary = UpdateSummary {
        dry_run: config.dry_run,
        ..Default::default()
    };

    let matching = coll.count_documents(&filter)?;
    log_info!(
        "{}: {} order(s) between {} and {} eligible for delivery",
        config.collection,
        matching,
        format_timestamp(&config.start),
        format_timestamp(&config.end)
    );

    if config.dry_run {
        summary.matched = matching;
        log_info!("DRY RUN: would mark {} order(s) DELIVERED", matching);
        return Ok(summary);
    }

    let mut cursor = coll.find_batched(&filter, Some(&[]))?;
    let total = cursor.remaining();
    let mut processed = 0usize;

    while !cursor.is_finished() {
        check_interrupted()?;
        let chunk = cursor.next_chunk(config.batch_size);
        let ids: Vec<Value> = chunk.iter().map(|row| row["_id"].clone()).collect();
        processed += ids.len();
        summary.matched += ids.len() as u64;

        let batch_filter = json!({ "_id": {"$in": ids} });
        let update = json!({ "$set": { "deliveryStatus": "DELIVERED" } });
        match coll.update_many(&batch_filter, &update) {
            Ok((_, modified)) => summary.updated += modified,
            Err(e) => {
                summary.errors += chunk.len() as u64;
                log_error!("failed to update a batch of {} orders: {}", chunk.len(), e);
            }
        }
        store.flush()?;
        log_batch_progress(&config.collection, processed, total);
    }

    summary.log("date-range delivery update");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_only_boundaries() {
        let start = parse_boundary("2024-01-01", false).unwrap();
        let end = parse_boundary("2024-01-31", true).unwrap();
        assert_eq!(format_timestamp(&start), "2024-01-01T00:00:00Z");
        assert_eq!(format_timestamp(&end), "2024-01-31T23:59:59Z");
    }

    #[test]
    fn test_parse_timestamp_boundaries() {
        let t = parse_boundary("2024-01-01T14:30:00", false).unwrap();
        assert_eq!(format_timestamp(&t), "2024-01-01T14:30:00Z");
        let t = parse_boundary("2024-01-01T14:30:00Z", false).unwrap();
        assert_eq!(format_timestamp(&t), "2024-01-01T14:30:00Z");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_boundary("01/02/2024", false).is_err());
        assert!(parse_boundary("not a date", true).is_err());
    }

    #[test]
    fn test_inverted_range_is_fatal() {
        let err =
            DateRangeConfig::for_orders("2024-02-01", "2024-01-01", 100, false).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
