//! Rolling per-day sync counters, flushed to a host callback once per
//! calendar day.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorBucket {
    ObjectLimitExceeded,
    RequestSizeLimitExceeded,
    ValidationError,
    TooManyRequests,
}

impl ErrorBucket {
    pub fn classify(error: &SyncError) -> Option<Self> {
        if error.is_object_limit_exceeded() {
            Some(Self::ObjectLimitExceeded)
        } else if error.is_request_size_limit_exceeded() {
            Some(Self::RequestSizeLimitExceeded)
        } else if error.is_validation_error() {
            Some(Self::ValidationError)
        } else if error.is_too_many_requests() {
            Some(Self::TooManyRequests)
        } else {
            None
        }
    }
}

#[derive(Debug, Default, Clone)]
struct DayBucket {
    total_attempts: u64,
    per_feature_errors: HashMap<(String, ErrorBucket), u64>,
}

struct Inner {
    date: NaiveDate,
    bucket: DayBucket,
    last_flushed_date: Option<NaiveDate>,
}

pub struct DailyStats {
    inner: Mutex<Inner>,
}

impl DailyStats {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            inner: Mutex::new(Inner {
                date: today,
                bucket: DayBucket::default(),
                last_flushed_date: None,
            }),
        }
    }

    pub fn record_attempt(&self, today: NaiveDate) {
        let mut inner = self.inner.lock().unwrap();
        Self::roll_if_new_day(&mut inner, today);
        inner.bucket.total_attempts += 1;
    }

    pub fn record_feature_error(&self, today: NaiveDate, feature: &str, error: &SyncError) {
        let Some(bucket) = ErrorBucket::classify(error) else {
            return;
        };
        let mut inner = self.inner.lock().unwrap();
        Self::roll_if_new_day(&mut inner, today);
        *inner
            .bucket
            .per_feature_errors
            .entry((feature.to_string(), bucket))
            .or_insert(0) += 1;
    }

    fn roll_if_new_day(inner: &mut Inner, today: NaiveDate) {
        if inner.date != today {
            inner.date = today;
            inner.bucket = DayBucket::default();
        }
    }

    /// Calls `handler` with the accumulated counters at most once per
    /// calendar day; returns whether it actually flushed.
    pub fn send_stats_if_needed(&self, today: NaiveDate, handler: impl FnOnce(u64)) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::roll_if_new_day(&mut inner, today);
        if inner.last_flushed_date == Some(today) {
            return false;
        }
        let total = inner.bucket.total_attempts;
        inner.last_flushed_date = Some(today);
        drop(inner);
        handler(total);
        true
    }

    pub fn total_attempts(&self, today: NaiveDate) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        Self::roll_if_new_day(&mut inner, today);
        inner.bucket.total_attempts
    }

    pub fn feature_error_count(&self, today: NaiveDate, feature: &str, bucket: ErrorBucket) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        Self::roll_if_new_day(&mut inner, today);
        inner
            .bucket
            .per_feature_errors
            .get(&(feature.to_string(), bucket))
            .copied()
            .unwrap_or(0)
    }
}
