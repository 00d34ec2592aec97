use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounterVec, register_histogram_vec, register_int_counter_vec};
use scopeguard::ScopeGuard;

pub(crate) static BUCKET_METRICS: Lazy<BucketMetrics> = Lazy::new(Default::default);

#[derive(Clone, Copy, Debug)]
pub(crate) enum RequestKind {
    HeadBucket,
    GetBucketLocation,
    CreateBucket,
    DeleteBucket,
    PutBucketTagging,
    GetBucketTagging,
    GetBucketQuota,
    GetBucketStorageInfo,
    ListObjects,
    DeleteObjects,
    ListMultipartUploads,
    AbortMultipartUpload,
}

use RequestKind::*;

impl RequestKind {
    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            HeadBucket => "head_bucket",
            GetBucketLocation => "get_bucket_location",
            CreateBucket => "create_bucket",
            DeleteBucket => "delete_bucket",
            PutBucketTagging => "put_bucket_tagging",
            GetBucketTagging => "get_bucket_tagging",
            GetBucketQuota => "get_bucket_quota",
            GetBucketStorageInfo => "get_bucket_storage_info",
            ListObjects => "list_objects",
            DeleteObjects => "delete_objects",
            ListMultipartUploads => "list_multipart_uploads",
            AbortMultipartUpload => "abort_multipart_upload",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AttemptOutcome {
    Ok,
    Err,
    Cancelled,
}

impl<T, E> From<&Result<T, E>> for AttemptOutcome {
    fn from(value: &Result<T, E>) -> Self {
        match value {
            Ok(_) => AttemptOutcome::Ok,
            Err(_) => AttemptOutcome::Err,
        }
    }
}

impl AttemptOutcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Ok => "ok",
            AttemptOutcome::Err => "err",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }
}

pub(crate) struct BucketMetrics {
    /// Requests by type and outcome.
    pub(crate) requests: IntCounterVec,
    /// Full request duration until successful completion, error or cancellation.
    pub(crate) req_seconds: HistogramVec,
    /// Time spent waiting for a concurrency limiter permit.
    pub(crate) wait_seconds: HistogramVec,
}

impl BucketMetrics {
    pub(crate) fn observe_elapsed(
        &self,
        kind: RequestKind,
        outcome: impl Into<AttemptOutcome>,
        started_at: std::time::Instant,
    ) {
        let outcome = outcome.into();
        let labels = [kind.as_str(), outcome.as_str()];
        self.requests.with_label_values(&labels).inc();
        self.req_seconds
            .with_label_values(&labels)
            .observe(started_at.elapsed().as_secs_f64());
    }
}

impl Default for BucketMetrics {
    fn default() -> Self {
        // first bucket 100 microseconds to count requests that do not need to wait at all
        let buckets = vec![0.0001, 0.01, 0.10, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0];

        let requests = register_int_counter_vec!(
            "bucket_storage_requests_total",
            "Number of object storage requests of particular type",
            &["request_type", "result"],
        )
        .expect("failed to define a metric");

        let req_seconds = register_histogram_vec!(
            "bucket_storage_request_seconds",
            "Seconds to complete an object storage request",
            &["request_type", "result"],
            buckets.clone(),
        )
        .expect("failed to define a metric");

        let wait_seconds = register_histogram_vec!(
            "bucket_storage_wait_seconds",
            "Seconds rate limited",
            &["request_type"],
            buckets,
        )
        .expect("failed to define a metric");

        Self {
            requests,
            req_seconds,
            wait_seconds,
        }
    }
}

/// On drop (cancellation) count the request as cancelled.
pub(crate) fn start_measuring_requests(
    kind: RequestKind,
) -> ScopeGuard<std::time::Instant, impl FnOnce(std::time::Instant), scopeguard::OnSuccess> {
    scopeguard::guard_on_success(std::time::Instant::now(), move |started_at| {
        BUCKET_METRICS.observe_elapsed(kind, AttemptOutcome::Cancelled, started_at)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_measurement_counts_as_cancelled() {
        let counter = BUCKET_METRICS
            .requests
            .with_label_values(&["abort_multipart_upload", "cancelled"]);
        let before = counter.get();

        drop(start_measuring_requests(AbortMultipartUpload));
        assert_eq!(counter.get(), before + 1);

        let started_at = ScopeGuard::into_inner(start_measuring_requests(AbortMultipartUpload));
        assert_eq!(counter.get(), before + 1);

        let ok = BUCKET_METRICS
            .requests
            .with_label_values(&["abort_multipart_upload", "ok"]);
        let ok_before = ok.get();
        BUCKET_METRICS.observe_elapsed(
            AbortMultipartUpload,
            &Ok::<(), ()>(()),
            started_at,
        );
        assert_eq!(ok.get(), ok_before + 1);
    }
}
