use http::StatusCode;

/// A failed call to the object storage backend, before classification.
#[derive(Debug)]
pub struct BackendError {
    /// HTTP status of the backend response, if a response was received at all.
    pub status: Option<StatusCode>,
    pub source: anyhow::Error,
}

impl BackendError {
    pub fn new(status: Option<StatusCode>, source: anyhow::Error) -> Self {
        Self { status, source }
    }

    /// A failure without a backend response: client setup, transport, request building.
    pub fn other(source: anyhow::Error) -> Self {
        Self {
            status: None,
            source,
        }
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            source: anyhow::anyhow!(message.into()),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "status {}: {:#}", status.as_u16(), self.source),
            None => write!(f, "{:#}", self.source),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Bucket operations, as far as error reporting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketOp {
    GetMetadata,
    Create,
    Delete,
    SetTags,
    ListTags,
    StorageInfo,
    Quota,
    ListUploads,
    AbortUpload,
    ListObjects,
    DeleteObjects,
}

impl BucketOp {
    const fn action(&self) -> &'static str {
        match self {
            BucketOp::GetMetadata => "getting metadata of",
            BucketOp::Create => "creating",
            BucketOp::Delete => "deleting",
            BucketOp::SetTags => "setting tags of",
            BucketOp::ListTags => "getting tags of",
            BucketOp::StorageInfo => "getting storage of",
            BucketOp::Quota => "getting capacity of",
            BucketOp::ListUploads => "listing multipart uploads of",
            BucketOp::AbortUpload => "aborting a multipart upload of",
            BucketOp::ListObjects => "listing objects of",
            BucketOp::DeleteObjects => "deleting objects of",
        }
    }
}

/// Error taxonomy of bucket operations, in the terms the provisioning RPCs report.
#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyExists(String),
    /// The operation cannot proceed in the bucket's current state; retrying later may succeed.
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl BucketError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BucketError::NotFound(_))
    }
}

/// Maps a backend failure of `op` on `bucket` into the bucket error taxonomy.
///
/// A conflict means the bucket already exists when creating it, and that it
/// still holds objects when deleting it. Creation only singles out conflicts.
pub fn classify(op: BucketOp, bucket: &str, err: BackendError) -> BucketError {
    match (op, err.status) {
        (op, Some(StatusCode::NOT_FOUND)) if op != BucketOp::Create => {
            BucketError::NotFound(format!("OBS instance {bucket} does not exist: {err}"))
        }
        (BucketOp::Create, Some(StatusCode::CONFLICT)) => {
            BucketError::AlreadyExists(format!("OBS instance {bucket} already exists: {err}"))
        }
        (BucketOp::Delete, Some(StatusCode::CONFLICT)) => BucketError::Unavailable(format!(
            "error deleting OBS instance {bucket}, it is not empty: {err}"
        )),
        _ => BucketError::Internal(format!(
            "error {} OBS instance {bucket}: {err}",
            op.action()
        )),
    }
}

impl From<BucketError> for tonic::Status {
    fn from(err: BucketError) -> Self {
        match err {
            BucketError::NotFound(message) => tonic::Status::not_found(message),
            BucketError::AlreadyExists(message) => tonic::Status::already_exists(message),
            BucketError::Unavailable(message) => tonic::Status::unavailable(message),
            BucketError::Internal(message) => tonic::Status::internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> BackendError {
        BackendError::with_status(StatusCode::from_u16(code).unwrap(), "backend said no")
    }

    #[test]
    fn not_found_for_any_operation() {
        for op in [
            BucketOp::GetMetadata,
            BucketOp::Delete,
            BucketOp::SetTags,
            BucketOp::ListTags,
            BucketOp::StorageInfo,
            BucketOp::Quota,
        ] {
            let err = classify(op, "b1", status(404));
            assert!(err.is_not_found(), "{op:?}: {err:?}");
            assert!(err.to_string().contains("OBS instance b1 does not exist"));
        }
    }

    #[test]
    fn create_only_singles_out_conflicts() {
        let err = classify(BucketOp::Create, "b1", status(404));
        assert!(matches!(err, BucketError::Internal(_)), "{err:?}");
        assert_eq!(
            err.to_string(),
            "error creating OBS instance b1: status 404: backend said no"
        );
    }

    #[test]
    fn conflict_depends_on_operation() {
        assert!(matches!(
            classify(BucketOp::Create, "b1", status(409)),
            BucketError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify(BucketOp::Delete, "b1", status(409)),
            BucketError::Unavailable(_)
        ));
        assert!(matches!(
            classify(BucketOp::SetTags, "b1", status(409)),
            BucketError::Internal(_)
        ));
    }

    #[test]
    fn everything_else_is_internal() {
        let err = classify(BucketOp::Create, "b1", status(403));
        assert!(matches!(err, BucketError::Internal(_)));
        assert_eq!(
            err.to_string(),
            "error creating OBS instance b1: status 403: backend said no"
        );

        let err = classify(
            BucketOp::GetMetadata,
            "b1",
            BackendError::other(anyhow::anyhow!("dispatch failure")),
        );
        assert_eq!(
            err.to_string(),
            "error getting metadata of OBS instance b1: dispatch failure"
        );
    }

    #[test]
    fn grpc_codes() {
        let cases = [
            (BucketError::NotFound(String::new()), tonic::Code::NotFound),
            (
                BucketError::AlreadyExists(String::new()),
                tonic::Code::AlreadyExists,
            ),
            (
                BucketError::Unavailable(String::new()),
                tonic::Code::Unavailable,
            ),
            (BucketError::Internal(String::new()), tonic::Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(tonic::Status::from(err).code(), code);
        }
    }
}
