//! gRPC interceptors for cross-cutting concerns.

use tonic::{Request, Status};

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Interceptor that surfaces caller trace context on the current span.
///
/// Reads `traceparent` and `x-request-id` from incoming metadata. Requests
/// are never rejected.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = extract_traceparent(&request) {
        tracing::debug!(traceparent = %traceparent, "Received trace context");
    }

    if let Some(request_id) = extract_request_id(&request) {
        tracing::Span::current().record("request_id", request_id.as_str());
    }

    Ok(request)
}

/// Extract the traceparent header value, if present.
pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    metadata_str(request, TRACEPARENT_KEY)
}

/// Extract the caller-supplied request ID, if present.
pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    metadata_str(request, REQUEST_ID_KEY)
}

fn metadata_str<T>(request: &Request<T>, key: &str) -> Option<String> {
    request
        .metadata()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_read_from_metadata() {
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(REQUEST_ID_KEY, "req-42".parse().unwrap());

        assert_eq!(extract_request_id(&request), Some("req-42".to_string()));
        assert_eq!(extract_traceparent(&request), None);
    }

    #[test]
    fn interceptor_passes_requests_through() {
        let mut request = Request::new(());
        request.metadata_mut().insert(
            TRACEPARENT_KEY,
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
                .parse()
                .unwrap(),
        );

        let passed = trace_context_interceptor(request).unwrap();
        assert!(extract_traceparent(&passed).is_some());
    }
}
