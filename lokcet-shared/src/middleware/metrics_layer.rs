use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

const REQUEST_DURATION: &str = "http_request_duration_seconds";

/// Uploads dominate the tail, so the buckets reach further than the defaults.
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn is_live_stream(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
        || req.uri().path().ends_with("/stream")
}

/// Records per-route request counts and latencies. Live streams are counted
/// separately since their response head returns long before they end.
pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let live = is_live_stream(&req);

    gauge!("http_requests_in_flight").increment(1.0);
    let response = next.run(req).await;
    gauge!("http_requests_in_flight").decrement(1.0);

    let status = response.status().as_u16().to_string();
    if live {
        counter!("live_streams_opened_total", "route" => route, "status" => status).increment(1);
        return response;
    }

    let labels = [("method", method), ("route", route), ("status", status)];
    counter!("http_requests_total", &labels).increment(1);
    histogram!(REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}

/// Installs the global Prometheus recorder and returns the handle `/metrics` renders.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), DURATION_BUCKETS)?
        .install_recorder()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_requests_are_recognised() {
        let by_path = Request::builder().uri("/chatrooms/stream").body(Body::empty()).unwrap();
        assert!(is_live_stream(&by_path));

        let by_accept = Request::builder()
            .uri("/friends")
            .header(header::ACCEPT, "text/event-stream")
            .body(Body::empty())
            .unwrap();
        assert!(is_live_stream(&by_accept));

        let plain = Request::builder().uri("/feed").body(Body::empty()).unwrap();
        assert!(!is_live_stream(&plain));
    }
}
