//! In-process request and upstream counters with a Prometheus text view.
//!
//! Every family lives in one `BTreeMap` behind a single mutex: recording is a
//! couple of map bumps, and `render` walks the maps in key order, which is
//! exactly the sorted-label order the exposition promises. Counters never
//! decrease and `*_sum` / `*_count` entries are always updated together.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;

#[derive(Default)]
struct Families {
    requests_total: BTreeMap<(String, String, u16), u64>,
    request_latency_sum: BTreeMap<(String, String), f64>,
    request_latency_count: BTreeMap<(String, String), u64>,
    upstream_retries_total: BTreeMap<String, u64>,
    upstream_latency_sum: BTreeMap<String, f64>,
    upstream_latency_count: BTreeMap<String, u64>,
    upstream_errors_total: BTreeMap<String, u64>,
    rate_limited_total: u64,
}

#[derive(Default)]
pub struct MetricsRegistry {
    families: Mutex<Families>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, route: &str, method: &str, status: u16, latency_s: f64) {
        let mut families = self.families.lock().unwrap();
        *families
            .requests_total
            .entry((route.to_string(), method.to_string(), status))
            .or_insert(0) += 1;
        *families
            .request_latency_sum
            .entry((route.to_string(), method.to_string()))
            .or_insert(0.0) += latency_s;
        *families
            .request_latency_count
            .entry((route.to_string(), method.to_string()))
            .or_insert(0) += 1;
    }

    pub fn record_upstream_retry(&self, path: &str) {
        let mut families = self.families.lock().unwrap();
        *families
            .upstream_retries_total
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_upstream_latency(&self, path: &str, latency_s: f64) {
        let mut families = self.families.lock().unwrap();
        *families
            .upstream_latency_sum
            .entry(path.to_string())
            .or_insert(0.0) += latency_s;
        *families
            .upstream_latency_count
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_upstream_error(&self, path: &str) {
        let mut families = self.families.lock().unwrap();
        *families
            .upstream_errors_total
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_rate_limited(&self) {
        self.families.lock().unwrap().rate_limited_total += 1;
    }

    /// Render the Prometheus v0.0.4 text exposition.
    pub fn render(&self) -> String {
        let families = self.families.lock().unwrap();
        let mut out = String::new();

        out.push_str("# HELP proxy_requests_total Total requests handled by the proxy\n");
        out.push_str("# TYPE proxy_requests_total counter\n");
        for ((route, method, status), value) in &families.requests_total {
            let _ = writeln!(
                out,
                "proxy_requests_total{{route=\"{route}\",method=\"{method}\",status=\"{status}\"}} {value}"
            );
        }

        out.push_str("# HELP proxy_request_latency_seconds_sum Sum of request latency in seconds\n");
        out.push_str("# TYPE proxy_request_latency_seconds_sum counter\n");
        for ((route, method), value) in &families.request_latency_sum {
            let _ = writeln!(
                out,
                "proxy_request_latency_seconds_sum{{route=\"{route}\",method=\"{method}\"}} {value:.6}"
            );
        }

        out.push_str(
            "# HELP proxy_request_latency_seconds_count Count of request latency measurements\n",
        );
        out.push_str("# TYPE proxy_request_latency_seconds_count counter\n");
        for ((route, method), value) in &families.request_latency_count {
            let _ = writeln!(
                out,
                "proxy_request_latency_seconds_count{{route=\"{route}\",method=\"{method}\"}} {value}"
            );
        }

        out.push_str("# HELP proxy_upstream_retries_total Total upstream retries\n");
        out.push_str("# TYPE proxy_upstream_retries_total counter\n");
        for (route, value) in &families.upstream_retries_total {
            let _ = writeln!(out, "proxy_upstream_retries_total{{route=\"{route}\"}} {value}");
        }

        out.push_str("# HELP proxy_upstream_latency_seconds_sum Sum of upstream latency in seconds\n");
        out.push_str("# TYPE proxy_upstream_latency_seconds_sum counter\n");
        for (route, value) in &families.upstream_latency_sum {
            let _ = writeln!(
                out,
                "proxy_upstream_latency_seconds_sum{{route=\"{route}\"}} {value:.6}"
            );
        }

        out.push_str(
            "# HELP proxy_upstream_latency_seconds_count Count of upstream latency measurements\n",
        );
        out.push_str("# TYPE proxy_upstream_latency_seconds_count counter\n");
        for (route, value) in &families.upstream_latency_count {
            let _ = writeln!(
                out,
                "proxy_upstream_latency_seconds_count{{route=\"{route}\"}} {value}"
            );
        }

        out.push_str("# HELP proxy_upstream_errors_total Total upstream errors\n");
        out.push_str("# TYPE proxy_upstream_errors_total counter\n");
        for (route, value) in &families.upstream_errors_total {
            let _ = writeln!(out, "proxy_upstream_errors_total{{route=\"{route}\"}} {value}");
        }

        out.push_str("# HELP proxy_rate_limited_total Total requests rejected by rate limit\n");
        out.push_str("# TYPE proxy_rate_limited_total counter\n");
        let _ = writeln!(out, "proxy_rate_limited_total {}", families.rate_limited_total);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_empty_registry() {
        let metrics = MetricsRegistry::new();
        let text = metrics.render();
        assert!(text.contains("# TYPE proxy_requests_total counter"));
        assert!(text.contains("proxy_rate_limited_total 0"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_request_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.record_request("/v1/models", "GET", 200, 0.25);
        metrics.record_request("/v1/models", "GET", 200, 0.75);
        metrics.record_request("/v1/models", "GET", 503, 0.1);

        let text = metrics.render();
        assert!(text.contains("proxy_requests_total{route=\"/v1/models\",method=\"GET\",status=\"200\"} 2"));
        assert!(text.contains("proxy_requests_total{route=\"/v1/models\",method=\"GET\",status=\"503\"} 1"));
        assert!(text.contains("proxy_request_latency_seconds_sum{route=\"/v1/models\",method=\"GET\"} 1.100000"));
        assert!(text.contains("proxy_request_latency_seconds_count{route=\"/v1/models\",method=\"GET\"} 3"));
    }

    #[test]
    fn test_sample_lines_sorted_by_labels() {
        let metrics = MetricsRegistry::new();
        metrics.record_upstream_retry("/v1/models");
        metrics.record_upstream_retry("/v1/chat/completions");

        let text = metrics.render();
        let chat = text
            .find("proxy_upstream_retries_total{route=\"/v1/chat/completions\"}")
            .unwrap();
        let models = text
            .find("proxy_upstream_retries_total{route=\"/v1/models\"}")
            .unwrap();
        assert!(chat < models);
    }

    #[test]
    fn test_upstream_latency_fixed_point() {
        let metrics = MetricsRegistry::new();
        metrics.record_upstream_latency("/v1/embeddings", 0.5);
        let text = metrics.render();
        assert!(text.contains("proxy_upstream_latency_seconds_sum{route=\"/v1/embeddings\"} 0.500000"));
        assert!(text.contains("proxy_upstream_latency_seconds_count{route=\"/v1/embeddings\"} 1"));
    }

    #[test]
    fn test_rate_limited_scalar() {
        let metrics = MetricsRegistry::new();
        metrics.record_rate_limited();
        metrics.record_rate_limited();
        assert!(metrics.render().contains("proxy_rate_limited_total 2"));
    }
}
