//! Upstream HTTP forwarding with retry and backoff.
//!
//! All three operations share the same contract: attempts are numbered
//! `0..=max_retries`, a retriable status ({429, 500, 502, 503, 504}) or any
//! transport error triggers a backoff-then-retry, non-retriable statuses
//! come back immediately, and after the last attempt the final upstream
//! response is returned verbatim. Transport failures that survive every
//! attempt map to 504 (timeout) or 502 (anything else).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::config::Settings;
use crate::metrics::MetricsRegistry;
use crate::proxy::error::ProxyError;

const RETRIABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// A fully buffered upstream reply.
pub struct UpstreamReply {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: String,
}

pub struct UpstreamClient {
    connect_timeout: Duration,
    max_retries: u32,
    backoff_base_s: f64,
    metrics: Arc<MetricsRegistry>,
}

impl UpstreamClient {
    pub fn new(settings: &Settings, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            connect_timeout: Duration::from_secs_f64(settings.connect_timeout_s),
            max_retries: settings.max_retries,
            backoff_base_s: settings.retry_backoff_s,
            metrics,
        }
    }

    pub async fn get(
        &self,
        base: &str,
        path: &str,
        read_timeout: Duration,
        request_id: &str,
    ) -> Result<UpstreamReply, ProxyError> {
        self.fetch(base, path, None, read_timeout, request_id).await
    }

    pub async fn post_json(
        &self,
        base: &str,
        path: &str,
        payload: &Value,
        read_timeout: Duration,
        request_id: &str,
    ) -> Result<UpstreamReply, ProxyError> {
        self.fetch(base, path, Some(payload), read_timeout, request_id)
            .await
    }

    /// POST and hand the open response to the caller without buffering.
    ///
    /// Mid-retry responses are dropped (closing body and connection) before
    /// the backoff sleep. On success the returned `Response` owns the
    /// connection; dropping it on any exit path, including a client
    /// disconnect, releases the transport.
    pub async fn post_stream(
        &self,
        base: &str,
        path: &str,
        payload: &Value,
        read_timeout: Duration,
        request_id: &str,
    ) -> Result<reqwest::Response, ProxyError> {
        for attempt in 0..=self.max_retries {
            let started = Instant::now();
            match self.send(base, path, Some(payload), read_timeout, request_id).await {
                Ok(response) => {
                    self.metrics
                        .record_upstream_latency(path, started.elapsed().as_secs_f64());
                    if is_retriable(response.status().as_u16()) && attempt < self.max_retries {
                        self.metrics.record_upstream_retry(path);
                        drop(response);
                        self.sleep_before_retry(attempt).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    self.metrics.record_upstream_error(path);
                    if attempt < self.max_retries {
                        self.metrics.record_upstream_retry(path);
                        self.sleep_before_retry(attempt).await;
                        continue;
                    }
                    return Err(map_transport_error(&err, path));
                }
            }
        }
        Err(ProxyError::BadGateway(format!(
            "Failed to reach upstream on {path}"
        )))
    }

    async fn fetch(
        &self,
        base: &str,
        path: &str,
        payload: Option<&Value>,
        read_timeout: Duration,
        request_id: &str,
    ) -> Result<UpstreamReply, ProxyError> {
        for attempt in 0..=self.max_retries {
            let started = Instant::now();
            match self.send(base, path, payload, read_timeout, request_id).await {
                Ok(response) => {
                    self.metrics
                        .record_upstream_latency(path, started.elapsed().as_secs_f64());
                    let status = response.status();
                    if is_retriable(status.as_u16()) && attempt < self.max_retries {
                        self.metrics.record_upstream_retry(path);
                        drop(response);
                        self.sleep_before_retry(attempt).await;
                        continue;
                    }

                    let content_type = response
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("application/json")
                        .to_string();
                    match response.bytes().await {
                        Ok(body) => {
                            return Ok(UpstreamReply {
                                status,
                                body,
                                content_type,
                            })
                        }
                        Err(err) => {
                            // Reading the body is part of the attempt; a
                            // failure here retries like any transport error.
                            self.metrics.record_upstream_error(path);
                            if attempt < self.max_retries {
                                self.metrics.record_upstream_retry(path);
                                self.sleep_before_retry(attempt).await;
                                continue;
                            }
                            return Err(map_transport_error(&err, path));
                        }
                    }
                }
                Err(err) => {
                    self.metrics.record_upstream_error(path);
                    if attempt < self.max_retries {
                        self.metrics.record_upstream_retry(path);
                        self.sleep_before_retry(attempt).await;
                        continue;
                    }
                    return Err(map_transport_error(&err, path));
                }
            }
        }
        Err(ProxyError::BadGateway(format!(
            "Failed to reach upstream on {path}"
        )))
    }

    async fn send(
        &self,
        base: &str,
        path: &str,
        payload: Option<&Value>,
        read_timeout: Duration,
        request_id: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let client = self.build_client(read_timeout)?;
        let url = format!("{base}{path}");
        let builder = match payload {
            Some(payload) => client.post(&url).json(payload),
            None => client.get(&url),
        };
        builder.header("x-request-id", request_id).send().await
    }

    fn build_client(&self, read_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(read_timeout)
            .pool_idle_timeout(self.connect_timeout)
            .build()
    }

    async fn sleep_before_retry(&self, attempt: u32) {
        tokio::time::sleep(backoff_delay(self.backoff_base_s, attempt)).await;
    }
}

fn is_retriable(status: u16) -> bool {
    RETRIABLE_STATUS_CODES.contains(&status)
}

fn backoff_delay(base_s: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(base_s * f64::powi(2.0, attempt as i32))
}

fn map_transport_error(err: &reqwest::Error, path: &str) -> ProxyError {
    if err.is_timeout() {
        ProxyError::GatewayTimeout(format!("Upstream timeout on {path}"))
    } else {
        ProxyError::BadGateway(format!("Upstream request failed on {path}"))
    }
}
