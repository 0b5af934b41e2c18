//! Amazon CloudWatch custom metrics.
//!
//! Each numeric metric is sent as its own `PutMetricData` call in the
//! `logster` namespace, dimensioned by the EC2 instance id read from the
//! instance metadata service. Requests are signed with AWS Signature
//! Version 4.
//!
//! Errors here are fatal for the process (see [`SinkError::is_fatal`]).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use super::{Sink, SinkError, SinkKind, SubmitContext};
use crate::metric::{Metric, MetricValue};

pub const NAMESPACE: &str = "logster";
pub const DEFAULT_REGION: &str = "us-east-1";
const METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/instance-id";
const API_VERSION: &str = "2010-08-01";
const SERVICE: &str = "monitoring";
const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const SEPARATOR: &str = ".";

#[derive(Debug, Error)]
pub enum CloudWatchError {
    #[error("cannot determine EC2 instance id, is this machine really on EC2? {0}")]
    InstanceId(String),

    #[error("PutMetricData for {metric} failed: {message}")]
    Put { metric: String, message: String },

    #[error("cannot build HTTP client: {0}")]
    Client(String),

    #[error("cannot sign request: {0}")]
    Signing(String),
}

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// One data point as sent to CloudWatch.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDatum {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricDatum {
    /// `None` when the value is not numeric.
    pub fn from_metric(name: String, metric: &Metric) -> Option<Self> {
        let value = match &metric.value {
            MetricValue::Float(v) => *v,
            MetricValue::Int(v) => *v as f64,
            MetricValue::Text(s) => s.trim().parse().ok()?,
        };
        Some(Self {
            name,
            value,
            timestamp: minute_of(metric.timestamp),
        })
    }
}

/// CloudWatch timestamps are truncated to the minute.
fn minute_of(unix_secs: i64) -> DateTime<Utc> {
    let truncated = unix_secs - unix_secs.rem_euclid(60);
    Utc.timestamp_opt(truncated, 0).single().unwrap_or_default()
}

/// The two remote calls the sink needs.
pub trait CloudWatchApi {
    fn instance_id(&self) -> Result<String, CloudWatchError>;

    fn put_metric_data(&self, datum: &MetricDatum, instance_id: &str)
    -> Result<(), CloudWatchError>;
}

/// [`CloudWatchApi`] over HTTPS with `reqwest`.
pub struct HttpCloudWatch {
    client: reqwest::blocking::Client,
    credentials: AwsCredentials,
    region: String,
    host: String,
}

impl HttpCloudWatch {
    pub fn new(credentials: AwsCredentials, region: &str) -> Result<Self, CloudWatchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CloudWatchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            credentials,
            region: region.to_string(),
            host: format!("{}.{}.amazonaws.com", SERVICE, region),
        })
    }
}

impl CloudWatchApi for HttpCloudWatch {
    fn instance_id(&self) -> Result<String, CloudWatchError> {
        let response = self
            .client
            .get(METADATA_URL)
            .timeout(Duration::from_secs(2))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| CloudWatchError::InstanceId(e.to_string()))?;
        let id = response
            .text()
            .map_err(|e| CloudWatchError::InstanceId(e.to_string()))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(CloudWatchError::InstanceId(
                "metadata service returned an empty id".to_string(),
            ));
        }
        Ok(id.to_string())
    }

    fn put_metric_data(
        &self,
        datum: &MetricDatum,
        instance_id: &str,
    ) -> Result<(), CloudWatchError> {
        let body = put_metric_body(datum, instance_id);
        let now = Utc::now();
        let authorization = authorization(&self.credentials, &self.region, &self.host, now, &body)?;

        let put_error = |message: String| CloudWatchError::Put {
            metric: datum.name.clone(),
            message,
        };
        let response = self
            .client
            .post(format!("https://{}/", self.host))
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Date", amz_date(now))
            .header("Authorization", authorization)
            .body(body)
            .send()
            .map_err(|e| put_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(put_error(format!("HTTP {}: {}", status, detail.trim())));
        }
        Ok(())
    }
}

pub struct CloudWatchSink<A: CloudWatchApi> {
    api: A,
}

impl<A: CloudWatchApi> CloudWatchSink<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: CloudWatchApi> Sink for CloudWatchSink<A> {
    fn kind(&self) -> SinkKind {
        SinkKind::Cloudwatch
    }

    fn target(&self) -> String {
        NAMESPACE.to_string()
    }

    fn submit(&self, metrics: &[Metric], ctx: &mut SubmitContext<'_>) -> Result<(), SinkError> {
        let mut data = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let name = ctx.naming.apply(&metric.name, SEPARATOR);
            match MetricDatum::from_metric(name, metric) {
                Some(datum) => data.push(datum),
                None => warn!(
                    "Cannot send {} to CloudWatch, {} is not a numeric value.",
                    metric.name, metric.value
                ),
            }
        }

        if ctx.dry_run {
            for datum in &data {
                writeln!(
                    ctx.out,
                    "{} {} {}",
                    datum.name,
                    MetricValue::Float(datum.value),
                    datum.timestamp.format("%Y%m%dT%H:%M:00Z")
                )?;
            }
            return Ok(());
        }

        if data.is_empty() {
            return Ok(());
        }

        let instance_id = self.api.instance_id()?;
        for datum in &data {
            debug!(
                "Submitting CloudWatch metric: {} {} {}",
                datum.name, datum.value, datum.timestamp
            );
            self.api.put_metric_data(datum, &instance_id)?;
        }
        Ok(())
    }
}

/// Form-encoded `PutMetricData` request body.
pub fn put_metric_body(datum: &MetricDatum, instance_id: &str) -> String {
    let params = [
        ("Action", "PutMetricData".to_string()),
        ("Version", API_VERSION.to_string()),
        ("Namespace", NAMESPACE.to_string()),
        ("MetricData.member.1.MetricName", datum.name.clone()),
        ("MetricData.member.1.Value", datum.value.to_string()),
        ("MetricData.member.1.Unit", "None".to_string()),
        (
            "MetricData.member.1.Timestamp",
            datum.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ),
        ("MetricData.member.1.Dimensions.member.1.Name", "InstanceId".to_string()),
        ("MetricData.member.1.Dimensions.member.1.Value", instance_id.to_string()),
    ];
    params
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes everything except RFC 3986 unreserved characters.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn amz_date(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CloudWatchError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| CloudWatchError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(
    secret_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, CloudWatchError> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// `Authorization` header value for a POST of `body` to `host` at `at`.
pub fn authorization(
    credentials: &AwsCredentials,
    region: &str,
    host: &str,
    at: DateTime<Utc>,
    body: &str,
) -> Result<String, CloudWatchError> {
    let amz_date = amz_date(at);
    let date = at.format("%Y%m%d").to_string();
    let signed_headers = "content-type;host;x-amz-date";

    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{}\nhost:{}\nx-amz-date:{}\n\n{}\n{}",
        CONTENT_TYPE,
        host,
        amz_date,
        signed_headers,
        hex::encode(Sha256::digest(body.as_bytes()))
    );
    let scope = format!("{}/{}/{}/aws4_request", date, region, SERVICE);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&credentials.secret_key, &date, region, SERVICE)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key, scope, signed_headers, signature
    ))
}
