// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Network output: posts each batch to a collector endpoint.
//!
//! The payload is the batch's records, serialized with the configured
//! [`Serializer`] and compressed with the configured [`Compressor`]. The
//! batch identity travels as the `env`, `service` and `instance` headers.
//! A response counts as delivered only when the status is `200` and the
//! JSON body, if any, carries a zero `errCode`.

use crate::codec::{Compressor, Serializer};
use crate::config::{Config, HttpOutputConfig};
use crate::errors::{ConfigError, OutputError};
use crate::output::Output;
use crate::record::{Batch, Identity};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const HTTP_OUTPUT_NAME: &str = "http";

#[derive(Debug, Default, Deserialize)]
struct ReportResponse {
    #[serde(rename = "errCode", default)]
    err_code: i64,
    #[serde(rename = "errMsg", default)]
    err_msg: String,
}

pub struct HttpOutput {
    client: reqwest::Client,
    disable: bool,
    report_address: String,
    serializer: Serializer,
    compressor: Compressor,
    /// Headers shared by every request; identity headers are added per batch.
    headers: HeaderMap,
}

impl HttpOutput {
    pub fn new(config: &HttpOutputConfig) -> Result<Self, ConfigError> {
        let client = build_client(config).map_err(|e| ConfigError::OutputConstruction {
            name: HTTP_OUTPUT_NAME.to_string(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(config.serializer.content_type()),
        );
        if let Some(encoding) = config.compressor.content_encoding() {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        }
        if let Some(token) = &config.auth_token {
            let value =
                HeaderValue::from_str(token).map_err(|e| ConfigError::OutputConstruction {
                    name: HTTP_OUTPUT_NAME.to_string(),
                    reason: format!("invalid auth token: {e}"),
                })?;
            headers.insert(HeaderName::from_static("token"), value);
        }

        Ok(Self {
            client,
            disable: config.disable,
            report_address: config.report_address.clone(),
            serializer: config.serializer,
            compressor: config.compressor,
            headers,
        })
    }

    pub fn construct(config: &Config) -> Result<Arc<dyn Output>, ConfigError> {
        Ok(Arc::new(Self::new(&config.http)?))
    }

    fn identity_headers(&self, identity: &Identity) -> Result<HeaderMap, OutputError> {
        let mut headers = self.headers.clone();
        for (name, value) in [
            ("env", &identity.env),
            ("service", &identity.service),
            ("instance", &identity.instance),
        ] {
            let value = HeaderValue::from_str(value).map_err(|e| {
                OutputError::Serialize(format!("invalid {name} header value: {e}"))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }

    /// Serializes and compresses the records of one batch.
    pub fn encode(&self, batch: &Batch) -> Result<Vec<u8>, OutputError> {
        let payload = self.serializer.serialize(batch.records())?;
        self.compressor.compress(&payload)
    }
}

fn build_client(config: &HttpOutputConfig) -> Result<reqwest::Client, reqwest::Error> {
    let mut client = reqwest::Client::builder().timeout(config.report_timeout);
    if let Some(https_uri) = &config.https_proxy {
        client = client.proxy(reqwest::Proxy::https(https_uri.clone())?);
    }
    client.build()
}

#[async_trait]
impl Output for HttpOutput {
    fn name(&self) -> &str {
        HTTP_OUTPUT_NAME
    }

    async fn out(&self, batch: &Batch) -> Result<(), OutputError> {
        if self.disable || batch.is_empty() {
            return Ok(());
        }

        let headers = self.identity_headers(batch.identity())?;
        let body = self.encode(batch)?;
        let body_len = body.len();

        let resp = self
            .client
            .post(&self.report_address)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if status != StatusCode::OK {
            return Err(OutputError::Status { status, body: text });
        }

        if !text.trim().is_empty() {
            match serde_json::from_str::<ReportResponse>(&text) {
                Ok(report) if report.err_code != 0 => {
                    return Err(OutputError::Rejected {
                        code: report.err_code,
                        message: report.err_msg,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("Unreadable collector response, assuming success: {e}"),
            }
        }

        debug!(
            "Posted {} records ({body_len} bytes) to {}",
            batch.len(),
            self.report_address
        );
        Ok(())
    }
}
