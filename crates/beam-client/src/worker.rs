// Client for the worker HTTP contract.

use std::path::Path;

use beam_proto::{HealthReport, JobId, JobPayload, JobStatus, ProbeReply, SegmentListing, SubmitAck};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::BeamError;

const API_KEY_HEADER: &str = "X-API-Key";

/// One remote worker endpoint.
///
/// Cloning is cheap; the underlying `reqwest::Client` is shared.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    base: Url,
    http: Client,
    config: ClientConfig,
}

impl WorkerClient {
    pub fn new(base_url: &str, http: Client, config: ClientConfig) -> Result<Self, BeamError> {
        let trimmed = base_url.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/"))
            .map_err(|e| BeamError::invalid_url(base_url, e.to_string()))?;
        Ok(Self { base, http, config })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, BeamError> {
        self.base
            .join(path)
            .map_err(|e| BeamError::invalid_url(path, e.to_string()))
    }

    pub(crate) fn with_key(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    /// `GET /health`. The 2 s connect timeout lives on the shared client;
    /// the overall budget here is the status timeout.
    pub async fn health(&self) -> Result<HealthReport, BeamError> {
        let url = self.endpoint("health")?;
        let response = self
            .with_key(self.http.get(url.clone()))
            .timeout(self.config.status_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "health"));
        }
        Ok(response.json().await?)
    }

    /// `GET /probe?path=…` on an `@local` worker.
    pub async fn probe(&self, media_path: &str) -> Result<f64, BeamError> {
        let url = self.endpoint("probe")?;
        let response = self
            .with_key(self.http.get(url.clone()).query(&[("path", media_path)]))
            .timeout(self.config.submit_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "probe"));
        }
        let reply: ProbeReply = response.json().await?;
        Ok(reply.duration)
    }

    /// `POST /transcode`. Accepts `pending`/`queued`/`running` as success.
    pub async fn submit(&self, payload: &JobPayload) -> Result<SubmitAck, BeamError> {
        let url = self.endpoint("transcode")?;
        debug!(job_id = %payload.job_id, worker = %self.base, "submitting job");
        let response = self
            .with_key(self.http.post(url.clone()).json(payload))
            .timeout(self.config.submit_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "submit"));
        }
        let ack: SubmitAck = response.json().await?;
        if !ack.status.is_accepted() {
            return Err(BeamError::JobRejected {
                job_id: payload.job_id.to_string(),
                status: ack.status.to_string(),
            });
        }
        Ok(ack)
    }

    /// `GET /status/<job_id>` within the per-tick 5 s budget.
    pub async fn status(&self, job_id: &JobId) -> Result<JobStatus, BeamError> {
        let url = self.endpoint(&format!("status/{job_id}"))?;
        let response = self
            .with_key(self.http.get(url.clone()))
            .timeout(self.config.status_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "status"));
        }
        Ok(response.json().await?)
    }

    /// `GET /beam/segments/<job_id>` — filenames available for download.
    pub async fn list_segments(&self, job_id: &JobId) -> Result<Vec<String>, BeamError> {
        let url = self.endpoint(&format!("beam/segments/{job_id}"))?;
        let response = self
            .with_key(self.http.get(url.clone()))
            .timeout(self.config.status_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "segments"));
        }
        let listing: SegmentListing = response.json().await?;
        Ok(listing.files)
    }

    /// `GET /beam/segment/<job_id>/<name>` streamed to `dest`.
    ///
    /// The body lands in a `.part` sibling first and is renamed into place
    /// so a watching media server never reads a torn segment.
    pub async fn fetch_segment_to(
        &self,
        job_id: &JobId,
        name: &str,
        dest: &Path,
    ) -> Result<u64, BeamError> {
        let url = self.endpoint(&format!("beam/segment/{job_id}/{name}"))?;
        let response = self
            .with_key(self.http.get(url.clone()))
            .timeout(self.config.segment_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "segment"));
        }

        let part = dest.with_extension("part");
        let mut file = tokio::fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part, dest).await?;
        trace!(name, bytes = written, dest = %dest.display(), "segment downloaded");
        Ok(written)
    }

    /// `GET /beam/segment/<job_id>/<name>` into memory; used for manifests,
    /// which need rewriting before they touch disk.
    pub async fn fetch_segment_bytes(
        &self,
        job_id: &JobId,
        name: &str,
    ) -> Result<Vec<u8>, BeamError> {
        let url = self.endpoint(&format!("beam/segment/{job_id}/{name}"))?;
        let response = self
            .with_key(self.http.get(url.clone()))
            .timeout(self.config.segment_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "segment"));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Best-effort `DELETE /job/<job_id>`; a 404 means the worker already
    /// forgot the job and counts as success.
    pub async fn cancel(&self, job_id: &JobId) -> Result<(), BeamError> {
        let url = self.endpoint(&format!("job/{job_id}"))?;
        let response = self
            .with_key(self.http.delete(url.clone()))
            .timeout(self.config.status_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            warn!(%job_id, %status, "job cancel refused");
            Err(BeamError::http_status(status, url, "cancel"))
        }
    }

    /// `DELETE /beam/stage/<id>` for a staged upload.
    pub async fn delete_stage(&self, stage_id: &str) -> Result<(), BeamError> {
        let url = self.endpoint(&format!("beam/stage/{stage_id}"))?;
        let response = self
            .with_key(self.http.delete(url.clone()))
            .timeout(self.config.status_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(BeamError::http_status(status, url, "stage delete"))
        }
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_client;

    fn client() -> WorkerClient {
        let config = ClientConfig::default();
        let http = create_client(&config).unwrap();
        WorkerClient::new("http://worker:8099", http, config).unwrap()
    }

    #[test]
    fn endpoint_joining_keeps_base_path() {
        let c = client();
        assert_eq!(c.endpoint("health").unwrap().as_str(), "http://worker:8099/health");
        assert_eq!(
            c.endpoint("beam/segments/s_c0").unwrap().as_str(),
            "http://worker:8099/beam/segments/s_c0"
        );
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let config = ClientConfig::default();
        let http = create_client(&config).unwrap();
        let c = WorkerClient::new("http://worker:8099///", http, config).unwrap();
        assert_eq!(c.endpoint("health").unwrap().as_str(), "http://worker:8099/health");
    }

    #[test]
    fn garbage_url_is_rejected() {
        let config = ClientConfig::default();
        let http = create_client(&config).unwrap();
        assert!(WorkerClient::new("not a url", http, config).is_err());
    }
}
