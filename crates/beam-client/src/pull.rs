// Client for the localhost S3 pull proxy.
//
// Remote https workers cannot reach the media disk, so the input interval
// is parked behind a pre-signed URL: the proxy accepts a chunked PUT and
// answers with a GET URL the worker pulls from.

use std::process::Stdio;

use serde_json::Value;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use url::Url;

use crate::config::ClientConfig;
use crate::error::BeamError;

#[derive(Debug, Clone)]
pub struct PullProxyClient {
    base: Url,
    http: reqwest::Client,
    config: ClientConfig,
}

impl PullProxyClient {
    pub fn new(
        base_url: &str,
        http: reqwest::Client,
        config: ClientConfig,
    ) -> Result<Self, BeamError> {
        let trimmed = base_url.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/"))
            .map_err(|e| BeamError::invalid_url(base_url, e.to_string()))?;
        Ok(Self { base, http, config })
    }

    fn upload_url(&self, id: &str) -> Result<Url, BeamError> {
        self.base
            .join(&format!("upload/{id}.mkv"))
            .map_err(|e| BeamError::invalid_url(id, e.to_string()))
    }

    /// Copy-remux `input` (optionally an interval) through ffmpeg and PUT
    /// the Matroska bytes to the proxy. Returns the pre-signed pull URL.
    pub async fn upload_interval(
        &self,
        id: &str,
        input: &str,
        ss: Option<f64>,
        t: Option<f64>,
    ) -> Result<String, BeamError> {
        let mut cmd = Command::new(&self.config.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        if let Some(ss) = ss {
            if ss > 0.0 {
                cmd.arg("-ss").arg(format!("{ss:.3}"));
            }
        }
        if let Some(t) = t {
            cmd.arg("-t").arg(format!("{t:.3}"));
        }
        cmd.arg("-i")
            .arg(input)
            .arg("-map")
            .arg("0")
            .arg("-c")
            .arg("copy")
            .arg("-f")
            .arg("matroska")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| BeamError::RemuxSpawn {
            program: self.config.ffmpeg_path.clone(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BeamError::RemuxSpawn {
            program: self.config.ffmpeg_path.clone(),
            source: std::io::Error::other("remux stdout unavailable"),
        })?;

        let url = self.upload_url(id)?;
        debug!(%url, input, "staging input via pull proxy");
        let response = self
            .http
            .put(url.clone())
            .timeout(self.config.staged_upload_timeout)
            .body(reqwest::Body::wrap_stream(ReaderStream::with_capacity(
                stdout,
                256 * 1024,
            )))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let _ = child.kill().await;
                return Err(e.into());
            }
        };
        let remux_status = child.wait().await?;
        if !remux_status.success() {
            return Err(BeamError::RemuxFailed {
                status: remux_status,
            });
        }
        if !response.status().is_success() {
            return Err(BeamError::http_status(response.status(), url, "proxy upload"));
        }

        let body: Value = response.json().await?;
        let pull_url = body
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| BeamError::invalid_response("proxy upload", "missing `url` field"))?
            .to_owned();
        info!(id, "input staged behind pre-signed URL");
        Ok(pull_url)
    }

    /// `DELETE <proxy>/upload/<id>.mkv`; 404 counts as already cleaned.
    pub async fn delete(&self, id: &str) -> Result<(), BeamError> {
        let url = self.upload_url(id)?;
        let response = self
            .http
            .delete(url.clone())
            .timeout(self.config.status_timeout)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(BeamError::http_status(status, url, "proxy delete"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::create_client;

    #[test]
    fn upload_url_shape() {
        let config = ClientConfig::default();
        let http = create_client(&config).unwrap();
        let proxy = PullProxyClient::new("http://127.0.0.1:9777", http, config).unwrap();
        assert_eq!(
            proxy.upload_url("20260802_99_c3").unwrap().as_str(),
            "http://127.0.0.1:9777/upload/20260802_99_c3.mkv"
        );
    }
}
