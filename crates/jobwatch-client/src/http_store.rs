use async_trait::async_trait;
use jobwatch_core::{new_request_id, Job, JobStore, JobStoreError};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};

const ERROR_BODY_PREVIEW_CHARS: usize = 512;

#[derive(Debug, Clone)]
/// Connection settings for the job record HTTP API.
pub struct HttpJobStoreConfig {
    pub api_base: String,
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for HttpJobStoreConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080/api".to_string(),
            auth_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
/// `JobStore` backed by `GET {api_base}/jobs/{id}`.
pub struct HttpJobStore {
    client: reqwest::Client,
    api_base: Url,
}

impl HttpJobStore {
    pub fn new(config: HttpJobStoreConfig) -> Result<Self, JobStoreError> {
        let api_base = Url::parse(config.api_base.trim()).map_err(|error| {
            JobStoreError::InvalidEndpoint(format!("{}: {error}", config.api_base))
        })?;
        if api_base.cannot_be_a_base() {
            return Err(JobStoreError::InvalidEndpoint(config.api_base));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = config
            .auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            let bearer = format!("Bearer {token}");
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer).map_err(|error| {
                    JobStoreError::InvalidEndpoint(format!("invalid auth token header: {error}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()
            .map_err(|error| JobStoreError::Transport(error.to_string()))?;

        Ok(Self { client, api_base })
    }

    fn job_url(&self, job_id: &str) -> Result<Url, JobStoreError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| JobStoreError::InvalidEndpoint(self.api_base.to_string()))?
            .pop_if_empty()
            .push("jobs")
            .push(job_id);
        Ok(url)
    }
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn get_job(&self, job_id: &str) -> Result<Job, JobStoreError> {
        let url = self.job_url(job_id)?;
        let response = self
            .client
            .get(url)
            .header("x-jobwatch-request-id", new_request_id())
            .send()
            .await
            .map_err(|error| JobStoreError::Transport(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(JobStoreError::NotFound {
                job_id: job_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JobStoreError::HttpStatus {
                status: status.as_u16(),
                body: truncate_for_error(&body),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| JobStoreError::Transport(error.to_string()))?;
        let job = serde_json::from_slice::<Job>(&bytes)
            .map_err(|error| JobStoreError::Decode(error.to_string()))?;
        if job.id != job_id {
            return Err(JobStoreError::Decode(format!(
                "requested job '{job_id}' but received '{}'",
                job.id
            )));
        }
        tracing::debug!(
            job_id = job_id,
            status = job.status.as_str(),
            percentage = job.progress.percentage,
            "fetched job record"
        );
        Ok(job)
    }
}

fn truncate_for_error(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_PREVIEW_CHARS {
        return body.to_string();
    }
    let mut preview = body
        .chars()
        .take(ERROR_BODY_PREVIEW_CHARS)
        .collect::<String>();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::{truncate_for_error, HttpJobStore, HttpJobStoreConfig};
    use jobwatch_core::JobStoreError;

    fn store(api_base: &str) -> HttpJobStore {
        HttpJobStore::new(HttpJobStoreConfig {
            api_base: api_base.to_string(),
            auth_token: None,
            request_timeout_ms: 1_000,
        })
        .expect("store builds")
    }

    #[test]
    fn unit_job_url_appends_encoded_segments() {
        let store = store("http://localhost:9000/api/");
        let url = store.job_url("job 1/2").expect("url");
        assert_eq!(url.as_str(), "http://localhost:9000/api/jobs/job%201%2F2");

        let bare = self::store("http://localhost:9000");
        assert_eq!(
            bare.job_url("job-9").expect("url").as_str(),
            "http://localhost:9000/jobs/job-9"
        );
    }

    #[test]
    fn regression_invalid_api_base_is_rejected() {
        let error = HttpJobStore::new(HttpJobStoreConfig {
            api_base: "not a url".to_string(),
            ..HttpJobStoreConfig::default()
        })
        .expect_err("invalid base");
        assert!(matches!(error, JobStoreError::InvalidEndpoint(_)));

        let error = HttpJobStore::new(HttpJobStoreConfig {
            api_base: "mailto:ops@example.com".to_string(),
            ..HttpJobStoreConfig::default()
        })
        .expect_err("cannot-be-a-base url");
        assert!(matches!(error, JobStoreError::InvalidEndpoint(_)));
    }

    #[test]
    fn unit_truncate_for_error_caps_long_bodies() {
        let long = "x".repeat(2_000);
        let preview = truncate_for_error(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 515);
        assert_eq!(truncate_for_error("short"), "short");
    }
}
