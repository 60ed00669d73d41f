//! Jenkins remote build trigger.
//!
//! Implements [`TriggerClient`] over the Jenkins remote access API:
//! `POST /job/<name>/build`, or `/buildWithParameters` when parameters are
//! given. Folder jobs (`team/nightly`) map to nested `/job/` segments.

use std::{collections::HashMap, time::Duration};

use {
    async_trait::async_trait,
    buildcron_scheduler::{BuildHandle, TriggerClient, TriggerError},
    reqwest::{Client, StatusCode, header::LOCATION},
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
    url::Url,
};

#[cfg(feature = "metrics")]
use buildcron_metrics::{counter, jenkins as jenkins_metrics, labels};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid Jenkins URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Jenkins URL cannot carry job paths: {0}")]
    NotABase(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Connection settings for a Jenkins server.
#[derive(Debug, Clone)]
pub struct JenkinsConfig {
    pub url: String,
    /// With a user, the token is sent as HTTP basic auth; without one, as a
    /// bearer token.
    pub user: Option<String>,
    pub token: Option<Secret<String>>,
    pub timeout: Duration,
}

impl JenkinsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct JenkinsClient {
    http: Client,
    base: Url,
    user: Option<String>,
    token: Option<Secret<String>>,
}

impl JenkinsClient {
    pub fn new(config: JenkinsConfig) -> Result<Self> {
        let base = Url::parse(&config.url).map_err(|source| Error::InvalidUrl {
            url: config.url.clone(),
            source,
        })?;
        if base.cannot_be_a_base() {
            return Err(Error::NotABase(config.url));
        }
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base,
            user: config.user,
            token: config.token,
        })
    }

    /// Endpoint that starts a build of `job_id`.
    pub fn build_url(&self, job_id: &str, with_parameters: bool) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for name in job_id.split('/').filter(|s| !s.is_empty()) {
                segments.push("job").push(name);
            }
            segments.push(if with_parameters {
                "buildWithParameters"
            } else {
                "build"
            });
        }
        url
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.user, &self.token) {
            (Some(user), token) => {
                req.basic_auth(user, token.as_ref().map(|t| t.expose_secret().clone()))
            },
            (None, Some(token)) => req.bearer_auth(token.expose_secret()),
            (None, None) => req,
        }
    }
}

#[async_trait]
impl TriggerClient for JenkinsClient {
    async fn trigger(
        &self,
        job_id: &str,
        parameters: &HashMap<String, String>,
    ) -> std::result::Result<BuildHandle, TriggerError> {
        let url = self.build_url(job_id, !parameters.is_empty());
        debug!(job_id, %url, "requesting build");

        #[cfg(feature = "metrics")]
        record_request();

        let mut req = self.authorize(self.http.post(url));
        if !parameters.is_empty() {
            req = req.form(parameters);
        }

        let resp = req.send().await.map_err(|e| {
            #[cfg(feature = "metrics")]
            counter!(jenkins_metrics::ERRORS_TOTAL, labels::ERROR_TYPE => "transport")
                .increment(1);
            let kind = if e.is_timeout() {
                "timed out"
            } else {
                "request failed"
            };
            TriggerError::unavailable(format!("{kind}: {e}"))
        })?;

        let status = resp.status();
        if status == StatusCode::CREATED || status == StatusCode::OK {
            let queue_url = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let queue_id = queue_url.as_deref().and_then(queue_item_id);
            return Ok(BuildHandle {
                queue_url,
                queue_id,
            });
        }

        let body = resp.text().await.unwrap_or_default();
        warn!(job_id, status = status.as_u16(), "Jenkins refused build");
        if status.is_server_error() {
            #[cfg(feature = "metrics")]
            counter!(jenkins_metrics::ERRORS_TOTAL, labels::ERROR_TYPE => "server").increment(1);
            return Err(TriggerError::unavailable(format!("HTTP {status}")));
        }
        #[cfg(feature = "metrics")]
        counter!(jenkins_metrics::ERRORS_TOTAL, labels::ERROR_TYPE => "rejected").increment(1);
        Err(TriggerError::rejected(status.as_u16(), body))
    }
}

/// Job ids stay in logs only; as a label they would make one series per job.
#[cfg(feature = "metrics")]
fn record_request() {
    counter!(jenkins_metrics::REQUESTS_TOTAL).increment(1);
}

/// Queue item number from a `.../queue/item/<n>/` location.
fn queue_item_id(location: &str) -> Option<u64> {
    location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher};

    fn client(url: &str) -> JenkinsClient {
        JenkinsClient::new(JenkinsConfig::new(url)).unwrap()
    }

    #[test]
    fn folder_jobs_nest_job_segments() {
        let c = client("http://ci.example.com/jenkins/");
        assert_eq!(
            c.build_url("team/nightly", false).as_str(),
            "http://ci.example.com/jenkins/job/team/job/nightly/build"
        );
        assert_eq!(
            c.build_url("my job", true).as_str(),
            "http://ci.example.com/jenkins/job/my%20job/buildWithParameters"
        );
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(matches!(
            JenkinsClient::new(JenkinsConfig::new("not a url")),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            JenkinsClient::new(JenkinsConfig::new("mailto:ci@example.com")),
            Err(Error::NotABase(_))
        ));
    }

    #[test]
    fn parses_queue_item() {
        assert_eq!(queue_item_id("http://ci/queue/item/42/"), Some(42));
        assert_eq!(queue_item_id("http://ci/queue/item/7"), Some(7));
        assert_eq!(queue_item_id("http://ci/queue/"), None);
    }

    #[tokio::test]
    async fn triggers_build_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let location = format!("{}/queue/item/42/", server.url());
        let mock = server
            .mock("POST", "/job/nightly/build")
            .match_header("authorization", "Basic Y2k6dG9r")
            .with_status(201)
            .with_header("location", &location)
            .create_async()
            .await;

        let c = JenkinsClient::new(JenkinsConfig {
            user: Some("ci".into()),
            token: Some(Secret::new("tok".into())),
            ..JenkinsConfig::new(server.url())
        })
        .unwrap();
        let handle = c.trigger("nightly", &HashMap::new()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(handle.queue_url.as_deref(), Some(location.as_str()));
        assert_eq!(handle.queue_id, Some(42));
    }

    #[tokio::test]
    async fn bearer_token_without_user() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/job/team/job/nightly/build")
            .match_header("authorization", "Bearer tok")
            .with_status(201)
            .create_async()
            .await;

        let c = JenkinsClient::new(JenkinsConfig {
            token: Some(Secret::new("tok".into())),
            ..JenkinsConfig::new(server.url())
        })
        .unwrap();
        let handle = c.trigger("team/nightly", &HashMap::new()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(handle, BuildHandle::default());
    }

    #[tokio::test]
    async fn parameters_use_build_with_parameters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/job/deploy/buildWithParameters")
            .match_body(Matcher::UrlEncoded("BRANCH".into(), "main".into()))
            .with_status(201)
            .create_async()
            .await;

        let params = HashMap::from([("BRANCH".to_string(), "main".to_string())]);
        client(&server.url())
            .trigger("deploy", &params)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_rejections() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/job/missing/build")
            .with_status(404)
            .with_body("no such job")
            .create_async()
            .await;

        let err = client(&server.url())
            .trigger("missing", &HashMap::new())
            .await
            .unwrap_err();
        match err {
            TriggerError::Rejected { status, body } => {
                assert_eq!(status, 404);
                assert_eq!(body, "no such job");
            },
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/job/nightly/build")
            .with_status(503)
            .create_async()
            .await;

        let err = client(&server.url())
            .trigger("nightly", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Unavailable { .. }), "{err}");
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let err = client("http://127.0.0.1:1")
            .trigger("nightly", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Unavailable { .. }), "{err}");
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn request_counter_has_no_per_job_label() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            record_request();
            record_request();
        });

        let rendered = handle.render();
        assert!(rendered.contains("buildcron_jenkins_requests_total 2"));
        assert!(!rendered.contains("job="));
    }
}
