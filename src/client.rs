//! The controller client facade.
//!
//! [`Client`] owns one dial strategy, one pooled HTTP transport over it, and
//! one RPC codec. Every API call funnels through [`Client::raw_request`],
//! which applies authentication and the status-to-error taxonomy in a single
//! place; the public operations are thin path-plus-payload wrappers over it.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::attach::{self, AttachStream};
use crate::dial::Dial;
use crate::error::ClientError;
use crate::events::EventStream;
use crate::rpc::{self, RpcCodec, RpcStream};
use crate::transport::{HttpTransport, RequestBody};
use crate::types::{
    App, Artifact, Formation, FormationUpdate, Job, JobEvent, NewJob, Release, ValidationError,
};

/// Client for the Skiff controller API.
///
/// Cheap to clone is not a goal; share it behind an `Arc` if needed. All
/// operations take `&self` and are safe to run concurrently.
pub struct Client {
    host: String,
    key: String,
    dial: Arc<dyn Dial>,
    transport: HttpTransport,
    codec: Arc<dyn RpcCodec>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub(crate) fn new(
        host: String,
        key: String,
        dial: Arc<dyn Dial>,
        codec: Arc<dyn RpcCodec>,
    ) -> Self {
        let transport = HttpTransport::new(dial.clone());
        Self {
            host,
            key,
            dial,
            transport,
            codec,
        }
    }

    /// Send a request and classify the response status.
    ///
    /// Exactly one policy for the whole API surface: 200 returns the
    /// response for the caller to decode, 404 is the not-found sentinel
    /// (body discarded), 400 carries a structured [`ValidationError`], and
    /// anything else becomes [`ClientError::UnexpectedStatus`] with enough
    /// context to locate the failing call.
    async fn raw_request(
        &self,
        method: http::Method,
        path: &str,
        accept: Option<&str>,
        body: RequestBody,
    ) -> Result<http::Response<Incoming>, ClientError> {
        let url = format!("http://{}{}", self.host, path);
        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(url.as_str())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::AUTHORIZATION, crate::wire::basic_auth(&self.key));
        if let Some(accept) = accept {
            builder = builder.header(http::header::ACCEPT, accept);
        }
        let request = builder
            .body(body)
            .map_err(|e| ClientError::Encode(format!("build request: {}", e)))?;

        tracing::trace!(method = %method, url = %url, "controller request");
        let response = self.transport.request(request).await?;
        let status = response.status().as_u16();
        match status {
            200 => Ok(response),
            404 => {
                let _ = response.into_body().collect().await;
                Err(ClientError::NotFound)
            }
            400 => {
                let collected = response
                    .into_body()
                    .collect()
                    .await
                    .map_err(|e| ClientError::Transport(format!("read body: {}", e)))?;
                let validation: ValidationError = serde_json::from_slice(&collected.to_bytes())?;
                Err(ClientError::Validation(validation))
            }
            _ => {
                let _ = response.into_body().collect().await;
                Err(ClientError::UnexpectedStatus {
                    method,
                    url,
                    status,
                })
            }
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: http::Response<Incoming>,
    ) -> Result<T, ClientError> {
        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Transport(format!("read body: {}", e)))?;
        Ok(serde_json::from_slice(&collected.to_bytes())?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .raw_request(http::Method::GET, path, None, RequestBody::empty())
            .await?;
        Self::decode(response).await
    }

    async fn post<In: Serialize, Out: DeserializeOwned>(
        &self,
        path: &str,
        payload: &In,
    ) -> Result<Out, ClientError> {
        let response = self
            .raw_request(http::Method::POST, path, None, RequestBody::json(payload)?)
            .await?;
        Self::decode(response).await
    }

    async fn put<In: Serialize, Out: DeserializeOwned>(
        &self,
        path: &str,
        payload: &In,
    ) -> Result<Out, ClientError> {
        let response = self
            .raw_request(http::Method::PUT, path, None, RequestBody::json(payload)?)
            .await?;
        Self::decode(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let response = self
            .raw_request(http::Method::DELETE, path, None, RequestBody::empty())
            .await?;
        let _ = response.into_body().collect().await;
        Ok(())
    }

    /// Register a new application.
    pub async fn create_app(&self, app: &App) -> Result<App, ClientError> {
        self.post("/apps", app).await
    }

    /// Fetch an application by id or name.
    pub async fn get_app(&self, app_id: &str) -> Result<App, ClientError> {
        self.get(&format!("/apps/{}", app_id)).await
    }

    /// List all applications.
    pub async fn app_list(&self) -> Result<Vec<App>, ClientError> {
        self.get("/apps").await
    }

    /// Delete an application.
    pub async fn delete_app(&self, app_id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/apps/{}", app_id)).await
    }

    /// Register a build artifact.
    pub async fn create_artifact(&self, artifact: &Artifact) -> Result<Artifact, ClientError> {
        self.post("/artifacts", artifact).await
    }

    /// Fetch an artifact by id.
    pub async fn get_artifact(&self, artifact_id: &str) -> Result<Artifact, ClientError> {
        self.get(&format!("/artifacts/{}", artifact_id)).await
    }

    /// List all artifacts.
    pub async fn artifact_list(&self) -> Result<Vec<Artifact>, ClientError> {
        self.get("/artifacts").await
    }

    /// Register a release.
    pub async fn create_release(&self, release: &Release) -> Result<Release, ClientError> {
        self.post("/releases", release).await
    }

    /// Fetch a release by id.
    pub async fn get_release(&self, release_id: &str) -> Result<Release, ClientError> {
        self.get(&format!("/releases/{}", release_id)).await
    }

    /// Point an app at a release.
    pub async fn set_app_release(
        &self,
        app_id: &str,
        release_id: &str,
    ) -> Result<Release, ClientError> {
        let release = Release {
            id: release_id.to_string(),
            ..Default::default()
        };
        self.put(&format!("/apps/{}/release", app_id), &release).await
    }

    /// The release an app currently runs.
    pub async fn get_app_release(&self, app_id: &str) -> Result<Release, ClientError> {
        self.get(&format!("/apps/{}/release", app_id)).await
    }

    /// Set desired process counts for an app release. The formation must
    /// carry both ids; a blank one can only address a nonexistent resource,
    /// so it short-circuits to the not-found sentinel without a request.
    pub async fn put_formation(&self, formation: &Formation) -> Result<Formation, ClientError> {
        if formation.app_id.is_empty() || formation.release_id.is_empty() {
            return Err(ClientError::NotFound);
        }
        self.put(
            &format!(
                "/apps/{}/formations/{}",
                formation.app_id, formation.release_id
            ),
            formation,
        )
        .await
    }

    /// Fetch the formation for an app release.
    pub async fn get_formation(
        &self,
        app_id: &str,
        release_id: &str,
    ) -> Result<Formation, ClientError> {
        self.get(&format!("/apps/{}/formations/{}", app_id, release_id))
            .await
    }

    /// List jobs under an app.
    pub async fn job_list(&self, app_id: &str) -> Result<Vec<Job>, ClientError> {
        self.get(&format!("/apps/{}/jobs", app_id)).await
    }

    /// Update a job record. Both ids must be present, same rule as
    /// [`put_formation`](Client::put_formation).
    pub async fn put_job(&self, job: &Job) -> Result<Job, ClientError> {
        if job.id.is_empty() || job.app_id.is_empty() {
            return Err(ClientError::NotFound);
        }
        self.put(&format!("/apps/{}/jobs/{}", job.app_id, job.id), job)
            .await
    }

    /// Stop and remove a job.
    pub async fn delete_job(&self, app_id: &str, job_id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/apps/{}/jobs/{}", app_id, job_id))
            .await
    }

    /// Start a job without attaching to it.
    pub async fn run_job_detached(&self, app_id: &str, job: &NewJob) -> Result<Job, ClientError> {
        self.post(&format!("/apps/{}/jobs", app_id), job).await
    }

    /// Start a job and keep the connection as a raw stdio pipe to it.
    pub async fn run_job_attached(
        &self,
        app_id: &str,
        job: &NewJob,
    ) -> Result<AttachStream, ClientError> {
        attach::run_attached(self.dial.as_ref(), &self.host, &self.key, app_id, job).await
    }

    /// Stream a job's log output as raw chunks.
    pub async fn get_job_log(
        &self,
        app_id: &str,
        job_id: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, ClientError>>, ClientError> {
        let response = self
            .raw_request(
                http::Method::GET,
                &format!("/apps/{}/jobs/{}/log", app_id, job_id),
                None,
                RequestBody::empty(),
            )
            .await?;
        Ok(Box::pin(body_to_stream(response.into_body())))
    }

    /// Open a server-sent event feed at `path`, decoding each event as `T`.
    pub async fn stream_events<T>(&self, path: &str) -> Result<EventStream<T>, ClientError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let response = self
            .raw_request(
                http::Method::GET,
                path,
                Some("text/event-stream"),
                RequestBody::empty(),
            )
            .await?;
        Ok(EventStream::spawn(response.into_body()))
    }

    /// Watch job state changes for an app.
    pub async fn stream_job_events(
        &self,
        app_id: &str,
    ) -> Result<EventStream<JobEvent>, ClientError> {
        self.stream_events(&format!("/apps/{}/jobs", app_id)).await
    }

    /// Stream formation changes over a dedicated RPC session.
    ///
    /// `since` replays changes after the given instant, sent as whole
    /// seconds since the Unix epoch; `None` sends 0 and replays everything
    /// the controller retains.
    pub async fn stream_formations(
        &self,
        since: Option<std::time::SystemTime>,
    ) -> Result<RpcStream<FormationUpdate>, ClientError> {
        let cursor = since
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let (conn, initial) = rpc::open_session(self.dial.as_ref(), &self.host, &self.key).await?;
        Ok(RpcStream::spawn(
            conn,
            initial,
            self.codec.clone(),
            "Controller.StreamFormations".to_string(),
            serde_json::json!(cursor),
        ))
    }

    /// Release resources held by the dial strategy.
    pub async fn close(&self) {
        self.dial.close().await;
    }
}

fn body_to_stream(body: Incoming) -> impl futures::Stream<Item = Result<Bytes, ClientError>> + Send {
    futures::stream::unfold(body, |mut body| async move {
        loop {
            match body.frame().await {
                None => return None,
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => return Some((Ok(data), body)),
                    Err(_) => continue,
                },
                Some(Err(e)) => {
                    let err = ClientError::Transport(format!("read body: {}", e));
                    return Some((Err(err), body));
                }
            }
        }
    })
}
