use crate::error::{ClientError, DecodeError};
use crate::protocol::{Event, NewMessage, RunRequest};
use crate::stream::EventDecoder;
use futures::{Stream, StreamExt};
use reqwest::Client as HttpClient;
use std::path::Path;

pub struct ClientConfig {
    pub base_url: String,
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

/// A bootstrapped session on the agent process.
#[derive(Clone)]
pub struct AgentSession {
    base_url: String,
    app_name: String,
    user_id: String,
    session_id: String,
    http: HttpClient,
}

type ClientResult<T> = Result<T, ClientError>;

impl AgentSession {
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let base_url = normalize_base_url(&config.base_url);
        let http = HttpClient::new();

        let response = http
            .post(format!(
                "{}/apps/{}/users/{}/sessions/{}",
                base_url, config.app_name, config.user_id, config.session_id
            ))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                context: "failed to create session",
                status,
                body,
            });
        }

        tracing::info!(session = %config.session_id, app = %config.app_name, "session created");

        Ok(Self {
            base_url,
            app_name: config.app_name,
            user_id: config.user_id,
            session_id: config.session_id,
            http,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Sends `task` to the agent and feeds every streamed event to `on_event`.
    pub async fn run_task<F>(&self, task: &str, on_event: F) -> ClientResult<()>
    where
        F: FnMut(Result<Event, DecodeError>),
    {
        let request = RunRequest {
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            new_message: NewMessage::user_text(task),
        };

        let response = self
            .http
            .post(format!("{}/run_sse", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                context: "message delivery failed",
                status,
                body,
            });
        }

        pump(response.bytes_stream(), on_event).await
    }
}

/// Drives an `EventDecoder` over a byte stream until it ends.
pub async fn pump<S, B, E, F>(stream: S, mut on_event: F) -> ClientResult<()>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ClientError>,
    F: FnMut(Result<Event, DecodeError>),
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = EventDecoder::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Into::into)?;
        for event in decoder.feed(chunk.as_ref()) {
            on_event(event);
        }
    }
    decoder.finish();
    Ok(())
}

/// Replays a captured event stream from disk, `chunk_size` bytes at a time.
pub async fn replay<F>(path: &Path, chunk_size: usize, on_event: F) -> ClientResult<()>
where
    F: FnMut(Result<Event, DecodeError>),
{
    let bytes = tokio::fs::read(path).await?;
    let chunks: Vec<Result<Vec<u8>, ClientError>> = bytes
        .chunks(chunk_size.max(1))
        .map(|chunk| Ok(chunk.to_vec()))
        .collect();
    pump(futures::stream::iter(chunks), on_event).await
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}
