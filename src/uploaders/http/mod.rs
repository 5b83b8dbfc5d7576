use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use url::Url;
use crate::config::Config;
use crate::core::{
    Payload, ProgressSink, RemoteResult, Result, TransferError, TransferRequest, Transport,
    UploadSettings,
};
use crate::utils::ProgressStream;

/// Multipart form field names
pub const FIELD_FILE: &str = "file";
pub const FIELD_TARGET_PATH: &str = "targetPath";
pub const FIELD_SETTINGS: &str = "settings";

/// Reply body of the upload endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, alias = "file", alias = "data")]
    remote_result: Option<RemoteResult>,
}

/// Posts each payload as `multipart/form-data` to a single endpoint
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: Url) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    pub fn with_client(client: Client, endpoint: Url) -> Self {
        Self {
            client,
            endpoint,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let transport = Self::new(config.endpoint.clone());
        match &config.token {
            Some(token) => transport.with_token(token.clone()),
            None => transport,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &TransferRequest, progress: ProgressSink) -> Result<RemoteResult> {
        let mut form = Form::new();
        for (name, value) in text_fields(&request.settings)? {
            form = form.text(name, value);
        }
        let form = form.part(FIELD_FILE, payload_part(request, progress).await?);

        let mut builder = self.client.post(self.endpoint.clone()).multipart(form);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        parse_response(status, &body)
    }
}

/// `targetPath` is the base directory as configured. The subfolder to create
/// travels only inside the settings JSON.
fn text_fields(settings: &UploadSettings) -> Result<[(&'static str, String); 2]> {
    Ok([
        (FIELD_TARGET_PATH, settings.target_path.clone()),
        (FIELD_SETTINGS, settings.to_json()?),
    ])
}

async fn payload_part(request: &TransferRequest, progress: ProgressSink) -> Result<Part> {
    let body = match &request.payload {
        Payload::File(path) => {
            let file = File::open(path).await?;
            Body::wrap_stream(ProgressStream::new(ReaderStream::new(file), progress))
        }
        Payload::Memory(data) => {
            let chunk: std::io::Result<Bytes> = Ok(data.clone());
            Body::wrap_stream(ProgressStream::new(futures::stream::iter([chunk]), progress))
        }
    };

    let part = Part::stream_with_length(body, request.size_bytes).file_name(request.name.clone());
    match &request.media_type {
        Some(media_type) => Ok(part.mime_str(media_type)?),
        None => Ok(part),
    }
}

/// A non-2xx status and `success: false` both end up as errors carrying the
/// server's message when it sent one.
fn parse_response(status: StatusCode, body: &str) -> Result<RemoteResult> {
    let parsed = serde_json::from_str::<UploadResponse>(body);

    if !status.is_success() {
        return match parsed.ok().and_then(|response| response.message) {
            Some(message) => Err(TransferError::Rejected(message)),
            None => Err(TransferError::server_error(
                status.as_u16(),
                format!("Upload failed with status {}", status),
            )),
        };
    }

    let response = parsed?;
    if !response.success {
        return Err(TransferError::Rejected(
            response
                .message
                .unwrap_or_else(|| "Upload rejected by server".to_string()),
        ));
    }

    response.remote_result.ok_or_else(|| {
        TransferError::server_error(status.as_u16(), "Response is missing the remote result")
    })
}
