use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn, Span};

use super::{DiscordApi, DiscordError, FileUpload, MessageEdit, OutgoingMessage, SentMessage};

const API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct ChannelRef {
    id: String,
}

/// Discord REST session authenticated with one bot token.
pub struct DiscordClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
    span: Span,
}

impl DiscordClient {
    pub fn new(token: &str, timeout: Duration, span: Span) -> Result<Self, DiscordError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            token: token.to_string(),
            base_url: API_BASE.to_string(),
            span,
        })
    }

    /// Send a request, retrying once when Discord answers 429.
    async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        files: &[FileUpload],
    ) -> Result<String, DiscordError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..2 {
            debug!(parent: &self.span, "Discord {} {}", method, path);

            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bot {}", self.token));
            request = match payload {
                Some(payload) if !files.is_empty() => request.multipart(multipart_form(payload, files)?),
                Some(payload) => request.json(payload),
                None => request,
            };

            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;

            if status.as_u16() == 429 {
                let retry_after = serde_json::from_str::<RateLimitBody>(&body)
                    .map(|b| Duration::from_secs_f64(b.retry_after.max(0.0)))
                    .unwrap_or(Duration::from_secs(1));
                if attempt == 0 {
                    warn!(
                        parent: &self.span,
                        "Discord rate limit on {} {}, retrying in {:?}",
                        method, path, retry_after
                    );
                    tokio::time::sleep(retry_after).await;
                    continue;
                }
                return Err(DiscordError::RateLimited(retry_after));
            }

            if !status.is_success() {
                return Err(DiscordError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(body);
        }

        Err(DiscordError::RateLimited(Duration::ZERO))
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        files: &[FileUpload],
    ) -> Result<T, DiscordError> {
        let body = self.request(method, path, payload, files).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// `attachments` entries describing freshly uploaded files, in `files[n]` order.
fn upload_descriptors(files: &[FileUpload]) -> Vec<Value> {
    files
        .iter()
        .enumerate()
        .map(|(i, f)| json!({"id": i, "filename": f.name}))
        .collect()
}

pub(crate) fn message_payload(message: &OutgoingMessage) -> Result<Value, DiscordError> {
    let mut payload = json!({
        "content": message.content,
        "embeds": serde_json::to_value(&message.embeds)?,
    });
    if !message.files.is_empty() {
        payload["attachments"] = Value::Array(upload_descriptors(&message.files));
    }
    Ok(payload)
}

pub(crate) fn edit_payload(edit: &MessageEdit) -> Value {
    let mut payload = json!({});
    if let Some(content) = &edit.content {
        payload["content"] = json!(content);
    }
    if edit.keep_attachments.is_some() || !edit.files.is_empty() {
        let mut attachments: Vec<Value> = edit
            .keep_attachments
            .iter()
            .flatten()
            .map(|id| json!({"id": id}))
            .collect();
        // Upload descriptors use indices, which Discord tells apart from
        // snowflake ids of kept attachments.
        attachments.extend(upload_descriptors(&edit.files));
        payload["attachments"] = Value::Array(attachments);
    }
    payload
}

fn multipart_form(payload: &Value, files: &[FileUpload]) -> Result<Form, DiscordError> {
    let mut form = Form::new().text("payload_json", serde_json::to_string(payload)?);
    for (i, file) in files.iter().enumerate() {
        let part = Part::bytes(file.data.clone()).file_name(file.name.clone());
        form = form.part(format!("files[{}]", i), part);
    }
    Ok(form)
}

#[async_trait]
impl DiscordApi for DiscordClient {
    async fn send_message(
        &self,
        channel_id: &str,
        message: &OutgoingMessage,
    ) -> Result<SentMessage, DiscordError> {
        let payload = message_payload(message)?;
        self.request_json(
            Method::POST,
            &format!("/channels/{}/messages", channel_id),
            Some(&payload),
            &message.files,
        )
        .await
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        edit: &MessageEdit,
    ) -> Result<SentMessage, DiscordError> {
        let payload = edit_payload(edit);
        self.request_json(
            Method::PATCH,
            &format!("/channels/{}/messages/{}", channel_id, message_id),
            Some(&payload),
            &edit.files,
        )
        .await
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), DiscordError> {
        self.request(
            Method::DELETE,
            &format!("/channels/{}/messages/{}", channel_id, message_id),
            None,
            &[],
        )
        .await?;
        Ok(())
    }

    async fn start_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        name: &str,
        auto_archive_minutes: u32,
    ) -> Result<String, DiscordError> {
        let payload = json!({
            "name": name,
            "auto_archive_duration": auto_archive_minutes,
        });
        let thread: ChannelRef = self
            .request_json(
                Method::POST,
                &format!("/channels/{}/messages/{}/threads", channel_id, message_id),
                Some(&payload),
                &[],
            )
            .await?;
        Ok(thread.id)
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<SentMessage>, DiscordError> {
        self.request_json(
            Method::GET,
            &format!("/channels/{}/messages?limit={}", channel_id, limit),
            None,
            &[],
        )
        .await
    }

    async fn close(&self) {
        debug!(parent: &self.span, "Discord session closed");
    }
}
