//! HTTP notification providers.
//!
//! Every provider is a [`ProviderKind`] variant. A variant knows its default
//! endpoint, how to shape a title and message into a request body, and which
//! status codes mean the provider accepted the message.

use crate::config::DestinationConfig;
use crate::errors::DispatchError;
use crate::notifier::sigv4::{self, Credentials, SignableRequest};
use crate::notifier::Notifier;
use crate::utils::format_endpoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// The closed set of HTTP providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Generic JSON webhook.
    Webhook,
    /// Feishu bot.
    Feishu,
    /// DingTalk bot.
    Dingtalk,
    /// Discord webhook.
    Discord,
    /// Slack incoming webhook.
    Slack,
    /// GitHub issue comment.
    Github,
    /// Telegram bot message.
    Telegram,
    /// Postmark email.
    Postmark,
    /// SendGrid email.
    Sendgrid,
    /// Resend email.
    Resend,
    /// Amazon SES v2 email, SigV4 signed.
    Ses,
}

impl ProviderKind {
    /// All HTTP providers.
    pub const ALL: [Self; 11] = [
        Self::Webhook,
        Self::Feishu,
        Self::Dingtalk,
        Self::Discord,
        Self::Slack,
        Self::Github,
        Self::Telegram,
        Self::Postmark,
        Self::Sendgrid,
        Self::Resend,
        Self::Ses,
    ];

    /// The configuration type tag.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Feishu => "feishu",
            Self::Dingtalk => "dingtalk",
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Github => "github",
            Self::Telegram => "telegram",
            Self::Postmark => "postmark",
            Self::Sendgrid => "sendgrid",
            Self::Resend => "resend",
            Self::Ses => "ses",
        }
    }

    /// Looks up a provider by type tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Service name used in errors and logs.
    #[must_use]
    pub fn service(self) -> &'static str {
        match self {
            Self::Webhook => "Webhook",
            Self::Feishu => "Feishu",
            Self::Dingtalk => "DingTalk",
            Self::Discord => "Discord",
            Self::Slack => "Slack",
            Self::Github => "GitHub",
            Self::Telegram => "Telegram",
            Self::Postmark => "Postmark",
            Self::Sendgrid => "SendGrid",
            Self::Resend => "Resend",
            Self::Ses => "SES",
        }
    }

    /// The provider's own success convention.
    #[must_use]
    pub fn default_success(self) -> SuccessPolicy {
        match self {
            Self::Webhook => SuccessPolicy::AnySuccess,
            Self::Discord => SuccessPolicy::Codes(vec![200, 204]),
            Self::Github => SuccessPolicy::Codes(vec![201]),
            Self::Sendgrid => SuccessPolicy::Codes(vec![202]),
            _ => SuccessPolicy::Codes(vec![200]),
        }
    }
}

/// Which HTTP status codes count as a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// Any 2xx status.
    AnySuccess,
    /// Exactly these codes.
    Codes(Vec<u16>),
}

impl SuccessPolicy {
    /// Whether `status` counts as success.
    #[must_use]
    pub fn accepts(&self, status: u16) -> bool {
        match self {
            Self::AnySuccess => (200..300).contains(&status),
            Self::Codes(codes) => codes.contains(&status),
        }
    }

    /// The destination's `success_codes`, falling back to the provider default.
    #[must_use]
    pub fn for_destination(kind: ProviderKind, config: &DestinationConfig) -> Self {
        match &config.success_codes {
            Some(codes) if !codes.is_empty() => Self::Codes(codes.clone()),
            _ => kind.default_success(),
        }
    }
}

/// A fully shaped provider request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Extra headers, in name order.
    pub headers: BTreeMap<String, String>,
    /// JSON body.
    pub body: Value,
}

/// A configured HTTP provider destination.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    name: String,
    kind: ProviderKind,
    config: DestinationConfig,
    success: SuccessPolicy,
    client: reqwest::Client,
}

impl HttpNotifier {
    /// Creates a notifier for destination `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ProviderKind, config: DestinationConfig, client: reqwest::Client) -> Self {
        let success = SuccessPolicy::for_destination(kind, &config);
        Self {
            name: name.into(),
            kind,
            config,
            success,
            client,
        }
    }

    /// The provider kind.
    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn require(&self, key: &str) -> Result<String, DispatchError> {
        self.config
            .get_str(key)
            .ok_or_else(|| DispatchError::missing(&self.name, key))
    }

    fn endpoint(&self, default: &str) -> String {
        let endpoint = self.config.get_str("endpoint").unwrap_or_else(|| default.to_string());
        format_endpoint(&endpoint)
    }

    fn recipients(&self) -> Result<Vec<String>, DispatchError> {
        let to = self.config.get_list("to");
        if to.is_empty() {
            return Err(DispatchError::missing(&self.name, "to"));
        }
        Ok(to)
    }

    /// Shapes `title` and `message` into this provider's request.
    pub fn request(&self, title: &str, message: &str) -> Result<HttpRequest, DispatchError> {
        self.request_at(title, message, Utc::now())
    }

    /// Same as [`request`](Self::request), signing time-dependent requests at `at`.
    pub fn request_at(&self, title: &str, message: &str, at: DateTime<Utc>) -> Result<HttpRequest, DispatchError> {
        let text = format!("{title}\n\n{message}");
        let mut headers = BTreeMap::new();
        let mut method = "POST".to_string();

        let (url, body) = match self.kind {
            ProviderKind::Webhook => {
                if let Some(m) = self.config.get_str("method") {
                    method = m.to_uppercase();
                }
                headers.extend(self.config.get_map("headers"));
                (self.require("url")?, json!({ "title": title, "message": message }))
            }
            ProviderKind::Feishu => (
                self.require("url")?,
                json!({ "msg_type": "text", "content": { "text": text } }),
            ),
            ProviderKind::Dingtalk => (
                self.require("url")?,
                json!({ "msgtype": "text", "text": { "content": text } }),
            ),
            ProviderKind::Discord => (self.require("url")?, json!({ "content": text })),
            ProviderKind::Slack => (self.require("url")?, json!({ "text": text })),
            ProviderKind::Github => {
                let repo = self.require("repo")?;
                let issue = self.require("issue_number")?;
                let token = self.require("access_token")?;
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
                headers.insert("Accept".to_string(), "application/vnd.github+json".to_string());
                (
                    format!("{}/repos/{repo}/issues/{issue}/comments", self.endpoint("api.github.com")),
                    json!({ "body": text }),
                )
            }
            ProviderKind::Telegram => {
                let token = self.require("token")?;
                let chat_id = self.require("chat_id")?;
                (
                    format!("{}/bot{token}/sendMessage", self.endpoint("api.telegram.org")),
                    json!({ "chat_id": chat_id, "text": text }),
                )
            }
            ProviderKind::Postmark => {
                let token = self.require("token")?;
                headers.insert("X-Postmark-Server-Token".to_string(), token);
                (
                    format!("{}/email", self.endpoint("api.postmarkapp.com")),
                    json!({
                        "From": self.require("from")?,
                        "To": self.recipients()?.join(","),
                        "Subject": title,
                        "TextBody": message,
                        "MessageStream": "outbound",
                    }),
                )
            }
            ProviderKind::Sendgrid => {
                let token = self.require("token")?;
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
                let to: Vec<Value> = self.recipients()?.into_iter().map(|email| json!({ "email": email })).collect();
                (
                    format!("{}/v3/mail/send", self.endpoint("api.sendgrid.com")),
                    json!({
                        "personalizations": [{ "to": to }],
                        "from": { "email": self.require("from")? },
                        "subject": title,
                        "content": [{ "type": "text/plain", "value": message }],
                    }),
                )
            }
            ProviderKind::Resend => {
                let token = self.require("token")?;
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
                (
                    format!("{}/emails", self.endpoint("api.resend.com")),
                    json!({
                        "from": self.require("from")?,
                        "to": self.recipients()?,
                        "subject": title,
                        "text": message,
                    }),
                )
            }
            ProviderKind::Ses => {
                let region = self.config.get_str("region").unwrap_or_else(|| "us-east-1".to_string());
                let access_key_id = self.require("access_key_id")?;
                let secret_access_key = self.require("secret_access_key")?;
                let url = format!(
                    "{}/v2/email/outbound-emails",
                    self.endpoint(&format!("email.{region}.amazonaws.com"))
                );
                let body = json!({
                    "FromEmailAddress": self.require("from")?,
                    "Destination": { "ToAddresses": self.recipients()? },
                    "Content": {
                        "Simple": {
                            "Subject": { "Data": title },
                            "Body": { "Text": { "Data": message } },
                        },
                    },
                });
                let creds = Credentials {
                    access_key_id: &access_key_id,
                    secret_access_key: &secret_access_key,
                    region: &region,
                    service: "ses",
                };
                headers.extend(sign_json(&method, &url, &body, &creds, at)?);
                (url, body)
            }
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }
}

fn sign_json(
    method: &str,
    url: &str,
    body: &Value,
    creds: &Credentials<'_>,
    at: DateTime<Utc>,
) -> Result<BTreeMap<String, String>, DispatchError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| DispatchError::transport("SES", e))?;
    let host = match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(DispatchError::transport("SES", format!("no host in {url}"))),
    };
    let payload = serde_json::to_vec(body).map_err(|e| DispatchError::transport("SES", e))?;
    let request = SignableRequest {
        method,
        host: &host,
        path: parsed.path(),
        body: &payload,
    };
    sigv4::sign(creds, &request, at)
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn deliver(&self, title: &str, message: &str) -> Result<(), DispatchError> {
        let service = self.kind.service();
        let request = self.request(title, message)?;
        debug!(destination = %self.name, service, url = %request.url, "Sending notification");

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| DispatchError::transport(service, e))?;
        let payload = serde_json::to_vec(&request.body).map_err(|e| DispatchError::transport(service, e))?;
        let mut builder = self
            .client
            .request(method, &request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DispatchError::transport(service, e))?;
        let status = response.status().as_u16();

        if self.success.accepts(status) {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected {
            service: service.to_string(),
            status,
            body,
        })
    }
}
