// ABOUTME: Transport seam between the channel client and the network
// ABOUTME: reqwest-backed HTTP requests plus an SSE event stream via reqwest-eventsource

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use reqwest::{Client, RequestBuilder, Response};
use reqwest_eventsource::{retry, Event, EventSource};
use serde_json::Value;

use crate::config::AirlockConfig;
use crate::error::AirlockError;

/// What the event stream reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// The connection is established.
    Open,
    /// One message; `data` is the raw JSON text.
    Message { data: String },
    /// Transport-level failure. The stream is finished after this.
    Error(String),
    /// The ship ended the stream.
    Closed,
}

/// The requests an [`Airlock`](crate::Airlock) makes.
///
/// The HTTP implementation is [`HttpTransport`]; tests substitute an in-memory one.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// PUT a batch of commands to the channel.
    async fn put_channel(&self, url: &str, body: String) -> Result<(), AirlockError>;

    /// GET a JSON document.
    async fn get_json(&self, url: &str) -> Result<Value, AirlockError>;

    /// POST a JSON body and read a JSON response.
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, AirlockError>;

    /// Open the channel's event stream. `last_event_id` is sent on reconnects.
    fn open_stream(&self, url: &str, last_event_id: Option<u64>)
        -> BoxStream<'static, StreamSignal>;
}

/// [`Transport`] over reqwest, attaching the session cookie to every request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    cookie: Option<String>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &AirlockConfig) -> Result<Self, AirlockError> {
        // No client-wide timeout: it would also cut the long-lived event stream
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AirlockError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            cookie: config.cookie.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        self.authorize(builder).timeout(self.request_timeout)
    }
}

/// Turn a non-success response into [`AirlockError::Http`].
async fn check_status(resp: Response) -> Result<Response, AirlockError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AirlockError::Http {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn put_channel(&self, url: &str, body: String) -> Result<(), AirlockError> {
        let resp = self
            .request(self.client.put(url))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn get_json(&self, url: &str) -> Result<Value, AirlockError> {
        let resp = self.request(self.client.get(url)).send().await?;
        Ok(check_status(resp).await?.json().await?)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, AirlockError> {
        let resp = self
            .request(self.client.post(url))
            .json(body)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    fn open_stream(
        &self,
        url: &str,
        last_event_id: Option<u64>,
    ) -> BoxStream<'static, StreamSignal> {
        let mut builder = self
            .authorize(self.client.get(url))
            .header(ACCEPT, "text/event-stream");
        if let Some(id) = last_event_id {
            builder = builder.header("Last-Event-ID", id.to_string());
        }

        let mut source = match EventSource::new(builder) {
            Ok(source) => source,
            Err(e) => {
                return stream::once(async move { StreamSignal::Error(e.to_string()) }).boxed()
            }
        };
        // Reconnects are driven by the channel's stream consumer
        source.set_retry_policy(Box::new(retry::Never));

        source
            .map(|event| match event {
                Ok(Event::Open) => StreamSignal::Open,
                Ok(Event::Message(message)) => StreamSignal::Message { data: message.data },
                Err(reqwest_eventsource::Error::StreamEnded) => StreamSignal::Closed,
                Err(e) => StreamSignal::Error(e.to_string()),
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_transport_keeps_cookie() {
        let config = AirlockConfig::new("http://localhost:8080", "zod")
            .with_cookie("urbauth-~zod=0v1.abcde");
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.cookie.as_deref(), Some("urbauth-~zod=0v1.abcde"));
        assert_eq!(transport.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_put_to_unreachable_ship_is_transport_error() {
        let config = AirlockConfig::new("http://127.0.0.1:1", "zod");
        let transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .put_channel("http://127.0.0.1:1/~/channel/1-abc", "[]".into())
            .await
            .unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_stream_to_unreachable_ship_reports_error() {
        let config = AirlockConfig::new("http://127.0.0.1:1", "zod");
        let transport = HttpTransport::new(&config).unwrap();
        let mut stream = transport.open_stream("http://127.0.0.1:1/~/channel/1-abc", None);
        match stream.next().await {
            Some(StreamSignal::Error(_)) => {}
            other => panic!("expected a stream error, got {other:?}"),
        }
    }
}
