use async_trait::async_trait;
use feed_core::{
    FeedConfig, FeedError, FeedErrorCategory, FeedStats, ListQuery, NotificationId,
    NotificationPage,
};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Serialize, de::DeserializeOwned};
use url::Url;

/// Remote notification API consumed by the feed.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Fetch one page of notifications.
    async fn list_notifications(&self, query: &ListQuery) -> Result<NotificationPage, FeedError>;

    /// Fetch the current read/unread counters.
    async fn stats(&self) -> Result<FeedStats, FeedError>;

    /// Mark one notification read.
    async fn mark_read(&self, id: &NotificationId) -> Result<(), FeedError>;

    /// Mark several notifications read.
    async fn bulk_mark_read(&self, ids: &[NotificationId]) -> Result<(), FeedError>;

    /// Delete several notifications.
    async fn bulk_delete(&self, ids: &[NotificationId]) -> Result<(), FeedError>;

    /// Ask the server to seed `count` demo notifications.
    async fn generate_mock_data(&self, count: u32) -> Result<(), FeedError>;
}

#[derive(Serialize)]
struct BulkRequest<'a> {
    notification_ids: &'a [NotificationId],
}

#[derive(Serialize)]
struct GenerateRequest {
    count: u32,
}

/// [`NotificationApi`] over the dashboard's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpNotificationApi {
    client: Client,
    base_url: Url,
}

impl HttpNotificationApi {
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let base_url = Url::parse(&config.api_base_url).map_err(|err| {
            FeedError::new(
                FeedErrorCategory::Config,
                "invalid_api_base_url",
                format!("'{}': {err}", config.api_base_url),
            )
        })?;
        if base_url.cannot_be_a_base() {
            return Err(FeedError::new(
                FeedErrorCategory::Config,
                "invalid_api_base_url",
                format!("'{}' cannot be used as a base URL", config.api_base_url),
            ));
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| {
            FeedError::new(
                FeedErrorCategory::Config,
                "http_client_build_error",
                err.to_string(),
            )
        })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.client.request(method, self.endpoint(segments))
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, FeedError> {
        execute(FeedErrorCategory::Fetch, request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| map_request_error(FeedErrorCategory::Fetch, err))
    }

    async fn mutate(&self, request: RequestBuilder) -> Result<(), FeedError> {
        execute(FeedErrorCategory::Mutation, request).await.map(|_| ())
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn list_notifications(&self, query: &ListQuery) -> Result<NotificationPage, FeedError> {
        let request = self
            .request(Method::GET, &["notifications"])
            .query(&query.to_pairs());
        self.fetch_json(request).await
    }

    async fn stats(&self) -> Result<FeedStats, FeedError> {
        let request = self.request(Method::GET, &["notifications", "stats"]);
        self.fetch_json(request).await
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<(), FeedError> {
        let id = id.to_string();
        let request = self.request(Method::PATCH, &["notifications", id.as_str(), "read"]);
        self.mutate(request).await
    }

    async fn bulk_mark_read(&self, ids: &[NotificationId]) -> Result<(), FeedError> {
        let request = self
            .request(Method::POST, &["notifications", "bulk-read"])
            .json(&BulkRequest {
                notification_ids: ids,
            });
        self.mutate(request).await
    }

    async fn bulk_delete(&self, ids: &[NotificationId]) -> Result<(), FeedError> {
        let request = self
            .request(Method::POST, &["notifications", "bulk-delete"])
            .json(&BulkRequest {
                notification_ids: ids,
            });
        self.mutate(request).await
    }

    async fn generate_mock_data(&self, count: u32) -> Result<(), FeedError> {
        let request = self
            .request(Method::POST, &["notifications", "generate"])
            .json(&GenerateRequest { count });
        self.mutate(request).await
    }
}

async fn execute(
    category: FeedErrorCategory,
    request: RequestBuilder,
) -> Result<Response, FeedError> {
    let response = request
        .send()
        .await
        .map_err(|err| map_request_error(category, err))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", body.trim())
    };
    Err(FeedError::http(category, status.as_u16(), message))
}

fn map_request_error(category: FeedErrorCategory, err: reqwest::Error) -> FeedError {
    if err.is_decode() {
        return FeedError::parse(format!("invalid response body: {err}"));
    }

    let code = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect_failed"
    } else {
        "network_error"
    };
    let mut mapped = FeedError::new(category, code, err.to_string());
    mapped.status = err.status().map(|status| status.as_u16());
    mapped
}
