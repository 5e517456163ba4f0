//! Firebase Realtime Database REST backend.
//!
//! Every location is addressed as `<base>/<path>.json`. Conditional reads
//! send `X-Firebase-ETag: true` and conditional writes send `if-match`; a lost
//! race comes back as HTTP 412.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use super::{DbPath, Etag, RealtimeDb};
use crate::error::StoreError;

const ETAG_REQUEST_HEADER: &str = "X-Firebase-ETag";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for one database.
#[derive(Debug, Clone)]
pub struct FirebaseStore {
    client: Client,
    base: Url,
    auth: Option<String>,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl FirebaseStore {
    /// Create a client for the database at `base_url`
    /// (e.g. `https://my-project-default-rtdb.firebaseio.com/`).
    ///
    /// `auth` is passed as the `auth` query parameter on every request
    /// (a database secret or an ID token).
    pub fn new(base_url: &str, auth: Option<String>) -> Result<Self, StoreError> {
        let base = Url::parse(base_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(StoreError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base, auth })
    }

    fn url(&self, path: &DbPath) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StoreError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty();
            let (last, parents) = path
                .segments()
                .split_last()
                .ok_or_else(|| StoreError::InvalidPath(String::new()))?;
            segments.extend(parents);
            segments.push(&format!("{}.json", last));
        }
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    async fn send(&self, path: &DbPath, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED {
            return Err(StoreError::PreconditionFailed(path.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn read_body(response: Response) -> Result<Option<Value>, StoreError> {
        let value: Value = response.json().await?;
        Ok(if value.is_null() { None } else { Some(value) })
    }
}

#[async_trait]
impl RealtimeDb for FirebaseStore {
    async fn get(&self, path: &DbPath) -> Result<Option<Value>, StoreError> {
        let response = self.send(path, self.client.get(self.url(path)?)).await?;
        Self::read_body(response).await
    }

    async fn get_with_etag(&self, path: &DbPath) -> Result<(Option<Value>, Etag), StoreError> {
        let request = self
            .client
            .get(self.url(path)?)
            .header(ETAG_REQUEST_HEADER, "true");
        let response = self.send(path, request).await?;
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| Etag(v.to_string()))
            .ok_or_else(|| StoreError::Status {
                status: response.status().as_u16(),
                body: "response carried no ETag".into(),
            })?;
        Ok((Self::read_body(response).await?, etag))
    }

    async fn put(&self, path: &DbPath, value: &Value) -> Result<(), StoreError> {
        self.send(path, self.client.put(self.url(path)?).json(value))
            .await?;
        Ok(())
    }

    async fn put_if_match(
        &self,
        path: &DbPath,
        value: &Value,
        etag: &Etag,
    ) -> Result<(), StoreError> {
        let header = HeaderValue::from_str(&etag.0)
            .map_err(|_| StoreError::InvalidPath(format!("etag {}", etag.0)))?;
        let request = self
            .client
            .put(self.url(path)?)
            .header(reqwest::header::IF_MATCH, header)
            .json(value);
        self.send(path, request).await?;
        Ok(())
    }

    async fn patch(&self, path: &DbPath, fields: &Value) -> Result<(), StoreError> {
        self.send(path, self.client.patch(self.url(path)?).json(fields))
            .await?;
        Ok(())
    }

    async fn push(&self, path: &DbPath, value: &Value) -> Result<String, StoreError> {
        let response = self
            .send(path, self.client.post(self.url(path)?).json(value))
            .await?;
        let created: PushResponse = response.json().await?;
        Ok(created.name)
    }

    async fn delete(&self, path: &DbPath) -> Result<(), StoreError> {
        self.send(path, self.client.delete(self.url(path)?)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let path = DbPath::new(["maintenance"])?;
        let mut url = self.url(&path)?;
        url.query_pairs_mut().append_pair("shallow", "true");
        self.send(&path, self.client.get(url)).await?;
        Ok(())
    }
}
