//! REST document store over reqwest.
//!
//! layout: `{base}/{collection}/{id}` for documents and
//! `{base}/{collection}/{id}/{subcollection}` for appends.

use super::{DocumentStore, StoreError};
use crate::config::RemoteConfig;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client for remote store")?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key })
    }

    pub fn from_config(remote: &RemoteConfig) -> anyhow::Result<Option<Self>> {
        match &remote.base_url {
            Some(url) => Ok(Some(Self::new(
                url,
                remote.api_key.clone(),
                Duration::from_secs(remote.timeout_seconds),
            )?)),
            None => Ok(None),
        }
    }

    fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(segment);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status { status: status.as_u16(), body })
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .authorized(self.client.get(self.url(&[collection, id])))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc = Self::check(response).await?.json::<Value>().await?;
        Ok(Some(doc))
    }

    async fn set(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.put(self.url(&[collection, id])))
            .json(&doc)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.patch(self.url(&[collection, id])))
            .json(&fields)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(format!("{}/{}", collection, id)));
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn append(
        &self,
        collection: &str,
        id: &str,
        subcollection: &str,
        doc: Value,
    ) -> Result<String, StoreError> {
        let response = self
            .authorized(self.client.post(self.url(&[collection, id, subcollection])))
            .json(&doc)
            .send()
            .await?;
        let response = Self::check(response).await?;

        // the id in the reply is informational; an empty body is fine
        let body = response.text().await?;
        let id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer, key: Option<&str>) -> HttpDocumentStore {
        let key = key.map(str::to_string);
        HttpDocumentStore::new(&server.uri(), key, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn get_returns_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sensor_sessions/SOIL_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"userId": "alice"})))
            .mount(&server)
            .await;

        let doc = store(&server, None).get("sensor_sessions", "SOIL_1").await.unwrap();
        assert_eq!(doc, Some(json!({"userId": "alice"})));
    }

    #[tokio::test]
    async fn get_maps_404_to_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let doc = store(&server, None).get("sensor_sessions", "SOIL_1").await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn set_puts_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/unassigned_sensors/SOIL_1"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_json(json!({"status": "waiting"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        store(&server, Some("s3cret"))
            .set("unassigned_sensors", "SOIL_1", json!({"status": "waiting"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = store(&server, None)
            .update("sensor_sessions", "SOIL_1", json!({"lastHeartbeat": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn server_errors_carry_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = store(&server, None).set("c", "d", json!({})).await.unwrap_err();
        match err {
            StoreError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn append_posts_to_subcollection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sensor_readings/SOIL_1/readings"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "r-17"})))
            .mount(&server)
            .await;

        let id = store(&server, None)
            .append("sensor_readings", "SOIL_1", "readings", json!({"moisture": 41.2}))
            .await
            .unwrap();
        assert_eq!(id, "r-17");
    }

    #[test]
    fn no_base_url_means_no_store() {
        assert!(HttpDocumentStore::from_config(&RemoteConfig::default()).unwrap().is_none());
    }
}
