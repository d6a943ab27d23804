//! HTTP client for a remote entity store
//!
//! Speaks a small JSON protocol:
//! - `POST   /entities`             create
//! - `GET    /entities/{id}`        load by internal id
//! - `GET    /entities/stix/{id}`   load by STIX id
//! - `POST   /entities/list`        one page of a listing
//! - `DELETE /entities/{id}`        delete
//! - `POST   /relations`            create a relation
//! - `POST   /relations/query`      relation rows for a query
//!
//! Every request is bounded by the configured timeout.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use stixgraph_core::{Connection, EntityCategory, EntityType, NewEntity, PagingArgs, StixEntity};

use crate::{EntityStore, Relation, RelationQuery, RelationRow, StoreError};

/// Remote store configuration
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// Base URL of the store API
    pub base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4000/api".to_string(),
            api_token: None,
            timeout_secs: 30,
        }
    }
}

impl HttpStoreConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.api_token = token;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[derive(Serialize)]
struct CreateEntityBody<'a> {
    category: EntityCategory,
    entity: &'a NewEntity,
}

#[derive(Serialize)]
struct ListEntitiesBody<'a> {
    types: &'a [EntityType],
    search_fields: &'a [&'a str],
    paging: &'a PagingArgs,
}

#[derive(Serialize)]
struct CreateRelationBody<'a> {
    from_id: &'a str,
    to_id: &'a str,
    relation_type: &'a str,
}

/// Entity store reached over HTTP
pub struct HttpStore {
    client: Client,
    base_url: Url,
    config: HttpStoreConfig,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self, StoreError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            StoreError::Backend(format!("Invalid store URL {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Backend(format!(
                "Store URL cannot be a base: {}",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("stixgraph/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// URL for path segments below the base, each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => StoreError::NotFound(text),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => StoreError::Constraint(text),
            _ => StoreError::Backend(format!("Store returned {}: {}", status, text)),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn load(&self, url: Url) -> Result<Option<StixEntity>, StoreError> {
        match self.send(self.client.get(url)).await {
            Ok(response) => Ok(Some(Self::decode(response).await?)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EntityStore for HttpStore {
    async fn create_entity(
        &self,
        payload: NewEntity,
        category: EntityCategory,
    ) -> Result<StixEntity, StoreError> {
        let body = CreateEntityBody {
            category,
            entity: &payload,
        };
        let response = self
            .send(self.client.post(self.url(&["entities"])).json(&body))
            .await?;
        let entity: StixEntity = Self::decode(response).await?;
        debug!("Created {} {}", entity.entity_type(), entity.id());
        Ok(entity)
    }

    async fn load_entity_by_id(&self, id: &str) -> Result<Option<StixEntity>, StoreError> {
        self.load(self.url(&["entities", id])).await
    }

    async fn load_entity_by_stix_id(
        &self,
        stix_id: &str,
    ) -> Result<Option<StixEntity>, StoreError> {
        self.load(self.url(&["entities", "stix", stix_id])).await
    }

    async fn list_entities(
        &self,
        types: &[EntityType],
        search_fields: &[&str],
        args: &PagingArgs,
    ) -> Result<Connection<StixEntity>, StoreError> {
        let body = ListEntitiesBody {
            types,
            search_fields,
            paging: args,
        };
        let response = self
            .send(self.client.post(self.url(&["entities", "list"])).json(&body))
            .await?;
        Self::decode(response).await
    }

    async fn delete_entity_by_id(&self, id: &str) -> Result<(), StoreError> {
        match self.send(self.client.delete(self.url(&["entities", id]))).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn create_relation(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<Relation, StoreError> {
        let body = CreateRelationBody {
            from_id,
            to_id,
            relation_type,
        };
        let response = self
            .send(self.client.post(self.url(&["relations"])).json(&body))
            .await?;
        Self::decode(response).await
    }

    async fn find_with_connected_relations(
        &self,
        query: &RelationQuery,
    ) -> Result<Vec<RelationRow>, StoreError> {
        let response = self
            .send(self.client.post(self.url(&["relations", "query"])).json(query))
            .await?;
        Self::decode(response).await
    }
}
