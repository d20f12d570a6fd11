use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_stream::stream;
use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, from_value};
use tracing::debug;
use uuid::Uuid;

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        ChangesResponse, CouchDocument, DocIdsFilter, PutResponse, doc_id, seq_token, server_date,
    },
};
use crate::dao::{
    document_store::{
        Document, DocumentEvent, DocumentSnapshot, DocumentStore, FieldValue, Fields,
        TransactFn, TransactionAbort, apply_fields, merge_keyed,
    },
    storage::{StorageError, StorageResult},
};

const RETRY_BASE_DELAY_MS: u64 = 25;

/// Outcome of a conditional PUT.
enum PutOutcome {
    Committed(String),
    Conflict,
}

/// [`DocumentStore`] backed by a CouchDB database.
///
/// Optimistic concurrency relies on `_rev`: a PUT carrying a stale revision is
/// answered with `409 Conflict` and the read-modify-write is retried.
#[derive(Clone)]
pub struct CouchDocumentStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    max_attempts: u32,
    longpoll_timeout: Duration,
}

impl CouchDocumentStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            max_attempts: config.max_attempts.max(1),
            longpoll_timeout: config.longpoll_timeout,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    /// Server clock via a HEAD on the database, falling back to the local clock.
    async fn server_now(&self) -> SystemTime {
        let url = self.database_url();
        match self.authorize(self.client.head(&url)).send().await {
            Ok(response) => server_date(response.headers()).unwrap_or_else(SystemTime::now),
            Err(_) => SystemTime::now(),
        }
    }

    /// Fetch a document together with the server clock at read time.
    async fn fetch(&self, doc_id: &str) -> CouchResult<Option<(CouchDocument, SystemTime)>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let now = server_date(response.headers()).unwrap_or_else(SystemTime::now);
                let document = response.json::<CouchDocument>().await.map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })?;
                Ok(Some((document, now)))
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put(&self, document: &CouchDocument) -> CouchResult<PutOutcome> {
        let path = document.id.as_str();
        let response = self
            .request(Method::PUT, path)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => {
                let body = response.json::<PutResponse>().await.map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: path.to_string(),
                        source,
                    }
                })?;
                Ok(PutOutcome::Committed(body.rev))
            }
            other => Err(CouchDaoError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    /// Shared read-modify-write loop behind merges, field sets and transactions.
    ///
    /// `mutate` returns `Ok(false)` when there is nothing to write; the current
    /// snapshot is then returned unchanged.
    async fn read_modify_write<F>(
        &self,
        collection: &str,
        id: &str,
        mutate: F,
    ) -> StorageResult<DocumentSnapshot>
    where
        F: Fn(&mut Document, SystemTime) -> Result<bool, TransactionAbort>,
    {
        let key = doc_id(collection, id);
        for attempt in 1..=self.max_attempts {
            let Some((mut document, now)) = self.fetch(&key).await? else {
                return Err(StorageError::not_found(collection, id));
            };
            if !mutate(&mut document.body, now).map_err(StorageError::Aborted)? {
                return Ok(document.into_snapshot());
            }

            match self.put(&document).await? {
                PutOutcome::Committed(rev) => {
                    document.rev = Some(rev);
                    return Ok(document.into_snapshot());
                }
                PutOutcome::Conflict => {
                    debug!(%collection, %id, attempt, "CouchDB revision conflict; retrying");
                    let delay = {
                        let ceiling = RETRY_BASE_DELAY_MS * u64::from(attempt);
                        Duration::from_millis(rand::rng().random_range(0..=ceiling))
                    };
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(StorageError::TransactionExhausted {
            collection: collection.to_owned(),
            id: id.to_owned(),
            attempts: self.max_attempts,
        })
    }

    async fn poll_changes(&self, doc_id: &str, since: &str) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let timeout_ms = self.longpoll_timeout.as_millis().to_string();
        let query = [
            ("feed", "longpoll"),
            ("include_docs", "true"),
            ("filter", "_doc_ids"),
            ("since", since),
            ("timeout", timeout_ms.as_str()),
        ];

        let response = self
            .request(Method::POST, CHANGES)
            .query(&query)
            .json(&DocIdsFilter { doc_ids: [doc_id] })
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<ChangesResponse>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: CHANGES.to_string(),
                source,
            })
    }
}

impl DocumentStore for CouchDocumentStore {
    fn create(&self, collection: &str, fields: Fields) -> BoxFuture<'static, StorageResult<String>> {
        let store = self.clone();
        let collection = collection.to_owned();
        Box::pin(async move {
            let id = Uuid::new_v4().simple().to_string();
            let now = if fields.values().any(|v| *v == FieldValue::ServerTimestamp) {
                store.server_now().await
            } else {
                SystemTime::now()
            };
            let mut body = Document::new();
            apply_fields(&mut body, fields, now);

            let document = CouchDocument {
                id: doc_id(&collection, &id),
                rev: None,
                body,
            };
            match store.put(&document).await? {
                PutOutcome::Committed(_) => Ok(id),
                PutOutcome::Conflict => Err(CouchDaoError::RequestStatus {
                    path: document.id,
                    status: StatusCode::CONFLICT,
                }
                .into()),
            }
        })
    }

    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<DocumentSnapshot>>> {
        let store = self.clone();
        let key = doc_id(collection, id);
        Box::pin(async move {
            let found = store.fetch(&key).await?;
            Ok(found.map(|(document, _)| document.into_snapshot()))
        })
    }

    fn subscribe(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxStream<'static, StorageResult<DocumentEvent>> {
        let store = self.clone();
        let key = doc_id(collection, id);

        stream! {
            match store.fetch(&key).await {
                Ok(Some(_)) => {}
                Ok(None) => yield Ok(DocumentEvent::Deleted),
                Err(err) => {
                    yield Err(err.into());
                    return;
                }
            }

            let mut since = String::from("0");
            loop {
                let changes = match store.poll_changes(&key, &since).await {
                    Ok(changes) => changes,
                    Err(err) => {
                        yield Err(err.into());
                        return;
                    }
                };

                for row in changes.results {
                    if row.deleted {
                        yield Ok(DocumentEvent::Deleted);
                        continue;
                    }
                    let Some(raw) = row.doc else { continue };
                    match from_value::<CouchDocument>(raw) {
                        Ok(document) => yield Ok(DocumentEvent::Snapshot(document.into_snapshot())),
                        Err(source) => {
                            yield Err(CouchDaoError::DeserializeChange {
                                path: key.clone(),
                                source,
                            }
                            .into());
                            return;
                        }
                    }
                }
                since = seq_token(&changes.last_seq);
            }
        }
        .boxed()
    }

    fn merge_array_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        key: &str,
        element: Value,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let (collection, id) = (collection.to_owned(), id.to_owned());
        let (field, key) = (field.to_owned(), key.to_owned());
        Box::pin(async move {
            store
                .read_modify_write(&collection, &id, |body, _now| {
                    Ok(merge_keyed(body, &field, &key, element.clone()))
                })
                .await
                .map(|_| ())
        })
    }

    fn set_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let (collection, id) = (collection.to_owned(), id.to_owned());
        Box::pin(async move {
            store
                .read_modify_write(&collection, &id, |body, now| {
                    apply_fields(body, fields.clone(), now);
                    Ok(true)
                })
                .await
                .map(|_| ())
        })
    }

    fn transact(
        &self,
        collection: &str,
        id: &str,
        body: TransactFn,
    ) -> BoxFuture<'static, StorageResult<DocumentSnapshot>> {
        let store = self.clone();
        let (collection, id) = (collection.to_owned(), id.to_owned());
        Box::pin(async move {
            store
                .read_modify_write(&collection, &id, |document, now| {
                    let fields = body(&*document)?;
                    apply_fields(document, fields, now);
                    Ok(true)
                })
                .await
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }
}
