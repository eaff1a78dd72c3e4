//! PostgreSQL document store: one `jsonb` table keyed by (collection, id).

use async_trait::async_trait;
use coordination::debate::{Collection, DocumentStore, PersistenceError};
use serde_json::Value;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS debate_documents (
    collection  TEXT        NOT NULL,
    document_id TEXT        NOT NULL,
    document    JSONB       NOT NULL,
    inserted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (collection, document_id)
)";

const INSERT_DOCUMENT: &str = "\
INSERT INTO debate_documents (collection, document_id, document)
VALUES ($1, $2, $3)
ON CONFLICT (collection, document_id) DO NOTHING";

fn backend_error(e: tokio_postgres::Error) -> PersistenceError {
    PersistenceError::Backend {
        reason: e.to_string(),
    }
}

pub struct PostgresDocumentStore {
    client: Client,
}

impl PostgresDocumentStore {
    /// Connect, spawn the connection driver, and ensure the table exists.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(backend_error)?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection closed with error");
            }
        });

        client
            .batch_execute(CREATE_TABLE)
            .await
            .map_err(backend_error)?;
        info!("postgres document store ready");
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn append(
        &self,
        collection: Collection,
        document_id: &str,
        document: &Value,
    ) -> Result<(), PersistenceError> {
        self.client
            .execute(
                INSERT_DOCUMENT,
                &[&collection.name(), &document_id, &Json(document)],
            )
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}
