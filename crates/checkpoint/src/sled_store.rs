//! Durable, file-backed checkpoint storage using an embedded `sled` database.
//!
//! Keys are `"{workflow_id}\0{created_at_nanos:020}"` so `scan_prefix`
//! naturally yields a workflow's records in creation order: `latest` is the
//! tail of that scan, `history` is the whole thing. Writers only ever append
//! within a single workflow's key range, so no cross-record locking is
//! needed beyond what `sled` already does internally.

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{CheckpointError, Result};
use crate::record::CheckpointRecord;
use crate::traits::CheckpointSaver;

pub struct SledCheckpointSaver<S> {
    db: sled::Db,
    _marker: std::marker::PhantomData<S>,
}

fn key_for(workflow_id: &str, created_at_nanos: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(workflow_id.len() + 1 + 20);
    key.extend_from_slice(workflow_id.as_bytes());
    key.push(0);
    key.extend_from_slice(format!("{created_at_nanos:020}").as_bytes());
    key
}

fn prefix_for(workflow_id: &str) -> Vec<u8> {
    let mut key = workflow_id.as_bytes().to_vec();
    key.push(0);
    key
}

impl<S> SledCheckpointSaver<S> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db, _marker: std::marker::PhantomData })
    }
}

#[async_trait]
impl<S> CheckpointSaver<S> for SledCheckpointSaver<S>
where
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn append(&self, record: CheckpointRecord<S>) -> Result<()> {
        let db = self.db.clone();
        let workflow_id = record.workflow_id.clone();
        let step_name = record.step_name.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let key = key_for(&record.workflow_id, record.created_at.timestamp_nanos_opt().unwrap_or_default());
            let value = serde_json::to_vec(&record)?;
            db.insert(key, value)?;
            db.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))??;

        debug!(workflow_id = %workflow_id, step = %step_name, "checkpoint appended");
        Ok(())
    }

    async fn latest(&self, workflow_id: &str) -> Result<Option<CheckpointRecord<S>>> {
        let db = self.db.clone();
        let prefix = prefix_for(workflow_id);
        let workflow_id_owned = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<CheckpointRecord<S>>> {
            match db.scan_prefix(prefix).values().last() {
                Some(Ok(bytes)) => {
                    let record: CheckpointRecord<S> =
                        serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupted {
                            workflow_id: workflow_id_owned.clone(),
                            reason: e.to_string(),
                        })?;
                    Ok(Some(record))
                }
                Some(Err(e)) => Err(CheckpointError::Backend(e.to_string())),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))?
    }

    async fn history(&self, workflow_id: &str) -> Result<Vec<CheckpointRecord<S>>> {
        let db = self.db.clone();
        let prefix = prefix_for(workflow_id);
        let workflow_id_owned = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<CheckpointRecord<S>>> {
            db.scan_prefix(prefix)
                .values()
                .map(|res| {
                    let bytes = res.map_err(|e| CheckpointError::Backend(e.to_string()))?;
                    serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupted {
                        workflow_id: workflow_id_owned.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect()
        })
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))?
    }
}
