use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use santa_core::{DrawState, DrawStatus, ParticipantSummary, Roster, RosterError};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt snapshot: {0}")]
    Serde(#[from] serde_json::Error),
}

/// What every connected client may see after a change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterView {
    pub status: DrawStatus,
    pub participants: Vec<ParticipantSummary>,
}

impl From<&Roster> for RosterView {
    fn from(roster: &Roster) -> Self {
        Self {
            status: roster.status(),
            participants: roster.list_participants(),
        }
    }
}

/// Single authoritative copy of the roster.
///
/// Mutations are serialized by the write lock and applied copy-on-write: the
/// live roster is only replaced once the new snapshot has been persisted.
#[derive(Clone)]
pub struct RosterStore {
    roster: Arc<RwLock<Roster>>,
    updates: broadcast::Sender<RosterView>,
    persist_path: Option<PathBuf>,
}

impl RosterStore {
    pub fn new(roster: Roster) -> Self {
        let (updates, _) = broadcast::channel(32);
        Self {
            roster: Arc::new(RwLock::new(roster)),
            updates,
            persist_path: None,
        }
    }

    /// Fresh in-memory roster with a newly created draw state.
    pub fn in_memory(default_admin_pin: &str) -> Self {
        Self::new(fresh_roster(default_admin_pin))
    }

    pub async fn with_persistence(
        path: impl Into<PathBuf>,
        default_admin_pin: &str,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let roster = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let roster: Roster = serde_json::from_slice(&bytes)?;
                info!(
                    path = %path.display(),
                    participants = roster.participants.len(),
                    is_drawn = roster.state.is_drawn,
                    "loaded roster snapshot"
                );
                roster
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let roster = fresh_roster(default_admin_pin);
                write_snapshot(&path, &roster).await?;
                info!(path = %path.display(), state_id = %roster.state.id, "created draw state");
                roster
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let mut store = Self::new(roster);
        store.persist_path = Some(path);
        Ok(store)
    }

    pub async fn read<T>(&self, f: impl FnOnce(&Roster) -> T) -> T {
        let roster = self.roster.read().await;
        f(&roster)
    }

    pub async fn snapshot(&self) -> Roster {
        self.roster.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterView> {
        self.updates.subscribe()
    }

    /// Applies `op` as one atomic transition.
    ///
    /// If `op` fails or the snapshot cannot be written, the live roster is left
    /// exactly as it was.
    pub async fn commit<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Roster) -> Result<T, RosterError>,
    {
        let mut live = self.roster.write().await;
        let mut next = live.clone();
        let out = op(&mut next)?;

        if let Some(path) = &self.persist_path {
            if let Err(err) = write_snapshot(path, &next).await {
                error!(error = %err, "persist failed, transition discarded");
                return Err(err.into());
            }
        }

        *live = next;
        let view = RosterView::from(&*live);
        drop(live);

        // No subscribers is fine.
        let _ = self.updates.send(view);
        Ok(out)
    }
}

fn fresh_roster(default_admin_pin: &str) -> Roster {
    Roster::new(DrawState::new(Uuid::new_v4().to_string(), default_admin_pin))
}

async fn write_snapshot(path: &Path, roster: &Roster) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(roster)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}
