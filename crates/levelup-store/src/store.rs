//! The write-through progress store.
//!
//! State lives in memory behind a [`RwLock`]; every successful mutation bumps
//! a generation counter and is flushed to disk before the mutating call
//! returns. Flushes are serialized by a separate mutex and a flush is skipped
//! when a newer generation already reached disk, so the file never regresses
//! to an older state.
//!
//! A flush that keeps failing after the configured retries does not fail the
//! mutation. The store is marked dirty instead and [`ProgressStore::flush_pending`]
//! retries the latest state later.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use levelup_types::{GuildConfig, GuildId, MemberId, MemberProgress};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::snapshot::{GuildMembers, PersistedState, STORE_FORMAT_VERSION};

/// How a [`ProgressStore`] is opened.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// State file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Retry behavior for failed flushes.
    pub retry: RetryPolicy,
    /// Configuration given to guilds the first time they are referenced.
    pub guild_defaults: GuildConfig,
    /// Write indented JSON instead of compact JSON.
    pub pretty: bool,
}

/// Mutable view of one guild handed to [`ProgressStore::mutate_guild`].
#[derive(Debug)]
pub struct GuildState<'a> {
    /// Guild being mutated.
    pub guild_id: GuildId,
    /// The guild's configuration (defaults if it was never set).
    pub config: &'a mut GuildConfig,
    /// The guild's member records.
    pub members: &'a mut GuildMembers,
}

/// Record counts for startup logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Guilds with configuration or progress.
    pub guilds: usize,
    /// Member records across all guilds.
    pub members: usize,
}

#[derive(Debug)]
struct Inner {
    data: PersistedState,
    generation: u64,
}

#[derive(Debug, Default)]
struct FlushState {
    flushed_generation: u64,
    dirty: bool,
}

/// Guild configuration and member progress with write-through persistence.
#[derive(Debug)]
pub struct ProgressStore {
    path: Option<PathBuf>,
    retry: RetryPolicy,
    guild_defaults: GuildConfig,
    pretty: bool,
    inner: RwLock<Inner>,
    flush: Mutex<FlushState>,
}

impl ProgressStore {
    /// Open a store, loading the state file if it exists.
    ///
    /// A missing file yields an empty store. A file that cannot be parsed or
    /// carries a different format version is an error.
    pub async fn open(options: StoreOptions) -> Result<Self, StoreError> {
        let data = match &options.path {
            Some(path) => load(path).await?,
            None => PersistedState::default(),
        };

        info!(
            path = ?options.path,
            guilds = data.guild_count(),
            members = data.member_count(),
            "Progress store opened"
        );

        Ok(Self::from_parts(options, data))
    }

    /// An empty store that never touches disk.
    pub fn in_memory(guild_defaults: GuildConfig) -> Self {
        Self::from_parts(
            StoreOptions {
                guild_defaults,
                ..StoreOptions::default()
            },
            PersistedState::default(),
        )
    }

    fn from_parts(options: StoreOptions, data: PersistedState) -> Self {
        Self {
            path: options.path,
            retry: options.retry,
            guild_defaults: options.guild_defaults,
            pretty: options.pretty,
            inner: RwLock::new(Inner {
                data,
                generation: 0,
            }),
            flush: Mutex::new(FlushState::default()),
        }
    }

    /// Configuration template for guilds that were never configured.
    pub const fn guild_defaults(&self) -> &GuildConfig {
        &self.guild_defaults
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// A guild's configuration, or the defaults if it was never set.
    ///
    /// Reading does not create the guild.
    pub async fn guild_config(&self, guild_id: GuildId) -> GuildConfig {
        let inner = self.inner.read().await;
        inner
            .data
            .config_by_guild
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| self.guild_defaults.clone())
    }

    /// A member's progress in a guild, if any was ever recorded.
    pub async fn member(&self, guild_id: GuildId, member_id: MemberId) -> Option<MemberProgress> {
        let inner = self.inner.read().await;
        inner
            .data
            .progress_by_guild
            .get(&guild_id)
            .and_then(|members| members.get(&member_id))
            .cloned()
    }

    /// Every member record of a guild, ordered by member id.
    pub async fn list_members(&self, guild_id: GuildId) -> Vec<(MemberId, MemberProgress)> {
        let inner = self.inner.read().await;
        inner
            .data
            .progress_by_guild
            .get(&guild_id)
            .map(|members| {
                members
                    .iter()
                    .map(|(id, progress)| (*id, progress.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run `f` against a guild's configuration and members under one read lock.
    ///
    /// Unknown guilds are presented with the defaults and no members.
    pub async fn read_guild<T>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&GuildConfig, &GuildMembers) -> T,
    ) -> T {
        let inner = self.inner.read().await;
        let config = inner
            .data
            .config_by_guild
            .get(&guild_id)
            .unwrap_or(&self.guild_defaults);
        let empty = GuildMembers::new();
        let members = inner.data.progress_by_guild.get(&guild_id).unwrap_or(&empty);
        f(config, members)
    }

    /// A full copy of the current state.
    pub async fn snapshot(&self) -> PersistedState {
        self.inner.read().await.data.clone()
    }

    /// Record counts of the current state.
    pub async fn stats(&self) -> StoreStats {
        let inner = self.inner.read().await;
        StoreStats {
            guilds: inner.data.guild_count(),
            members: inner.data.member_count(),
        }
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Replace a guild's configuration.
    pub async fn set_guild_config(&self, guild_id: GuildId, config: GuildConfig) {
        self.commit(|data| {
            data.config_by_guild.insert(guild_id, config);
        })
        .await;
    }

    /// Replace a member's progress.
    pub async fn set_member(&self, guild_id: GuildId, member_id: MemberId, progress: MemberProgress) {
        self.commit(|data| {
            data.progress_by_guild
                .entry(guild_id)
                .or_default()
                .insert(member_id, progress);
        })
        .await;
    }

    /// Remove one member's record. Returns whether a record existed.
    pub async fn delete_member(&self, guild_id: GuildId, member_id: MemberId) -> bool {
        self.commit(|data| {
            data.progress_by_guild
                .get_mut(&guild_id)
                .and_then(|members| members.remove(&member_id))
                .is_some()
        })
        .await
    }

    /// Remove a guild's configuration and every member record.
    ///
    /// Returns the number of member records removed.
    pub async fn delete_guild(&self, guild_id: GuildId) -> usize {
        self.commit(|data| {
            data.config_by_guild.remove(&guild_id);
            data.progress_by_guild
                .remove(&guild_id)
                .as_ref()
                .map_or(0, BTreeMap::len)
        })
        .await
    }

    /// Mutate one guild atomically.
    ///
    /// `f` sees the configuration and members under a single write lock,
    /// so no other mutation interleaves with it. A guild that does not
    /// exist yet starts from the default configuration and is kept only
    /// when `f` returns `Ok`. On `Err` the error is passed through, the
    /// guild is left as it was and nothing is written.
    pub async fn mutate_guild<T, E>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(GuildState<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let (value, generation, encoded) = {
            let mut inner = self.inner.write().await;
            let data = &mut inner.data;
            let new_config = !data.config_by_guild.contains_key(&guild_id);
            let new_members = !data.progress_by_guild.contains_key(&guild_id);
            let config = data
                .config_by_guild
                .entry(guild_id)
                .or_insert_with(|| self.guild_defaults.clone());
            let members = data.progress_by_guild.entry(guild_id).or_default();
            let value = match f(GuildState {
                guild_id,
                config,
                members,
            }) {
                Ok(value) => value,
                Err(e) => {
                    if new_config {
                        data.config_by_guild.remove(&guild_id);
                    }
                    if new_members {
                        data.progress_by_guild.remove(&guild_id);
                    }
                    return Err(e);
                }
            };
            let (generation, encoded) = self.advance(&mut inner);
            (value, generation, encoded)
        };

        self.persist(generation, encoded).await;
        Ok(value)
    }

    /// Mutate the whole state under one write lock and flush it.
    pub async fn commit<T>(&self, f: impl FnOnce(&mut PersistedState) -> T) -> T {
        let (value, generation, encoded) = {
            let mut inner = self.inner.write().await;
            let value = f(&mut inner.data);
            let (generation, encoded) = self.advance(&mut inner);
            (value, generation, encoded)
        };

        self.persist(generation, encoded).await;
        value
    }

    /// Bump the generation and encode the state it names.
    ///
    /// Encoding happens under the write lock so the bytes match the
    /// generation exactly; the disk write itself happens after the lock
    /// is released.
    fn advance(&self, inner: &mut Inner) -> (u64, Option<Result<Vec<u8>, serde_json::Error>>) {
        inner.generation = inner.generation.saturating_add(1);
        let encoded = self.path.as_ref().map(|_| self.encode(&inner.data));
        (inner.generation, encoded)
    }

    fn encode(&self, data: &PersistedState) -> Result<Vec<u8>, serde_json::Error> {
        if self.pretty {
            serde_json::to_vec_pretty(data)
        } else {
            serde_json::to_vec(data)
        }
    }

    // -----------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------

    /// Whether the latest state failed to reach disk.
    pub async fn is_dirty(&self) -> bool {
        self.flush.lock().await.dirty
    }

    /// Retry writing the latest state if an earlier flush failed.
    ///
    /// Returns `Ok(true)` when a write happened, `Ok(false)` when the store
    /// was clean. The store stays dirty if this attempt fails too.
    pub async fn flush_pending(&self) -> Result<bool, StoreError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let mut flush = self.flush.lock().await;
        if !flush.dirty {
            return Ok(false);
        }

        let (generation, bytes) = {
            let inner = self.inner.read().await;
            (inner.generation, self.encode(&inner.data)?)
        };

        self.write_with_retry(path, &bytes).await?;
        flush.flushed_generation = flush.flushed_generation.max(generation);
        flush.dirty = false;
        info!(generation, "Pending progress flushed");
        Ok(true)
    }

    async fn persist(&self, generation: u64, encoded: Option<Result<Vec<u8>, serde_json::Error>>) {
        let (Some(path), Some(encoded)) = (&self.path, encoded) else {
            return;
        };

        let mut flush = self.flush.lock().await;
        if generation <= flush.flushed_generation {
            debug!(
                generation,
                flushed = flush.flushed_generation,
                "Skipping stale flush"
            );
            return;
        }

        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(generation, error = %e, "Failed to encode progress state");
                flush.dirty = true;
                return;
            }
        };

        match self.write_with_retry(path, &bytes).await {
            Ok(()) => {
                if flush.dirty {
                    info!(generation, "Progress store recovered from failed flush");
                }
                flush.flushed_generation = generation;
                flush.dirty = false;
            }
            Err(e) => {
                error!(
                    generation,
                    path = %path.display(),
                    error = %e,
                    "Progress flush failed, store marked dirty"
                );
                flush.dirty = true;
            }
        }
    }

    async fn write_with_retry(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            match write_atomic(path, bytes).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Progress write failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn load(path: &Path) -> Result<PersistedState, StoreError> {
    if !fs::try_exists(path).await.map_err(StoreError::io(path))? {
        info!(path = %path.display(), "No state file yet, starting empty");
        return Ok(PersistedState::default());
    }

    let bytes = fs::read(path).await.map_err(StoreError::io(path))?;
    let data: PersistedState = serde_json::from_slice(&bytes)?;
    if data.version != STORE_FORMAT_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: STORE_FORMAT_VERSION,
            found: data.version,
        });
    }
    Ok(data)
}

/// Write `bytes` to a sibling temp file, fsync it, then rename it over `path`.
///
/// Readers see either the previous file or the complete new one.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(StoreError::io(parent))?;
    }

    let temp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    let written = async {
        let mut file = fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        // Best effort: the temp file may not exist if create failed.
        let _ = fs::remove_file(&temp).await;
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}
