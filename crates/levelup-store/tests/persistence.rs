//! File-backed behavior of the progress store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use levelup_store::{ProgressStore, RetryPolicy, StoreError, StoreOptions};
use levelup_types::{GuildConfig, GuildId, MemberId, MemberProgress, XpReward};

const GUILD: GuildId = GuildId(1_000);

fn options(path: std::path::PathBuf) -> StoreOptions {
    StoreOptions {
        path: Some(path),
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        guild_defaults: GuildConfig::default(),
        pretty: true,
    }
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("levelup-data.json");

    {
        let store = ProgressStore::open(options(path.clone())).await.unwrap();
        let mut progress = MemberProgress::new(0);
        progress.xp = 420;
        progress.level = 2;
        progress.last_award_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        store.set_member(GUILD, MemberId(7), progress).await;
        store
            .set_guild_config(GUILD, GuildConfig {
                xp_per_event: XpReward::Range(5, 15),
                ..GuildConfig::default()
            })
            .await;
        assert!(!store.is_dirty().await);
    }

    let reopened = ProgressStore::open(options(path)).await.unwrap();
    let progress = reopened.member(GUILD, MemberId(7)).await.unwrap();
    assert_eq!(progress.xp, 420);
    assert_eq!(progress.level, 2);
    assert!(progress.last_award_at.is_some());
    assert_eq!(
        reopened.guild_config(GUILD).await.xp_per_event,
        XpReward::Range(5, 15)
    );
}

#[tokio::test]
async fn missing_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProgressStore::open(options(dir.path().join("absent.json")))
        .await
        .unwrap();
    assert_eq!(store.stats().await.members, 0);
}

#[tokio::test]
async fn flush_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("levelup-data.json");
    let store = ProgressStore::open(options(path)).await.unwrap();

    for member in 0..5_u64 {
        store
            .set_member(GUILD, MemberId(member), MemberProgress::new(0))
            .await;
    }

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["levelup-data.json".to_owned()]);
}

#[tokio::test]
async fn written_file_uses_documented_layout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("levelup-data.json");
    let store = ProgressStore::open(options(path.clone())).await.unwrap();
    store
        .set_member(GUILD, MemberId(42), MemberProgress::new(0))
        .await;

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["version"], 1);
    assert!(raw["config_by_guild"].is_object());
    assert_eq!(raw["progress_by_guild"]["1000"]["42"]["xp"], 0);
}

#[tokio::test]
async fn version_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("levelup-data.json");
    std::fs::write(
        &path,
        r#"{"version": 99, "config_by_guild": {}, "progress_by_guild": {}}"#,
    )
    .unwrap();

    let err = ProgressStore::open(options(path)).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::VersionMismatch {
            expected: 1,
            found: 99
        }
    ));
}

#[tokio::test]
async fn corrupt_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("levelup-data.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = ProgressStore::open(options(path)).await.unwrap_err();
    assert!(matches!(err, StoreError::Serialization(_)));
}

#[tokio::test]
async fn failed_flush_marks_dirty_but_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("occupied");
    let store = ProgressStore::open(options(path.clone())).await.unwrap();

    // A directory in place of the state file makes every rename fail.
    std::fs::create_dir(&path).unwrap();
    store
        .set_member(GUILD, MemberId(3), MemberProgress::new(0))
        .await;

    assert!(store.is_dirty().await);
    assert!(store.member(GUILD, MemberId(3)).await.is_some());
    assert!(store.flush_pending().await.is_err());
    assert!(store.is_dirty().await);

    // Once the obstruction is gone the pending state goes through.
    std::fs::remove_dir(&path).unwrap();
    assert!(store.flush_pending().await.unwrap());
    assert!(!store.is_dirty().await);

    let reopened = ProgressStore::open(options(path)).await.unwrap();
    assert!(reopened.member(GUILD, MemberId(3)).await.is_some());
}
