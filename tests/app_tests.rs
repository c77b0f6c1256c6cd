//! Application state and command wiring with in-memory config and storage.

use bucket_mirror_lib::commands::sync::{self, SyncOverrides};
use bucket_mirror_lib::commands::{credentials, file, test};
use bucket_mirror_lib::core::{RunState, Tick};
use bucket_mirror_lib::error::ValidationError;
use bucket_mirror_lib::storage::{NoProgress, ObjectStore, OperatorStore};
use bucket_mirror_lib::{AppState, Config, Credentials, Error, MemoryConfigStore, ProviderKind};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Fixture {
    state: AppState,
    builds: Arc<AtomicUsize>,
    store: Arc<OperatorStore>,
}

fn fixture(config: Config, env: &[(&str, &str)]) -> Fixture {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let builds = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(OperatorStore::memory("memory"));

    let counter = builds.clone();
    let shared = store.clone();
    let state = AppState::with_parts(
        Path::new("."),
        Arc::new(MemoryConfigStore::new(config)),
        Arc::new(env),
        Arc::new(move |_credentials: &Credentials| {
            counter.fetch_add(1, Ordering::SeqCst);
            shared.clone() as Arc<dyn ObjectStore>
        }),
    );

    Fixture {
        state,
        builds,
        store,
    }
}

fn configured(folder: &Path) -> Config {
    Config {
        access_key: Some("AKIAEXAMPLE".to_string()),
        secret_key: Some("secret".to_string()),
        prefer_env_vars: false,
        bucket_name: Some("media".to_string()),
        sync_folder: Some(folder.to_path_buf()),
        ..Default::default()
    }
}

#[test]
fn secondary_credentials_switch_provider_and_persist() {
    let fx = fixture(
        Config::default(),
        &[("STORJ_ACCESS_KEY", "jx"), ("STORJ_SECRET_KEY", "js")],
    );

    let config = fx.state.load_config().unwrap();
    assert_eq!(config.provider(), ProviderKind::Secondary);

    let persisted = fx.state.config_store.load().unwrap();
    assert_eq!(persisted.storage_provider, Some(ProviderKind::Secondary));

    let source = credentials::credential_source(&fx.state).unwrap();
    assert_eq!(source.active_provider, Some(ProviderKind::Secondary));
    assert!(source.endpoint.is_some());
}

#[test]
fn missing_credentials_disable_sync() {
    let dir = tempfile::tempdir().unwrap();
    let fx = fixture(
        Config {
            bucket_name: Some("media".to_string()),
            sync_folder: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
        &[],
    );

    let Err(err) = sync::start_sync(&fx.state, &SyncOverrides::default()) else {
        panic!("sync started without credentials");
    };
    assert!(matches!(
        err,
        Error::Validation(ValidationError::SyncDisabled(_))
    ));
    assert_eq!(fx.builds.load(Ordering::SeqCst), 0);

    let source = credentials::credential_source(&fx.state).unwrap();
    assert_eq!(source.active_provider, None);
    assert!(source.disabled_reason.is_some());
}

#[test]
fn store_rebuilt_only_when_credentials_change() {
    let dir = tempfile::tempdir().unwrap();
    let fx = fixture(configured(dir.path()), &[]);

    let config = fx.state.load_config().unwrap();
    fx.state.store_for(&config).unwrap();
    fx.state.store_for(&config).unwrap();
    assert_eq!(fx.builds.load(Ordering::SeqCst), 1);

    let rotated = Config {
        secret_key: Some("rotated".to_string()),
        ..config
    };
    fx.state.store_for(&rotated).unwrap();
    assert_eq!(fx.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sync_command_uploads_and_object_is_visible() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("movie.mp4"), vec![9u8; 4096]).unwrap();
    let fx = fixture(configured(dir.path()), &[]);

    let analysis = sync::analyze(&fx.state, &SyncOverrides::default())
        .await
        .unwrap();
    assert_eq!(analysis.to_upload, vec!["movie.mp4"]);

    let handle = sync::start_sync(&fx.state, &SyncOverrides::default()).unwrap();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.state, RunState::Completed);

    let info = file::object_info(&fx.state, None, "movie.mp4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.meta.size, 4096);
    assert!(info.exists_locally);

    let stats = file::folder_stats(&fx.state, None, "").await.unwrap();
    assert_eq!(stats.file_count, 1);
    assert_eq!(stats.total_size, 4096);

    // Nothing changed locally, the next round uploads nothing.
    assert_eq!(
        sync::refresh_once(&fx.state, &SyncOverrides::default())
            .await
            .unwrap(),
        Tick::Ran
    );
    assert!(fx.store.head_object("media", "movie.mp4").await.unwrap().is_some());
}

#[tokio::test]
async fn overrides_target_another_bucket() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("clip.mkv"), vec![1u8; 10]).unwrap();
    let fx = fixture(configured(dir.path()), &[]);

    let overrides = SyncOverrides {
        bucket: Some("archive".to_string()),
        ..Default::default()
    };
    let report = sync::start_sync(&fx.state, &overrides)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.files_uploaded, 1);

    assert!(fx.store.head_object("archive", "clip.mkv").await.unwrap().is_some());
    assert!(fx.store.head_object("media", "clip.mkv").await.unwrap().is_none());
}

#[tokio::test]
async fn connection_test_reports_missing_credentials() {
    let fx = fixture(
        Config {
            bucket_name: Some("media".to_string()),
            ..Default::default()
        },
        &[],
    );

    let result = test::test_connection(&fx.state, None).await.unwrap();
    assert!(!result.success);
    assert!(result.details.is_some());
}

#[test]
fn explicit_provider_choice_is_saved() {
    let dir = tempfile::tempdir().unwrap();
    let fx = fixture(configured(dir.path()), &[]);

    let config = credentials::set_provider(&fx.state, ProviderKind::Secondary).unwrap();
    assert_eq!(config.storage_provider, Some(ProviderKind::Secondary));

    let config = credentials::set_prefer_env_vars(&fx.state, true).unwrap();
    assert!(config.prefer_env_vars);
    assert_eq!(
        fx.state.config_store.load().unwrap().storage_provider,
        Some(ProviderKind::Secondary)
    );
}

#[tokio::test]
async fn browse_lists_one_level_of_the_bucket() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("shows/s01")).unwrap();
    std::fs::write(dir.path().join("shows/s01/e01.mkv"), vec![1u8; 30]).unwrap();
    std::fs::write(dir.path().join("shows/pilot.mp4"), vec![2u8; 20]).unwrap();
    std::fs::write(dir.path().join("intro.mp4"), vec![3u8; 10]).unwrap();
    let fx = fixture(configured(dir.path()), &[]);

    sync::start_sync(&fx.state, &SyncOverrides::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    let root = file::list_files(&fx.state, None, "").await.unwrap();
    assert_eq!(root.prefix, "");
    assert_eq!(root.folders, vec!["shows/"]);
    let names: Vec<_> = root.files.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(names, vec!["intro.mp4"]);

    let shows = file::list_files(&fx.state, None, "/shows").await.unwrap();
    assert_eq!(shows.prefix, "shows/");
    assert_eq!(shows.folders, vec!["shows/s01/"]);
    let names: Vec<_> = shows.files.iter().map(|f| f.key.as_str()).collect();
    assert_eq!(names, vec!["shows/pilot.mp4"]);
}

#[tokio::test]
async fn object_info_flags_remote_only_objects() {
    let dir = tempfile::tempdir().unwrap();
    let source = tempfile::tempdir().unwrap();
    let remote_only = source.path().join("elsewhere.mp4");
    std::fs::write(&remote_only, vec![5u8; 64]).unwrap();
    let fx = fixture(configured(dir.path()), &[]);

    fx.store
        .upload_object("media", "elsewhere.mp4", &remote_only, &NoProgress)
        .await
        .unwrap();

    let info = file::object_info(&fx.state, None, "elsewhere.mp4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.meta.size, 64);
    assert!(!info.exists_locally);

    assert!(file::object_info(&fx.state, None, "missing.mp4")
        .await
        .unwrap()
        .is_none());
}

#[test]
fn local_file_checked_inside_sync_folder() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("season")).unwrap();
    std::fs::write(dir.path().join("season/e01.mkv"), b"x").unwrap();
    let fx = fixture(configured(dir.path()), &[]);

    assert!(file::check_local_file(&fx.state, "season/e01.mkv").unwrap());
    assert!(!file::check_local_file(&fx.state, "season/e02.mkv").unwrap());
    assert!(!file::check_local_file(&fx.state, "season").unwrap());
    assert!(!file::check_local_file(&fx.state, "../season/e01.mkv").unwrap());

    let unconfigured = fixture(Config::default(), &[]);
    assert!(!file::check_local_file(&unconfigured.state, "season/e01.mkv").unwrap());
}

#[test]
fn local_delete_removes_only_contained_files() {
    let parent = tempfile::tempdir().unwrap();
    let folder = parent.path().join("library");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("clip.mp4"), b"clip").unwrap();
    std::fs::write(parent.path().join("outside.mp4"), b"keep").unwrap();
    let fx = fixture(configured(&folder), &[]);

    let Err(err) = file::delete_local_file(&fx.state, "../outside.mp4") else {
        panic!("deleted a file outside the sync folder");
    };
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidPath(_))
    ));
    assert!(parent.path().join("outside.mp4").exists());

    file::delete_local_file(&fx.state, "clip.mp4").unwrap();
    assert!(!folder.join("clip.mp4").exists());

    let Err(err) = file::delete_local_file(&fx.state, "clip.mp4") else {
        panic!("deleting a missing file succeeded");
    };
    assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
}

#[test]
fn local_delete_requires_sync_folder() {
    let fx = fixture(Config::default(), &[]);
    let Err(err) = file::delete_local_file(&fx.state, "clip.mp4") else {
        panic!("deleted without a sync folder");
    };
    assert!(matches!(
        err,
        Error::Validation(ValidationError::MissingFolder)
    ));
}
