//! Unit tests for path normalisation and workspace materialisation.

use super::*;
use crate::test_support::InMemoryObjectStore;
use color_eyre::eyre::{Result, ensure};
use rstest::rstest;

fn entry(key: &str, path: &str) -> ManifestEntry {
    ManifestEntry {
        r2_object_key: key.to_owned(),
        file_path: path.to_owned(),
    }
}

#[rstest]
#[case("a.py", "a.py")]
#[case("/a.py", "a.py")]
#[case("//pkg/lib.py", "pkg/lib.py")]
#[case("./pkg/./lib.py", "pkg/lib.py")]
fn safe_paths_normalise_inside_the_root(#[case] raw: &str, #[case] expected: &str) -> Result<()> {
    let normalized = sanitize_relative_path(raw).map_err(|err| color_eyre::eyre::eyre!(err))?;
    ensure!(normalized.as_str() == expected, "got {normalized}");
    Ok(())
}

#[rstest]
#[case("../escape.py")]
#[case("pkg/../../escape.py")]
#[case("..")]
#[case("")]
#[case("/")]
fn escaping_paths_are_rejected(#[case] raw: &str) {
    assert!(matches!(
        sanitize_relative_path(raw),
        Err(MaterializeError::UnsafePath { .. })
    ));
}

#[tokio::test]
async fn manifest_files_land_under_the_root() -> Result<()> {
    let store = InMemoryObjectStore::new();
    store.put("bucket", "w/a.py", b"import pkg.lib\n");
    store.put("bucket", "w/lib.py", b"VALUE = 3\n");

    let manifest = vec![entry("w/a.py", "a.py"), entry("w/lib.py", "pkg/lib.py")];
    let materializer = Materializer::new(&store);
    let workspace = materializer.materialize("j1", "bucket", &manifest).await?;

    let root = workspace.root_path()?;
    ensure!(root.join("a.py").is_file(), "a.py missing");
    ensure!(root.join("pkg/lib.py").is_file(), "pkg/lib.py missing");
    ensure!(workspace.entrypoint("a.py").is_some(), "entrypoint must resolve");
    ensure!(
        workspace.entrypoint("missing.py").is_none(),
        "absent entrypoint must not resolve"
    );
    ensure!(
        workspace.entrypoint("pkg").is_none(),
        "a directory is not a valid entrypoint"
    );
    Ok(())
}

#[tokio::test]
async fn workspace_root_is_removed_on_drop() -> Result<()> {
    let store = InMemoryObjectStore::new();
    store.put("bucket", "w/a.py", b"print('hi')\n");
    let materializer = Materializer::new(&store);
    let workspace = materializer
        .materialize("j1", "bucket", &[entry("w/a.py", "a.py")])
        .await?;
    let root = workspace.root_path()?;
    ensure!(root.as_std_path().exists(), "root should exist while scoped");
    drop(workspace);
    ensure!(!root.as_std_path().exists(), "root must be deleted on drop");
    Ok(())
}

#[tokio::test]
async fn blank_manifest_entries_are_skipped() -> Result<()> {
    let store = InMemoryObjectStore::new();
    store.put("bucket", "w/a.py", b"print('hi')\n");
    let manifest = vec![
        entry("", "ghost.py"),
        entry("w/ghost.py", ""),
        entry("w/a.py", "a.py"),
    ];
    let materializer = Materializer::new(&store);
    let workspace = materializer.materialize("j1", "bucket", &manifest).await?;
    let root = workspace.root_path()?;
    ensure!(root.join("a.py").is_file(), "real entry must be written");
    ensure!(!root.join("ghost.py").exists(), "blank entries must be skipped");
    Ok(())
}

#[tokio::test]
async fn empty_manifest_is_reported() {
    let store = InMemoryObjectStore::new();
    let materializer = Materializer::new(&store);
    let result = materializer.materialize("j1", "bucket", &[]).await;
    assert!(matches!(result, Err(MaterializeError::EmptyManifest)));
}

#[tokio::test]
async fn escaping_manifest_entry_aborts_materialisation() {
    let store = InMemoryObjectStore::new();
    store.put("bucket", "w/evil.py", b"print('evil')\n");
    let materializer = Materializer::new(&store);
    let result = materializer
        .materialize("j1", "bucket", &[entry("w/evil.py", "../evil.py")])
        .await;
    assert!(matches!(result, Err(MaterializeError::UnsafePath { .. })));
}

#[tokio::test]
async fn missing_object_surfaces_the_key() {
    let store = InMemoryObjectStore::new();
    let materializer = Materializer::new(&store);
    let result = materializer
        .materialize("j1", "bucket", &[entry("w/absent.py", "a.py")])
        .await;
    let Err(err) = result else {
        panic!("expected download failure");
    };
    match err {
        MaterializeError::Download { key, .. } => assert_eq!(key, "w/absent.py"),
        other => panic!("expected download failure, got {other:?}"),
    }
}
