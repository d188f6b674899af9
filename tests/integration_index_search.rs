mod support;

use codebase_context_engine::indexer::pipeline::{stats::IndexRunOutcome, watch::FsEvent};
use rstest::rstest;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use support::fixtures::*;
use support::helpers::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[rstest]
#[tokio::test]
async fn indexes_only_eligible_files(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;

    let outcome = engine
        .index_all(|_| {}, &CancellationToken::new())
        .await
        .unwrap();
    let IndexRunOutcome::Completed(stats) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(stats.files_scanned, 3);
    assert_eq!(stats.files_indexed, 3);
    assert_eq!(stats.files_skipped, 0);
    assert!(stats.entities_indexed >= 6);

    let paths = indexed_paths(&engine).await;
    assert_eq!(
        paths.into_iter().collect::<Vec<_>>(),
        vec!["bin/app.pl", "lib/App/Cart.pm", "lib/App/Util.pm"]
    );
}

#[rstest]
#[tokio::test]
async fn reindexing_is_idempotent(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    index_everything(&engine).await;
    let rows = row_count(&engine).await;

    index_everything(&engine).await;
    assert_eq!(row_count(&engine).await, rows);

    engine.index_one(Path::new("lib/App/Cart.pm")).await.unwrap();
    assert_eq!(row_count(&engine).await, rows);
}

#[rstest]
#[tokio::test]
async fn delete_notification_removes_one_file(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    index_everything(&engine).await;

    let util = perl_workspace.path().join("lib/App/Util.pm");
    std::fs::remove_file(&util).unwrap();
    engine.handle_event(FsEvent::Deleted(util)).await;

    let paths = indexed_paths(&engine).await;
    assert!(!paths.contains("lib/App/Util.pm"));
    assert!(paths.contains("lib/App/Cart.pm"));
    assert!(paths.contains("bin/app.pl"));
}

#[rstest]
#[tokio::test]
async fn changed_file_leaves_no_stale_vectors(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    index_everything(&engine).await;

    write_file(
        perl_workspace.path(),
        "lib/App/Util.pm",
        "package App::Util;\nsub squish { my ($s) = @_; $s =~ s/\\s+/ /g; $s }\n1;\n",
    );
    let path = perl_workspace.path().join("lib/App/Util.pm");
    engine.handle_event(FsEvent::Changed(path)).await;

    let hits = engine.find_relevant_code("sub trim", 20).await.unwrap();
    assert!(hits
        .iter()
        .filter(|h| h.path == "lib/App/Util.pm")
        .all(|h| !h.content.contains("sub trim")));
    let hits = engine.find_relevant_code("sub squish", 20).await.unwrap();
    assert!(hits.iter().any(|h| h.content.contains("sub squish")));
}

#[rstest]
#[tokio::test]
async fn full_run_prunes_files_removed_while_offline(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    index_everything(&engine).await;

    std::fs::remove_file(perl_workspace.path().join("bin/app.pl")).unwrap();
    let outcome = engine
        .index_all(|_| {}, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.stats().files_deleted, 1);
    assert!(!indexed_paths(&engine).await.contains("bin/app.pl"));
}

#[rstest]
#[tokio::test]
async fn cancelled_run_stops_before_indexing(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine.index_all(|_| {}, &cancel).await.unwrap();
    assert!(outcome.is_cancelled());
    assert_eq!(outcome.stats().files_indexed, 0);
    assert_eq!(row_count(&engine).await, 0);
}

#[rstest]
#[tokio::test]
async fn cancelling_mid_run_stops_after_the_current_file(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    let cancel = CancellationToken::new();

    let outcome = engine
        .index_all(
            |p| {
                if p.processed == 1 {
                    cancel.cancel();
                }
            },
            &cancel,
        )
        .await
        .unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(outcome.stats().files_indexed, 1);
    assert_eq!(
        indexed_paths(&engine).await.into_iter().collect::<Vec<_>>(),
        vec!["bin/app.pl"]
    );
}

#[rstest]
#[tokio::test]
async fn one_failing_file_does_not_stop_the_run(perl_workspace: TempDir) {
    write_file(
        perl_workspace.path(),
        "lib/App/Broken.pm",
        "package App::Broken;\nsub boom { 'EXPLODE' }\n1;\n",
    );
    let engine = open_engine_refusing(perl_workspace.path(), "EXPLODE").await;

    let outcome = engine
        .index_all(|_| {}, &CancellationToken::new())
        .await
        .unwrap();
    let IndexRunOutcome::Completed(stats) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(stats.files_scanned, 4);
    assert_eq!(stats.files_indexed, 3);
    assert_eq!(stats.files_skipped, 1);

    let paths = indexed_paths(&engine).await;
    assert!(!paths.contains("lib/App/Broken.pm"));
    assert_eq!(paths.len(), 3);
}

#[rstest]
#[tokio::test]
async fn progress_is_reported_per_file(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    let seen = Mutex::new(Vec::new());

    engine
        .index_all(
            |p| seen.lock().unwrap().push((p.processed, p.total)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(seen.into_inner().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
}

#[rstest]
#[tokio::test]
async fn search_results_carry_real_paths(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    index_everything(&engine).await;

    let hits = engine.find_relevant_code("sub total", 50).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| !h.path.is_empty()));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(hits.iter().any(|h| h.content.contains("sub total")));
}

#[tokio::test]
async fn empty_workspace_completes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_engine(dir.path()).await;
    let outcome = engine
        .index_all(|_| {}, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.stats().files_scanned, 0);
    assert!(engine.find_relevant_code("anything", 5).await.unwrap().is_empty());
}

#[rstest]
#[tokio::test]
async fn watcher_picks_up_new_files(perl_workspace: TempDir) {
    let engine = open_engine(perl_workspace.path()).await;
    index_everything(&engine).await;
    let watch = engine.spawn_watch().unwrap();

    write_file(
        perl_workspace.path(),
        "lib/App/Late.pm",
        "package App::Late;\nsub arrive { 1 }\n1;\n",
    );

    let mut found = false;
    for _ in 0..100 {
        if indexed_paths(&engine).await.contains("lib/App/Late.pm") {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    watch.stop();
    assert!(found, "watcher never indexed the new file");
}
