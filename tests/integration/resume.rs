use crate::*;

use cidcheck_services::resume_offset_from_file;
use tokio_util::sync::CancellationToken;

/// A run interrupted during its third batch resumes at that batch, and the
/// second run covers exactly the lines the first never completed.
#[tokio::test]
async fn interrupted_run_resumes_at_first_incomplete_batch() {
    let dir = TestDir::new("resume");
    let all = cids(0..12);
    let cid_file = dir.write_cids(&all);

    let cancel = CancellationToken::new();
    let answer = holding("peer-a", HashSet::new());
    let trigger = cancel.clone();
    let peer = spawn_peer(
        "peer-a",
        Arc::new(move |query: &Query, n| {
            if n < 2 {
                answer(query, n)
            } else {
                trigger.cancel();
                Action::Send(vec![])
            }
        }),
    )
    .await;

    let mut config = test_config(dir.path(), 3, 1);
    config.probe.batch_timeout_secs = 30;
    let first = cidcheck_services::run(request(&peer, cid_file.clone(), 1, config), cancel)
        .await
        .unwrap();

    assert!(first.cancelled);
    assert_eq!(first.summary.total, 12);
    assert_eq!(first.summary.not_found, 6);
    // Cancelled CIDs are recorded with an error.
    assert_eq!(first.summary.errored, 6);

    let offset = resume_offset_from_file(&first.progress_path).unwrap();
    assert_eq!(offset, Some(7));

    let peer = spawn_peer("peer-a", holding("peer-a", HashSet::new())).await;
    let second = cidcheck_services::run(
        request(&peer, cid_file, 7, test_config(dir.path(), 3, 1)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(!second.cancelled);
    assert_eq!(second.summary.total, 6);
    assert_eq!(read_cid_lines(&second.not_found_path), all[6..].to_vec());
    assert_eq!(resume_offset_from_file(&second.progress_path).unwrap(), Some(13));
}
