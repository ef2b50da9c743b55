use crate::*;

use cidcheck_core::ProbeResult;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn every_cid_gets_exactly_one_result() {
    let dir = TestDir::new("complete");
    let all = cids(0..23);
    let held: HashSet<_> = all.iter().step_by(2).cloned().collect();
    let peer = spawn_peer("peer-a", holding("peer-a", held.clone())).await;

    let mut config = test_config(dir.path(), 5, 3);
    config.output.debug_log = true;
    let report = cidcheck_services::run(
        request(&peer, dir.write_cids(&all), 1, config),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.total, 23);
    assert_eq!(report.summary.batches, 5);
    assert_eq!(report.summary.found, held.len());
    assert_eq!(report.summary.not_found, 23 - held.len());
    assert_eq!(report.summary.unresponded, 0);
    assert!(!report.cancelled);
    assert_eq!(peer.queries.load(Ordering::SeqCst), 5);

    // Not-found log holds exactly the CIDs the peer lacks.
    let missing: HashSet<_> = read_cid_lines(&report.not_found_path).into_iter().collect();
    let expected: HashSet<_> = all.iter().filter(|c| !held.contains(c)).cloned().collect();
    assert_eq!(missing, expected);

    // Debug log: one record per input CID.
    let debug = std::fs::read_to_string(report.debug_path.unwrap()).unwrap();
    let records: Vec<ProbeResult> = debug.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(records.len(), 23);
    let unique: HashSet<_> = records.iter().map(|r| r.cid.clone()).collect();
    assert_eq!(unique.len(), 23);
    assert!(records.iter().all(|r| r.responded && r.error.is_none()));
}

#[tokio::test]
async fn replies_split_across_frames_are_merged() {
    let dir = TestDir::new("split");
    let all = cids(0..6);
    let peer = spawn_peer(
        "peer-a",
        Arc::new(|query: &Query, _| {
            let ids: Vec<_> = query.entries().iter().map(|e| e.cid.clone()).collect();
            let (first, rest) = ids.split_at(1);
            let (second, third) = rest.split_at(1);
            Action::Send(vec![
                reply_line("peer-a", first, &[], &[]),
                "{not a frame".to_string(),
                reply_line("peer-a", &[], second, &[]),
                // Block bodies also mean "have".
                reply_line("peer-a", &[], &[], third),
            ])
        }),
    )
    .await;

    let report = cidcheck_services::run(
        request(&peer, dir.write_cids(&all), 1, test_config(dir.path(), 3, 1)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.total, 6);
    assert_eq!(report.summary.found, 4);
    assert_eq!(report.summary.not_found, 2);
    assert_eq!(read_cid_lines(&report.not_found_path).len(), 2);
}

#[tokio::test]
async fn silent_peer_yields_unresponded() {
    let dir = TestDir::new("silent");
    let all = cids(0..4);
    let peer = spawn_peer(
        "peer-a",
        Arc::new(|query: &Query, _| {
            // Only the first CID of each batch is ever mentioned.
            let first = query.entries()[0].cid.clone();
            Action::Send(vec![reply_line("peer-a", &[first], &[], &[])])
        }),
    )
    .await;

    let mut config = test_config(dir.path(), 2, 2);
    config.output.debug_log = true;
    let report = cidcheck_services::run(
        request(&peer, dir.write_cids(&all), 1, config),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.found, 2);
    assert_eq!(report.summary.unresponded, 2);
    assert_eq!(report.summary.errored, 0);

    let debug = std::fs::read_to_string(report.debug_path.unwrap()).unwrap();
    for line in debug.lines() {
        let r: ProbeResult = serde_json::from_str(line).unwrap();
        if !r.found {
            assert!(!r.responded);
            assert!(r.error.is_none());
        }
    }
}

#[tokio::test]
async fn offset_starts_mid_file() {
    let dir = TestDir::new("offset");
    let all = cids(0..10);
    let peer = spawn_peer("peer-a", holding("peer-a", HashSet::new())).await;

    let report = cidcheck_services::run(
        request(&peer, dir.write_cids(&all), 8, test_config(dir.path(), 2, 1)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.total, 3);
    assert_eq!(read_cid_lines(&report.not_found_path), all[7..].to_vec());
}
