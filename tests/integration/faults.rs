use crate::*;

use cidcheck_core::ProbeResult;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn reply_from_wrong_peer_fails_the_batch() {
    let dir = TestDir::new("impostor");
    let all = cids(0..4);
    let peer = spawn_peer("peer-a", holding("impostor", all.iter().cloned().collect())).await;

    let mut config = test_config(dir.path(), 4, 1);
    config.output.debug_log = true;
    let report = cidcheck_services::run(
        request(&peer, dir.write_cids(&all), 1, config),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.found, 0);
    assert_eq!(report.summary.errored, 4);

    let debug = std::fs::read_to_string(report.debug_path.unwrap()).unwrap();
    for line in debug.lines() {
        let r: ProbeResult = serde_json::from_str(line).unwrap();
        assert!(!r.responded);
        assert!(r.error.unwrap().contains("impostor"));
    }
}

#[tokio::test]
async fn peer_hang_up_still_resolves_every_cid() {
    let dir = TestDir::new("hangup");
    let all = cids(0..9);
    let held: HashSet<_> = all.iter().cloned().collect();
    let answer = holding("peer-a", held);
    let peer = spawn_peer(
        "peer-a",
        Arc::new(move |query: &Query, n| {
            if n == 0 {
                answer(query, n)
            } else {
                Action::HangUp
            }
        }),
    )
    .await;

    let report = cidcheck_services::run(
        request(&peer, dir.write_cids(&all), 1, test_config(dir.path(), 3, 1)),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.summary.total, 9);
    assert_eq!(report.summary.found, 3);
    assert_eq!(
        report.summary.unresponded + report.summary.errored,
        6,
        "{}",
        report.summary
    );
    assert_eq!(read_cid_lines(&report.not_found_path).len(), 6);
}

#[tokio::test]
async fn batches_after_peer_stops_writing_fail_without_waiting() {
    let dir = TestDir::new("halfclose");
    let all = cids(0..6);
    let answer = holding("peer-a", all.iter().cloned().collect());
    let peer = spawn_peer(
        "peer-a",
        Arc::new(move |query: &Query, n| match answer(query, n) {
            Action::Send(lines) => Action::SendThenHalfClose(lines),
            other => other,
        }),
    )
    .await;

    let mut config = test_config(dir.path(), 2, 1);
    config.probe.batch_timeout_secs = 5;
    config.output.debug_log = true;
    let started = std::time::Instant::now();
    let report = cidcheck_services::run(
        request(&peer, dir.write_cids(&all), 1, config),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // No batch sat out its timeout.
    assert!(started.elapsed() < std::time::Duration::from_secs(4), "{:?}", started.elapsed());
    assert_eq!(report.summary.found, 2);
    assert_eq!(report.summary.unresponded, 0);
    assert_eq!(report.summary.errored, 4, "{}", report.summary);

    let debug = std::fs::read_to_string(report.debug_path.unwrap()).unwrap();
    for line in debug.lines() {
        let r: ProbeResult = serde_json::from_str(line).unwrap();
        if !r.found {
            assert!(!r.responded);
            assert!(r.error.unwrap().contains("closed"));
        }
    }
}

#[tokio::test]
async fn unreachable_peer_is_a_setup_error() {
    let dir = TestDir::new("unreachable");
    let addr = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let config = test_config(dir.path(), 2, 1);
    let result = cidcheck_services::run(
        RunRequest {
            peer: format!("nobody@{addr}").parse().unwrap(),
            cid_file: dir.write_cids(&cids(0..2)),
            offset: 1,
            config,
        },
        CancellationToken::new(),
    )
    .await;

    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("nobody"), "{err:#}");
    // Nothing was written for a run that never started.
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn malformed_cid_file_is_a_setup_error() {
    let dir = TestDir::new("badinput");
    let path = dir.path().join("cids.txt");
    std::fs::write(&path, format!("{}\nnot-a-cid\n", cid(1))).unwrap();
    let peer = spawn_peer("peer-a", holding("peer-a", HashSet::new())).await;

    let err = cidcheck_services::run(
        request(&peer, path, 1, test_config(dir.path(), 2, 1)),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("line 2"), "{err:#}");
}
