//! cidcheck integration test harness.
//!
//! Each test starts an in-process fake peer on a loopback port. The peer
//! speaks the JSON-lines frame protocol and answers every query through a
//! `Responder` chosen by the test, so runs are driven end to end through the
//! real TCP session, correlator, dispatcher and output files.
//!
//!   cargo test --test integration

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use cidcheck_core::config::CheckConfig;
use cidcheck_core::{ContentId, Frame, PeerIdentity, Query, Reply};
use cidcheck_services::{PeerAddr, RunRequest};

mod faults;
mod probing;
mod resume;

// ── Harness ───────────────────────────────────────────────────────────────────

/// What the fake peer does after reading one query.
pub enum Action {
    /// Write these raw lines back, in order.
    Send(Vec<String>),
    /// Write these lines, then stop writing but keep reading queries.
    SendThenHalfClose(Vec<String>),
    /// Close the connection.
    HangUp,
}

/// Called with the query and its 0-based arrival index.
pub type Responder = Arc<dyn Fn(&Query, usize) -> Action + Send + Sync>;

pub struct FakePeer {
    pub addr: PeerAddr,
    pub queries: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Listen on a loopback port and serve one connection with `responder`.
pub async fn spawn_peer(id: &str, responder: Responder) -> FakePeer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = PeerAddr {
        id: PeerIdentity::new(id).unwrap(),
        addr: listener.local_addr().unwrap().to_string(),
    };
    let queries = Arc::new(AtomicUsize::new(0));
    let counter = queries.clone();

    let task = tokio::spawn(async move {
        let Ok((sock, _)) = listener.accept().await else {
            return;
        };
        let (r, mut w) = sock.into_split();
        let mut lines = BufReader::new(r).lines();
        let mut half_closed = false;
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(Frame::Query(query)) = Frame::decode(&line) else {
                continue;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if half_closed {
                continue;
            }
            let (out, then_shutdown) = match responder(&query, n) {
                Action::Send(out) => (out, false),
                Action::SendThenHalfClose(out) => (out, true),
                Action::HangUp => return,
            };
            for l in out {
                if w.write_all(l.as_bytes()).await.is_err() {
                    return;
                }
                if !l.ends_with('\n') && w.write_all(b"\n").await.is_err() {
                    return;
                }
            }
            if then_shutdown {
                let _ = w.shutdown().await;
                half_closed = true;
            }
        }
    });

    FakePeer {
        addr,
        queries,
        task,
    }
}

/// An encoded reply line.
pub fn reply_line(from: &str, haves: &[ContentId], dont_haves: &[ContentId], blocks: &[ContentId]) -> String {
    let frame = Frame::Reply {
        from: PeerIdentity::new(from).unwrap(),
        reply: Reply {
            haves: haves.to_vec(),
            dont_haves: dont_haves.to_vec(),
            blocks: blocks.to_vec(),
        },
    };
    String::from_utf8(frame.encode().unwrap()).unwrap()
}

/// A peer that holds exactly `held` and answers every query in one reply.
pub fn holding(id: &'static str, held: HashSet<ContentId>) -> Responder {
    Arc::new(move |query: &Query, _| {
        let (haves, dont_haves): (Vec<_>, Vec<_>) = query
            .entries()
            .iter()
            .map(|e| e.cid.clone())
            .partition(|c| held.contains(c));
        Action::Send(vec![reply_line(id, &haves, &dont_haves, &[])])
    })
}

pub fn cid(n: u32) -> ContentId {
    let mut digest = [0u8; 32];
    digest[..4].copy_from_slice(&n.to_be_bytes());
    ContentId::from_raw_digest(&digest).unwrap()
}

pub fn cids(range: std::ops::Range<u32>) -> Vec<ContentId> {
    range.map(cid).collect()
}

/// Scratch directory removed on drop.
pub struct TestDir(pub PathBuf);

impl TestDir {
    pub fn new(tag: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("cidcheck-it-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn write_cids(&self, cids: &[ContentId]) -> PathBuf {
        let path = self.0.join("cids.txt");
        let mut text: String = cids.iter().map(|c| format!("{c}\n")).collect();
        text.push('\n');
        std::fs::write(&path, text).unwrap();
        path
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Config with small timeouts, writing into `dir`.
pub fn test_config(dir: &Path, batch_size: usize, concurrency: usize) -> CheckConfig {
    let mut config = CheckConfig::default();
    config.probe.batch_size = batch_size;
    config.probe.concurrency = concurrency;
    config.probe.batch_timeout_secs = 1;
    config.probe.send_timeout_secs = 1;
    config.probe.dial_timeout_secs = 1;
    config.output.dir = dir.join("out");
    config.export.out_dir = dir.join("car");
    config
}

pub fn request(peer: &FakePeer, cid_file: PathBuf, offset: usize, config: CheckConfig) -> RunRequest {
    RunRequest {
        peer: peer.addr.clone(),
        cid_file,
        offset,
        config,
    }
}

/// Lines of a CID list file, parsed.
pub fn read_cid_lines(path: &Path) -> Vec<ContentId> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.parse().unwrap())
        .collect()
}
