//! End-to-end tests of the connection actor against a scripted peer.

use std::time::Duration;

use bytes::Bytes;

use tokio::task::JoinHandle;

use bepsync_bep::messages::{
    Close, ClusterConfig, Device, DownloadProgress, ErrorCode, Folder, Index, IndexUpdate,
    Message, Request, Response,
};
use bepsync_bep::{BepError, ConnectionHandle, ConnectionState, IndexEvent};
use bepsync_testkit::{wire_dir, wire_file, ScriptedPeer, TestFixture};

const FOLDER: &str = "default";
const WAIT: Duration = Duration::from_secs(5);

fn pair() -> (TestFixture, TestFixture) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let peer = TestFixture::new("peer");
    let local = TestFixture::new("local").share_folder(FOLDER, &[peer.device_id]);
    (local, peer)
}

fn request(name: &str) -> Request {
    Request {
        id: -1,
        folder: FOLDER.into(),
        name: name.into(),
        offset: 0,
        size: 16,
        hash: vec![1; 32],
        from_temporary: false,
    }
}

#[tokio::test]
async fn test_handshake_announces_shared_folders() {
    let (local, peer) = pair();
    let (handle, _task, remote) = local.connect(&peer, "peer:22000");

    let received = remote.handshake(local.device_id, &[(FOLDER, 7, 3)]).await.unwrap();
    assert_eq!(received.folders.len(), 1);
    assert_eq!(received.folders[0].id, FOLDER);

    match remote.recv().await.unwrap() {
        Message::Index(Index { folder, files }) => {
            assert_eq!(folder, FOLDER);
            assert!(files.is_empty());
        }
        other => panic!("expected empty index, got {other:?}"),
    }

    let info = handle.confirm_connected().await.unwrap();
    assert!(info.has_folder(FOLDER));
    assert_eq!(info.peer_hello.device_name, "peer");
    assert_eq!(handle.state(), ConnectionState::Active);

    let stored = local
        .index
        .index_info(FOLDER, peer.device_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((stored.index_id, stored.local_sequence, stored.max_sequence), (7, 0, 3));
}

async fn expect_request(remote: &ScriptedPeer) -> Request {
    match remote.recv().await.unwrap() {
        Message::Request(r) => r,
        other => panic!("expected request, got {other:?}"),
    }
}

fn spawn_request(handle: &ConnectionHandle, name: &str) -> JoinHandle<Result<Response, BepError>> {
    let handle = handle.clone();
    let request = request(name);
    tokio::spawn(async move { handle.send_request(request).await })
}

#[tokio::test]
async fn test_request_ids_correlate_responses() {
    let (local, peer) = pair();
    let (handle, _task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    let first = spawn_request(&handle, "one");
    let sent = expect_request(&remote).await;
    assert_eq!((sent.id, sent.name.as_str()), (0, "one"));

    let second = spawn_request(&handle, "two");
    let sent = expect_request(&remote).await;
    assert_eq!((sent.id, sent.name.as_str()), (1, "two"));

    remote
        .send(Message::Response(Response {
            id: 1,
            data: Bytes::from_static(b"two"),
            code: ErrorCode::NoError,
        }))
        .await
        .unwrap();

    let second = tokio::time::timeout(WAIT, second).await.unwrap().unwrap().unwrap();
    assert_eq!(second.data, Bytes::from_static(b"two"));
    assert!(!first.is_finished());

    handle.close("done").await;
    let err = tokio::time::timeout(WAIT, first).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, BepError::Cancelled));
}

#[tokio::test]
async fn test_close_cancels_pending_requests() {
    let (local, peer) = pair();
    let (handle, task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    let a = spawn_request(&handle, "a");
    expect_request(&remote).await;
    let b = spawn_request(&handle, "b");
    expect_request(&remote).await;

    handle.close("shutting down").await;
    assert_eq!(handle.state(), ConnectionState::Closed);

    for pending in [a, b] {
        let err = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(err, BepError::Cancelled));
    }

    match remote.recv().await.unwrap() {
        Message::Close(Close { reason }) => assert_eq!(reason, "shutting down"),
        other => panic!("expected close, got {other:?}"),
    }
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_close_waits_for_frame_in_flight() {
    let (local, peer) = pair();
    let (handle, task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    // Far larger than the in-memory pipe, so the write blocks until the peer reads.
    let files: Vec<_> = (0..4000i64)
        .map(|i| wire_file(&format!("bulk/{i:05}"), 1024, 1, i + 1))
        .collect();
    let update = tokio::spawn({
        let handle = handle.clone();
        async move {
            handle
                .send_index_update(IndexUpdate {
                    folder: FOLDER.into(),
                    files,
                })
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!update.is_finished());

    let closing = tokio::spawn({
        let handle = handle.clone();
        async move { handle.close("bye").await }
    });

    match remote.recv().await.unwrap() {
        Message::IndexUpdate(u) => assert_eq!(u.files.len(), 4000),
        other => panic!("expected index update, got {other:?}"),
    }
    match remote.recv().await.unwrap() {
        Message::Close(Close { reason }) => assert_eq!(reason, "bye"),
        other => panic!("expected close, got {other:?}"),
    }

    tokio::time::timeout(WAIT, update).await.unwrap().unwrap().unwrap();
    tokio::time::timeout(WAIT, closing).await.unwrap().unwrap();
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_first_message_must_be_cluster_config() {
    let (local, peer) = pair();
    let (handle, task, remote) = local.connect(&peer, "peer:22000");

    remote.wire.recv_hello().await.unwrap();
    remote.wire.send_hello(&remote.hello()).await.unwrap();
    assert!(matches!(remote.wire.recv().await.unwrap(), Message::ClusterConfig(_)));
    remote.send(Message::Ping).await.unwrap();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, BepError::ProtocolViolation(_)));
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_certificate_must_match_expected_device() {
    let (local, peer) = pair();
    let impostor = TestFixture::new("impostor");
    let (handle, task, remote) =
        local.connect_with(local.context(), &peer, impostor.certificate.clone(), "peer:22000");

    remote.wire.recv_hello().await.unwrap();
    remote.wire.send_hello(&remote.hello()).await.unwrap();

    match task.await.unwrap().unwrap_err() {
        BepError::Authentication { expected, actual } => {
            assert_eq!(expected, peer.device_id);
            assert_eq!(actual, impostor.device_id);
        }
        other => panic!("expected authentication error, got {other}"),
    }
    assert!(matches!(
        handle.confirm_connected().await,
        Err(BepError::ConnectionClosed | BepError::Cancelled)
    ));
}

#[tokio::test]
async fn test_index_messages_reach_the_store() {
    let (local, peer) = pair();
    let mut events = local.index.subscribe();
    let (handle, _task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 3)]).await.unwrap();
    remote.recv().await.unwrap();

    // Not shared on this connection: dropped.
    remote
        .send(Message::Index(Index {
            folder: "elsewhere".into(),
            files: vec![wire_dir("x", 1, 1)],
        }))
        .await
        .unwrap();
    remote
        .send(Message::Index(Index {
            folder: FOLDER.into(),
            files: vec![wire_dir("docs", 10, 1), wire_file("docs/a.txt", 100, 10, 2)],
        }))
        .await
        .unwrap();
    remote
        .send(Message::IndexUpdate(IndexUpdate {
            folder: FOLDER.into(),
            files: vec![wire_file("docs/b.txt", 50, 11, 3)],
        }))
        .await
        .unwrap();

    let mut acquired = Vec::new();
    for _ in 0..2 {
        let IndexEvent::RecordsAcquired { folder, files, .. } =
            tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(folder, FOLDER);
        acquired.extend(files);
    }
    assert_eq!(acquired.len(), 3);

    let listing = local.index.list_directory(FOLDER, "docs").await.unwrap();
    let names: Vec<_> = listing.iter().map(|f| f.file_name().to_string()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);

    let stats = local.index.folder_stats(FOLDER).await.unwrap();
    assert_eq!((stats.file_count, stats.dir_count, stats.size), (2, 1, 150));

    let progress = local
        .index
        .index_info(FOLDER, peer.device_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.local_sequence, 3);
    assert!(progress.is_up_to_date());
    assert!(local.index.get_file_info("elsewhere", "x").await.unwrap().is_none());

    handle.close("done").await;
}

#[tokio::test]
async fn test_peer_requests_are_answered() {
    let (local, peer) = pair();
    let (_handle, _task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    remote
        .send(Message::Request(Request { id: 41, ..request("a") }))
        .await
        .unwrap();
    match remote.recv().await.unwrap() {
        Message::Response(r) => {
            assert_eq!(r.id, 41);
            assert_eq!(r.code, ErrorCode::InvalidFile);
        }
        other => panic!("expected response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_response_id_is_fatal() {
    let (local, peer) = pair();
    let (_handle, task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    remote.send(Message::Response(Response::error(99, ErrorCode::Generic))).await.unwrap();

    let err = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, BepError::ProtocolViolation(_)));
    assert!(matches!(remote.recv().await.unwrap(), Message::Close(_)));
}

#[tokio::test]
async fn test_index_without_peer_progress_is_dropped() {
    let (local, peer) = pair();
    let (handle, _task, remote) = local.connect(&peer, "peer:22000");

    // The peer lists us for the folder but leaves out its own entry.
    remote.wire.recv_hello().await.unwrap();
    remote.wire.send_hello(&remote.hello()).await.unwrap();
    assert!(matches!(remote.wire.recv().await.unwrap(), Message::ClusterConfig(_)));
    remote
        .send(Message::ClusterConfig(ClusterConfig {
            folders: vec![Folder {
                id: FOLDER.into(),
                label: FOLDER.into(),
                devices: vec![Device::new(local.device_id, "local", 0, 0)],
                ..Default::default()
            }],
        }))
        .await
        .unwrap();
    assert!(matches!(remote.recv().await.unwrap(), Message::Index(_)));

    remote
        .send(Message::Index(Index {
            folder: FOLDER.into(),
            files: vec![wire_file("a.txt", 10, 1, 1)],
        }))
        .await
        .unwrap();
    // Messages are handled in order: once this is answered the Index is done.
    remote
        .send(Message::Request(Request { id: 5, ..request("a.txt") }))
        .await
        .unwrap();
    assert!(matches!(remote.recv().await.unwrap(), Message::Response(r) if r.id == 5));

    assert!(handle.confirm_connected().await.unwrap().has_folder(FOLDER));
    assert_eq!(handle.state(), ConnectionState::Active);
    assert!(local.index.get_file_info(FOLDER, "a.txt").await.unwrap().is_none());
    assert!(local
        .index
        .index_info(FOLDER, peer.device_id)
        .await
        .unwrap()
        .is_none());
}

async fn assert_fatal_after_handshake(message: Message) {
    let (local, peer) = pair();
    let (handle, task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    remote.send(message).await.unwrap();

    let err = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, BepError::ProtocolViolation(_)));
    assert!(matches!(remote.recv().await.unwrap(), Message::Close(_)));
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_second_cluster_config_is_fatal() {
    assert_fatal_after_handshake(Message::ClusterConfig(ClusterConfig::default())).await;
}

#[tokio::test]
async fn test_download_progress_is_fatal() {
    assert_fatal_after_handshake(Message::DownloadProgress(DownloadProgress {
        folder: FOLDER.into(),
        updates: Vec::new(),
    }))
    .await;
}

#[tokio::test]
async fn test_peer_close_ends_connection() {
    let (local, peer) = pair();
    let (handle, task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    remote
        .send(Message::Close(Close { reason: "bye".into() }))
        .await
        .unwrap();

    assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
    assert_eq!(handle.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_dropping_every_handle_closes() {
    let (local, peer) = pair();
    let (handle, task, remote) = local.connect(&peer, "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();
    handle.confirm_connected().await.unwrap();

    drop(handle);

    assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
    assert!(matches!(remote.recv().await.unwrap(), Message::Close(_)));
}

#[tokio::test]
async fn test_keepalive_pings_at_fixed_period() {
    let (local, peer) = pair();
    let mut context = local.context();
    context.connection.keepalive_interval = Duration::from_millis(20);
    let (_handle, _task, remote) =
        local.connect_with(context, &peer, peer.certificate.clone(), "peer:22000");
    remote.handshake(local.device_id, &[(FOLDER, 1, 0)]).await.unwrap();
    remote.recv().await.unwrap();

    // ScriptedPeer::recv skips pings; read the wire directly.
    let message = tokio::time::timeout(WAIT, remote.wire.recv()).await.unwrap().unwrap();
    assert_eq!(message, Message::Ping);
}
