//! End-to-end pipeline tests against a mock remote endpoint.

mod common;

use bytes::Bytes;
use common::{SESSION_PATH, TOKEN, can_bind_localhost, config, mock_session, pipeline, seeded_bytes};
use httpmock::Method::{GET, POST, PUT};
use httpmock::MockServer;
use piecestash_core::config::UploadConfig;
use piecestash_core::{DEFAULT_WINDOW_SIZE, Piece, PieceHash};
use piecestash_storage::{ChunkedPieceStore, FilesystemBackend, MemoryBackend, ObjectStore};
use piecestash_upload::{CancellationToken, UploadError, UploadRegistry};
use std::io::Cursor;
use std::sync::Arc;

const KIB_256: u64 = 256 * 1024;

#[tokio::test]
async fn twenty_mib_object_uploads_in_two_units() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    let session = mock_session(&server).await;
    let first = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 0-16777215/*");
            then.status(308).header("Range", "bytes=0-16777215");
        })
        .await;
    let last = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 16777216-20971519/20971520");
            then.status(200).json_body(serde_json::json!({"id": "file-1"}));
        })
        .await;

    let config = UploadConfig {
        window_size: DEFAULT_WINDOW_SIZE,
        ..config(&server)
    };
    let data = seeded_bytes(1, 20 * 1024 * 1024);
    let outcome = pipeline(config)
        .upload("movie.bin", Cursor::new(data), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.units, 2);
    assert_eq!(outcome.total_length, 20 * 1024 * 1024);
    assert_eq!(outcome.locator, server.url(SESSION_PATH));
    session.assert_async().await;
    first.assert_async().await;
    last.assert_async().await;
}

#[tokio::test]
async fn partially_acknowledged_range_resends_tail() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    let half = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 0-262143/*");
            then.status(308).header("Range", "bytes=0-131071");
        })
        .await;
    let tail = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 131072-262143/*");
            then.status(308).header("Range", "bytes=0-262143");
        })
        .await;
    let second = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 262144-524287/*");
            then.status(308).header("Range", "bytes=0-524287");
        })
        .await;
    let last = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 524288-524297/524298");
            then.status(201);
        })
        .await;

    let data = seeded_bytes(2, (2 * KIB_256 + 10) as usize);
    let outcome = pipeline(config(&server))
        .upload("obj.bin", Cursor::new(data), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.units, 3);
    assert_eq!(outcome.total_length, 2 * KIB_256 + 10);
    half.assert_async().await;
    tail.assert_async().await;
    second.assert_async().await;
    last.assert_async().await;
}

#[tokio::test]
async fn empty_object_is_finalized_with_empty_range() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    let session = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/upload/drive/v3/files")
                .header("x-upload-content-type", "text/plain; charset=utf-8");
            then.status(200).header("Location", server.url(SESSION_PATH));
        })
        .await;
    let finalize = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes */0");
            then.status(200);
        })
        .await;

    let outcome = pipeline(config(&server))
        .upload("empty.txt", Cursor::new(Bytes::new()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.units, 1);
    assert_eq!(outcome.total_length, 0);
    session.assert_async().await;
    finalize.assert_async().await;
}

#[tokio::test]
async fn missing_location_is_fatal_and_sends_no_data() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    let session = server
        .mock_async(|when, then| {
            when.method(POST).path("/upload/drive/v3/files");
            then.status(200);
        })
        .await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT);
            then.status(200);
        })
        .await;

    let err = pipeline(config(&server))
        .upload("a.txt", Cursor::new(Bytes::from("hello")), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Negotiation(_)), "got {err:?}");
    assert_eq!(session.hits_async().await, 1);
    assert_eq!(put.hits_async().await, 0);
}

#[tokio::test]
async fn rejected_session_is_fatal() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    let session = server
        .mock_async(|when, then| {
            when.method(POST).path("/upload/drive/v3/files");
            then.status(401).body("invalid credentials");
        })
        .await;

    let err = pipeline(config(&server))
        .upload("a.txt", Cursor::new(Bytes::from("hello")), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UploadError::Negotiation(message) => assert!(message.contains("invalid credentials")),
        other => panic!("expected negotiation error, got {other:?}"),
    }
    assert_eq!(session.hits_async().await, 1);
}

#[tokio::test]
async fn unexpected_status_aborts_without_retry() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path(SESSION_PATH);
            then.status(403).body("quota exceeded");
        })
        .await;

    let err = pipeline(config(&server))
        .upload("a.txt", Cursor::new(Bytes::from("hello")), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UploadError::UnexpectedStatus { status, range, body } => {
            assert_eq!(status, 403);
            assert_eq!(range, "bytes 0-4/5");
            assert_eq!(body, "quota exceeded");
        }
        other => panic!("expected unexpected status, got {other:?}"),
    }
    assert_eq!(put.hits_async().await, 1);
}

#[tokio::test]
async fn server_errors_are_retried_then_give_up() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path(SESSION_PATH);
            then.status(503);
        })
        .await;

    let err = pipeline(config(&server))
        .upload("a.txt", Cursor::new(Bytes::from("hello")), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UploadError::RetriesExhausted {
            offset, attempts, ..
        } => {
            assert_eq!(offset, 0);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(put.hits_async().await, 3);
}

#[tokio::test]
async fn finalize_on_non_final_range_is_a_protocol_error() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path(SESSION_PATH);
            then.status(200);
        })
        .await;

    let data = seeded_bytes(3, (KIB_256 + 1) as usize);
    let err = pipeline(config(&server))
        .upload("a.bin", Cursor::new(data), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Protocol(_)), "got {err:?}");
    assert_eq!(put.hits_async().await, 1);
}

#[tokio::test]
async fn read_failure_aborts_before_finalizing() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT).path(SESSION_PATH);
            then.status(200);
        })
        .await;

    let chunks: Vec<std::io::Result<Bytes>> = vec![
        Ok(seeded_bytes(4, KIB_256 as usize)),
        Err(std::io::Error::other("disk went away")),
    ];
    let reader = tokio_util::io::StreamReader::new(futures::stream::iter(chunks));

    let err = pipeline(config(&server))
        .upload("broken.bin", reader, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Read(_)), "got {err:?}");
    assert_eq!(put.hits_async().await, 0);
}

#[tokio::test]
async fn cancelled_upload_opens_no_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    let session = mock_session(&server).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline(config(&server))
        .upload("a.txt", Cursor::new(Bytes::from("hello")), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
    assert_eq!(session.hits_async().await, 0);
}

#[tokio::test]
async fn generated_id_and_team_drive_are_sent_as_metadata() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    let ids = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/drive/v3/files/generateIds")
                .query_param("count", "1")
                .header("authorization", format!("Bearer {TOKEN}"));
            then.status(200)
                .json_body(serde_json::json!({"kind": "drive#generatedIds", "ids": ["gen-1"]}));
        })
        .await;
    let session = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/upload/drive/v3/files")
                .query_param("supportsAllDrives", "true")
                .json_body_partial(
                    r#"{"id": "gen-1", "name": "notes.txt", "parents": ["team-1"], "mimeType": "text/plain; charset=utf-8"}"#,
                );
            then.status(200).header("Location", server.url(SESSION_PATH));
        })
        .await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 0-10/11");
            then.status(201);
        })
        .await;

    let config = UploadConfig {
        generate_ids: true,
        team_drive: Some("team-1".to_string()),
        ..config(&server)
    };
    pipeline(config)
        .upload("notes.txt", Cursor::new(Bytes::from("plain words")), CancellationToken::new())
        .await
        .unwrap();

    ids.assert_async().await;
    session.assert_async().await;
    put.assert_async().await;
}

#[tokio::test]
async fn create_folder_returns_new_id() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    let folder = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/drive/v3/files")
                .json_body_partial(
                    r#"{"mimeType": "application/vnd.google-apps.folder", "name": "batch", "parents": ["root"]}"#,
                );
            then.status(200).json_body(serde_json::json!({"id": "folder-1"}));
        })
        .await;

    let pipeline = pipeline(config(&server));
    let id = pipeline
        .negotiator()
        .create_folder("batch", pipeline.config().effective_parent())
        .await
        .unwrap();

    assert_eq!(id, "folder-1");
    folder.assert_async().await;
}

#[tokio::test]
async fn completed_piece_is_uploaded_from_store() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    let put = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 0-9/10");
            then.status(200);
        })
        .await;

    let store: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
    let pieces = ChunkedPieceStore::new(store);
    let handle = pieces.piece(Piece::new(PieceHash::from_bytes([9; 20]), 10));
    handle.write(5, Bytes::from("FGHIJ")).await.unwrap();
    handle.write(0, Bytes::from("ABCDE")).await.unwrap();

    let pipeline = pipeline(config(&server));
    let err = pipeline
        .upload_piece(&handle, "piece.bin", CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::PieceIncomplete(_)));

    handle.mark_complete().await.unwrap();
    let outcome = pipeline
        .upload_piece(&handle, "piece.bin", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.total_length, 10);
    assert_eq!(outcome.mime_type, "text/plain; charset=utf-8");
    put.assert_async().await;
}

#[tokio::test]
async fn filesystem_piece_is_uploaded_from_store() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    let first = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 0-262143/*");
            then.status(308).header("Range", "bytes=0-262143");
        })
        .await;
    let last = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 262144-262243/262244");
            then.status(200);
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let pieces = ChunkedPieceStore::new(store);
    let data = seeded_bytes(6, (KIB_256 + 100) as usize);
    let handle = pieces.piece(Piece::new(PieceHash::from_bytes([6; 20]), data.len() as u64));
    handle.write(1000, data.slice(1000..)).await.unwrap();
    handle.write(0, data.slice(..1000)).await.unwrap();
    handle.mark_complete().await.unwrap();

    let outcome = pipeline(config(&server))
        .upload_piece(&handle, "piece.bin", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.units, 2);
    assert_eq!(outcome.total_length, KIB_256 + 100);
    first.assert_async().await;
    last.assert_async().await;
}

#[tokio::test]
async fn missing_acknowledgement_after_progress_is_a_protocol_error() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 0-262143/*");
            then.status(308).header("Range", "bytes=0-262143");
        })
        .await;
    // The remote forgets everything it acknowledged.
    let second = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(SESSION_PATH)
                .header("content-range", "bytes 262144-262153/262154");
            then.status(308);
        })
        .await;

    let data = seeded_bytes(7, (KIB_256 + 10) as usize);
    let err = pipeline(config(&server))
        .upload("lost.bin", Cursor::new(data), CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        UploadError::Protocol(message) => assert!(message.contains("262144"), "{message}"),
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(second.hits_async().await, 1);
}

#[tokio::test]
async fn registry_runs_pipeline_upload() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start_async().await;
    mock_session(&server).await;
    server
        .mock_async(|when, then| {
            when.method(PUT).path(SESSION_PATH);
            then.status(200);
        })
        .await;

    let registry = UploadRegistry::new();
    let pipeline = Arc::new(pipeline(config(&server)));
    registry
        .spawn_upload(pipeline, "tracked.txt", Cursor::new(Bytes::from("tracked")))
        .await
        .unwrap();

    let outcome = registry.wait("tracked.txt").await.unwrap().unwrap();
    assert_eq!(outcome.object_name, "tracked.txt");
    assert_eq!(outcome.total_length, 7);
    assert!(registry.active().await.is_empty());
}
