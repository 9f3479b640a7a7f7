//! End-to-end tests driving a depot server over real WebSocket connections.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use filedepot_protocol::constants::{CHUNK_SIZE, MessageType};
use filedepot_protocol::envelope::Message;
use filedepot_protocol::frame::{ChunkHeader, encode_chunk_frame, parse_chunk_frame};
use filedepot_protocol::messages::{
    DownloadDoneResponse, DownloadFileRequest, FilesInfoResponse, UploadAbortRequest,
    UploadAckResponse, UploadBeginRequest, UploadDoneRequest, UploadReadyResponse,
};
use filedepot_server::{DepotServer, ServerConfig};
use filedepot_store::{Depot, Pool, STREAM_POOL_CAPACITY};

struct TestServer {
    server: Arc<DepotServer>,
    handle: tokio::task::JoinHandle<()>,
    depot: Arc<Depot>,
    dir: tempfile::TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let depot = Arc::new(Depot::new(dir.path()));
        let server = DepotServer::new(ServerConfig::default(), Arc::clone(&depot));
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move { runner.run().await.unwrap() });
        for _ in 0..50 {
            if server.local_addr().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Self {
            server,
            handle,
            depot,
            dir,
        }
    }

    fn folder(&self) -> &Path {
        self.dir.path()
    }

    async fn connect(&self) -> Client {
        let url = format!("ws://127.0.0.1:{}", self.server.port().await);
        let (ws, _) = connect_async(&url).await.unwrap();
        Client { ws }
    }

    async fn stop(self) {
        self.server.shutdown();
        self.handle.await.unwrap();
    }
}

enum Frame {
    Envelope(Message),
    Chunk(ChunkHeader, Vec<u8>),
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    async fn send(&mut self, msg: &Message) {
        self.ws
            .send(WsMessage::Text(serde_json::to_string(msg).unwrap().into()))
            .await
            .unwrap();
    }

    async fn send_chunk(&mut self, transfer_id: &str, offset: u64, data: &[u8]) {
        let header = ChunkHeader {
            transfer_id: transfer_id.into(),
            offset,
        };
        let frame = encode_chunk_frame(&header, data).unwrap();
        self.ws.send(WsMessage::Binary(frame.into())).await.unwrap();
    }

    /// Next data frame of either kind, skipping pings.
    async fn next_frame(&mut self) -> Frame {
        loop {
            match self.ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => {
                    return Frame::Envelope(serde_json::from_str(&text).unwrap());
                }
                WsMessage::Binary(data) => {
                    let (header, payload) = parse_chunk_frame(&data).unwrap();
                    return Frame::Chunk(header, payload);
                }
                _ => continue,
            }
        }
    }

    async fn next_envelope(&mut self) -> Message {
        match self.next_frame().await {
            Frame::Envelope(msg) => msg,
            Frame::Chunk(header, _) => panic!("unexpected chunk for {}", header.transfer_id),
        }
    }

    /// Opens an upload stream and returns the assigned transfer id.
    async fn upload_begin(&mut self, req_id: &str, name: &str) -> String {
        let req = UploadBeginRequest {
            file_name: name.into(),
        };
        let msg = Message::request(req_id, MessageType::UploadBegin, &req).unwrap();
        self.send(&msg).await;

        let ready = self.next_envelope().await;
        assert_eq!(ready.id, req_id);
        assert_eq!(ready.msg_type, MessageType::UploadReady);
        let ready: UploadReadyResponse = ready.decode().unwrap();
        assert!(ready.chunk_size > 0);
        ready.transfer_id
    }

    async fn upload_done(&mut self, req_id: &str, transfer_id: &str) {
        let done = UploadDoneRequest {
            transfer_id: transfer_id.into(),
        };
        let msg = Message::request(req_id, MessageType::UploadDone, &done).unwrap();
        self.send(&msg).await;
    }

    /// Full upload conversation; returns the final reply (ack or error).
    async fn upload(&mut self, req_id: &str, name: &str, chunks: &[&[u8]]) -> Message {
        let transfer_id = self.upload_begin(req_id, name).await;

        let mut offset = 0u64;
        for chunk in chunks {
            self.send_chunk(&transfer_id, offset, chunk).await;
            offset += chunk.len() as u64;
        }

        self.upload_done(&format!("{req_id}-done"), &transfer_id).await;
        self.next_envelope().await
    }

    /// Requests a download and drains it; returns the reassembled bytes
    /// and the final reply.
    async fn download(&mut self, req_id: &str, name: &str) -> (Vec<u8>, Message) {
        let req = DownloadFileRequest {
            file_name: name.into(),
        };
        let msg = Message::request(req_id, MessageType::DownloadFile, &req).unwrap();
        self.send(&msg).await;

        let mut content = Vec::new();
        loop {
            match self.next_frame().await {
                Frame::Chunk(header, payload) => {
                    assert_eq!(header.transfer_id, req_id);
                    assert_eq!(header.offset, content.len() as u64, "chunks out of order");
                    assert!(payload.len() <= CHUNK_SIZE);
                    content.extend_from_slice(&payload);
                }
                Frame::Envelope(reply) => return (content, reply),
            }
        }
    }
}

fn folder_entries(dir: &Path) -> Vec<std::ffi::OsString> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect()
}

#[tokio::test]
async fn upload_then_download_round_trip() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client
        .upload("up-1", "notes.txt", &[b"b1", b"b2", b"b3"])
        .await;
    assert_eq!(reply.id, "up-1");
    assert_eq!(reply.msg_type, MessageType::UploadAck);
    let ack: UploadAckResponse = reply.decode().unwrap();
    assert_eq!(ack.bytes_written, 6);

    assert_eq!(
        std::fs::read(server.folder().join("notes.txt")).unwrap(),
        b"b1b2b3"
    );

    let (content, reply) = client.download("dl-1", "notes.txt").await;
    assert_eq!(content, b"b1b2b3");
    assert_eq!(reply.id, "dl-1");
    assert_eq!(reply.msg_type, MessageType::DownloadDone);
    let done: DownloadDoneResponse = reply.decode().unwrap();
    assert_eq!(done.transfer_id, "dl-1");
    assert_eq!(done.bytes_sent, 6);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn large_download_arrives_in_bounded_ordered_chunks() {
    let server = TestServer::start().await;

    // Larger than one chunk, so the download must split it.
    let data: Vec<u8> = (0..CHUNK_SIZE + CHUNK_SIZE / 2)
        .map(|i| (i % 251) as u8)
        .collect();
    std::fs::write(server.folder().join("large.bin"), &data).unwrap();

    let mut client = server.connect().await;
    let (content, reply) = client.download("dl-big", "large.bin").await;
    assert_eq!(content, data);
    let done: DownloadDoneResponse = reply.decode().unwrap();
    assert_eq!(done.bytes_sent, data.len() as u64);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn download_of_missing_file_is_not_found() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let (content, reply) = client.download("dl-miss", "ghost.txt").await;
    assert!(content.is_empty());
    assert_eq!(reply.id, "dl-miss");
    assert_eq!(reply.error.unwrap().code, 404);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn duplicate_upload_is_a_conflict() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client.upload("up-a", "once.txt", &[b"data"]).await;
    assert_eq!(reply.msg_type, MessageType::UploadAck);

    // The second stream is refused as soon as the name is known; no
    // chunks or end-of-stream needed.
    client.upload_begin("up-b", "once.txt").await;
    let reply = client.next_envelope().await;
    assert_eq!(reply.id, "up-b");
    assert_eq!(reply.error.unwrap().code, 409);

    assert_eq!(std::fs::read(server.folder().join("once.txt")).unwrap(), b"data");

    drop(client);
    server.stop().await;
}

// Two upload streams for one not-yet-existing name over a single
// connection: both must keep draining, the finished stream wins the name,
// the other is refused at publication, and the connection stays usable
// with every stream slot returned.
#[tokio::test]
async fn concurrent_same_name_uploads_leave_the_connection_usable() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let t_a = client.upload_begin("up-a", "dup.txt").await;
    let t_b = client.upload_begin("up-b", "dup.txt").await;

    // Flood the second stream well past any internal buffering, then
    // finish it. A reply within the deadline proves the read pump never
    // stalled behind the first stream.
    let mut offset = 0u64;
    for _ in 0..20 {
        client.send_chunk(&t_b, offset, b"bb").await;
        offset += 2;
    }
    client.upload_done("up-b-done", &t_b).await;

    let reply = tokio::time::timeout(Duration::from_secs(3), client.next_envelope())
        .await
        .expect("connection stalled by concurrent same-name uploads");
    assert_eq!(reply.id, "up-b");
    assert_eq!(reply.msg_type, MessageType::UploadAck);

    // The idle stream loses the name when it finally finishes.
    client.upload_done("up-a-done", &t_a).await;
    let reply = tokio::time::timeout(Duration::from_secs(3), client.next_envelope())
        .await
        .expect("no outcome for the losing stream");
    assert_eq!(reply.id, "up-a");
    assert_eq!(reply.error.unwrap().code, 409);

    assert_eq!(
        std::fs::read(server.folder().join("dup.txt")).unwrap().len(),
        40
    );

    // The connection still answers calls and no permit leaked.
    let req = Message::bare("ls-1", MessageType::ListFiles);
    client.send(&req).await;
    let reply = client.next_envelope().await;
    assert_eq!(reply.msg_type, MessageType::FilesInfo);
    assert_eq!(
        server.depot.admission().available(Pool::Stream),
        STREAM_POOL_CAPACITY
    );

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn invalid_file_name_is_a_bad_request() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.upload_begin("up-dot", "../escape").await;
    let reply = client.next_envelope().await;
    assert_eq!(reply.id, "up-dot");
    assert_eq!(reply.error.unwrap().code, 400);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn listing_reflects_uploaded_files() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.upload("up-1", "a.txt", &[b"aa"]).await;
    client.upload("up-2", "b.txt", &[b"bb"]).await;

    let req = Message::bare("ls-1", MessageType::ListFiles);
    client.send(&req).await;
    let reply = client.next_envelope().await;
    assert_eq!(reply.id, "ls-1");
    assert_eq!(reply.msg_type, MessageType::FilesInfo);

    let resp: FilesInfoResponse = reply.decode().unwrap();
    let names: Vec<_> = resp.infos.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt"]);
    for info in &resp.infos {
        assert!(info.created_at <= info.updated_at);
    }

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn aborted_upload_leaves_no_file_and_releases_the_name() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let transfer_id = client.upload_begin("up-1", "kept.txt").await;
    client.send_chunk(&transfer_id, 0, b"partial").await;

    let abort = UploadAbortRequest {
        transfer_id: transfer_id.clone(),
    };
    let msg = Message::request("ab-1", MessageType::UploadAbort, &abort).unwrap();
    client.send(&msg).await;

    // The stream fails against its begin id.
    let reply = client.next_envelope().await;
    assert_eq!(reply.id, "up-1");
    assert!(reply.error.is_some());
    assert!(folder_entries(server.folder()).is_empty());

    // The name is free again for a fresh upload.
    let reply = client.upload("up-2", "kept.txt", &[b"whole"]).await;
    assert_eq!(reply.msg_type, MessageType::UploadAck);
    assert_eq!(
        std::fs::read(server.folder().join("kept.txt")).unwrap(),
        b"whole"
    );

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn two_connections_share_one_depot() {
    let server = TestServer::start().await;

    let mut writer = server.connect().await;
    let reply = writer.upload("up-1", "shared.txt", &[b"hello"]).await;
    assert_eq!(reply.msg_type, MessageType::UploadAck);

    let mut reader = server.connect().await;
    let (content, reply) = reader.download("dl-1", "shared.txt").await;
    assert_eq!(content, b"hello");
    assert_eq!(reply.msg_type, MessageType::DownloadDone);

    drop(writer);
    drop(reader);
    server.stop().await;
}
