mod common;

use common::*;
use oxygen::download::notifier::Event;
use oxygen::ipc::protocol::{IpcRequest, IpcResponse};
use oxygen::ipc::server;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn send(&mut self, request: &IpcRequest) {
        let json = serde_json::to_string(request).unwrap();
        self.send_raw(&json).await;
    }

    async fn recv(&mut self) -> IpcResponse {
        let line = timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("no response in time")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn call(&mut self, request: IpcRequest) -> IpcResponse {
        self.send(&request).await;
        self.recv().await
    }
}

async fn start_server(h: &Harness) -> (std::net::SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(server::serve(listener, h.orchestrator.clone(), cancel.clone()));
    (addr, cancel)
}

#[tokio::test]
async fn test_ping_and_malformed_lines() {
    let h = Harness::start(FakeEngine::default()).await;
    let (addr, cancel) = start_server(&h).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.call(IpcRequest::Ping).await, IpcResponse::Pong);

    client.send_raw("{not json").await;
    assert!(matches!(client.recv().await, IpcResponse::Error { .. }));

    // Connection survives the bad line
    assert_eq!(client.call(IpcRequest::Ping).await, IpcResponse::Pong);

    cancel.cancel();
}

#[tokio::test]
async fn test_settings_over_ipc() {
    let h = Harness::start(FakeEngine::default()).await;
    let (addr, cancel) = start_server(&h).await;
    let mut client = Client::connect(addr).await;

    let response = client
        .call(IpcRequest::SetSetting {
            field: "segments".to_string(),
            value: serde_json::json!(11),
        })
        .await;
    match response {
        IpcResponse::Settings { settings, coercion } => {
            assert_eq!(settings.segments, 4);
            assert_eq!(coercion.unwrap().rejected, "11");
        }
        other => panic!("unexpected response: {:?}", other),
    }

    let response = client
        .call(IpcRequest::SetSetting {
            field: "write_thumbnail".to_string(),
            value: serde_json::json!(true),
        })
        .await;
    assert!(matches!(
        response,
        IpcResponse::Settings { ref settings, coercion: None } if settings.write_thumbnail
    ));

    let response = client
        .call(IpcRequest::SetSetting {
            field: "nope".to_string(),
            value: serde_json::json!("x"),
        })
        .await;
    assert!(matches!(response, IpcResponse::Invalid { .. }));

    cancel.cancel();
}

#[tokio::test]
async fn test_enqueue_and_subscribe_over_ipc() {
    let h = Harness::start(FakeEngine::new([Step::Succeed {
        progress: vec![0.5],
        file: None,
    }]))
    .await;
    let (addr, cancel) = start_server(&h).await;
    let mut client = Client::connect(addr).await;

    assert!(matches!(client.call(IpcRequest::Subscribe).await, IpcResponse::Ok { .. }));

    let response = client
        .call(IpcRequest::Enqueue {
            url: "not a url".to_string(),
            audio_only: false,
        })
        .await;
    assert!(matches!(response, IpcResponse::Invalid { .. }));

    client
        .send(&IpcRequest::Enqueue {
            url: "https://example.com/v".to_string(),
            audio_only: false,
        })
        .await;

    // Event frames and the enqueue reply may interleave
    let mut job_id = None;
    let mut events = Vec::new();
    loop {
        match client.recv().await {
            IpcResponse::Enqueued { job_id: id } => job_id = Some(id),
            IpcResponse::Event { event } => {
                let done = matches!(event, Event::DownloadReset { .. });
                events.push(event);
                if done {
                    break;
                }
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    let job_id = job_id.expect("enqueue reply missing");
    assert!(matches!(events.first(), Some(Event::JobStarted { job_id: j, .. }) if *j == job_id));
    assert_eq!(progress_values(&events), vec![0.0, 0.5, 1.0]);
    assert!(events.iter().any(|e| matches!(e, Event::LogAppended { .. })));

    let response = client.call(IpcRequest::LoadLogs).await;
    // LoadLogs replays to subscribers, so skip frames until the reply arrives
    let mut response = response;
    while let IpcResponse::Event { .. } = response {
        response = client.recv().await;
    }
    assert!(matches!(response, IpcResponse::Logs { ref entries } if entries.len() == 1));

    cancel.cancel();
}

#[tokio::test]
async fn test_auth_over_ipc() {
    let h = Harness::start(FakeEngine::default()).await;
    let (addr, cancel) = start_server(&h).await;
    let mut client = Client::connect(addr).await;

    let response = client
        .call(IpcRequest::SaveCredentials {
            domain: "example.com".to_string(),
            username: "alice".to_string(),
            password: "pw".to_string(),
        })
        .await;
    assert_eq!(response, IpcResponse::Saved { ok: true });

    match client.call(IpcRequest::ListAuth).await {
        IpcResponse::AuthEntries { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].domain, "example.com");
        }
        other => panic!("unexpected response: {:?}", other),
    }

    let response = client
        .call(IpcRequest::DeleteAuth {
            domain: "example.com".to_string(),
            kind: "password".to_string(),
        })
        .await;
    assert_eq!(response, IpcResponse::Deleted { ok: true });

    cancel.cancel();
}
