//! End-to-end tests for the pipe transport.
//!
//! Most tests run both endpoints over an in-memory duplex stream; the last section goes through a real socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use testhost_pipe::frame::{encode_frame, write_frame};
use testhost_pipe::server::callback;
use testhost_pipe::{
    BoxedStream, CancellationToken, FrameDecoder, Message, NamedPipeClient, NamedPipeServer, PipeError, PipeName,
    SerializerRegistry, VoidResponse,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Echo {
    n: u32,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EchoReply {
    n: u32,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stall;

const ECHO_ID: i32 = 1;

fn registry() -> Arc<SerializerRegistry> {
    let mut registry = SerializerRegistry::new();
    registry
        .register_json::<Echo>(ECHO_ID)
        .unwrap()
        .register_json::<EchoReply>(2)
        .unwrap()
        .register_void(3)
        .unwrap()
        .register_json::<Stall>(4)
        .unwrap();
    Arc::new(registry)
}

fn echo_server(registry: &Arc<SerializerRegistry>) -> NamedPipeServer {
    let handler = callback(|message: Message| async move {
        if let Some(echo) = message.downcast_ref::<Echo>() {
            return Ok(Box::new(EchoReply {
                n: echo.n,
                text: echo.text.clone(),
            }) as Message);
        }
        if message.downcast_ref::<Stall>().is_some() {
            std::future::pending::<()>().await;
        }
        Ok(Box::new(VoidResponse) as Message)
    });
    NamedPipeServer::detached(Arc::clone(registry), handler).with_fail_fast(Arc::new(|e: &PipeError| {
        panic!("unexpected fail-fast: {e}");
    }))
}

async fn connected_pair() -> (NamedPipeClient, NamedPipeServer, CancellationToken) {
    let registry = registry();
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let server = echo_server(&registry);
    let token = CancellationToken::new();
    server.start_with_stream(Box::new(server_end), &token).await;
    let client = NamedPipeClient::from_stream(Box::new(client_end), registry);
    (client, server, token)
}

// =============================================================================
// Request / reply
// =============================================================================

#[tokio::test]
async fn request_round_trips_through_server() {
    let (client, server, token) = connected_pair().await;

    let reply: EchoReply = client
        .request(
            &Echo {
                n: 7,
                text: "hello".into(),
            },
            &token,
        )
        .await
        .unwrap();
    assert_eq!(
        reply,
        EchoReply {
            n: 7,
            text: "hello".into()
        }
    );

    // Unregistered request types fail before touching the wire.
    let unregistered: Result<VoidResponse, _> = client.request(&"not registered", &token).await;
    assert!(matches!(unregistered, Err(PipeError::UnregisteredType(_))));
    assert!(client.is_connected().await);

    server.dispose().await.unwrap();
}

#[tokio::test]
async fn payload_larger_than_read_buffer_is_reassembled() {
    let (client, server, token) = connected_pair().await;
    let text = "x".repeat(300_000);

    let reply: EchoReply = client.request(&Echo { n: 1, text: text.clone() }, &token).await.unwrap();
    assert_eq!(reply.text.len(), 300_000);
    assert_eq!(reply.text, text);

    server.dispose().await.unwrap();
}

#[tokio::test]
async fn concurrent_requests_are_serialized() {
    let (client, server, token) = connected_pair().await;
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for n in 0..16u32 {
        let client = Arc::clone(&client);
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            let text = n.to_string().repeat(10_000);
            let reply: EchoReply = client.request(&Echo { n, text: text.clone() }, &token).await.unwrap();
            assert_eq!(reply.n, n);
            assert_eq!(reply.text, text);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    server.dispose().await.unwrap();
}

#[tokio::test]
async fn wrong_reply_type_is_reported() {
    let (client, server, token) = connected_pair().await;

    let result: Result<Echo, _> = client
        .request(
            &Echo {
                n: 1,
                text: String::new(),
            },
            &token,
        )
        .await;
    assert!(matches!(result, Err(PipeError::UnexpectedResponse { .. })));

    server.dispose().await.unwrap();
}

// =============================================================================
// Cancellation, timeouts, disposal
// =============================================================================

#[tokio::test]
async fn cancelled_request_drops_connection() {
    let (client, server, _token) = connected_pair().await;
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };
    let result: Result<VoidResponse, _> = client.request(&Stall, &cancel).await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(PipeError::Cancelled)));
    assert!(!client.is_connected().await);

    let after: Result<EchoReply, _> = client
        .request(
            &Echo {
                n: 2,
                text: String::new(),
            },
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(after, Err(PipeError::NotConnected)));

    server.dispose().await.unwrap();
}

#[tokio::test]
async fn connect_distinguishes_timeout_from_cancellation() {
    let client = NamedPipeClient::new(PipeName::unique("nobody_listens"), registry());

    let timed_out = client.connect(Duration::from_millis(200), &CancellationToken::new()).await;
    assert!(matches!(timed_out, Err(PipeError::Timeout(_))));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let cancelled = client.connect(Duration::from_secs(30), &cancel).await;
    assert!(matches!(cancelled, Err(PipeError::Cancelled)));
    assert!(cancelled.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn dispose_stops_idle_loop() {
    let (_client, server, _token) = connected_pair().await;
    assert!(server.is_serving().await);
    server.dispose().await.unwrap();
    assert!(!server.is_serving().await);
    // Second dispose is a no-op.
    server.dispose().await.unwrap();
}

#[tokio::test]
async fn external_cancellation_ends_loop() {
    let (_client, server, token) = connected_pair().await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.is_serving().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

// =============================================================================
// Fail-fast
// =============================================================================

#[tokio::test]
async fn unknown_serializer_id_triggers_fail_fast() {
    let registry = registry();
    let (mut raw, server_end) = tokio::io::duplex(1024);
    let failures: Arc<Mutex<Vec<String>>> = Arc::default();

    let server = {
        let failures = Arc::clone(&failures);
        NamedPipeServer::detached(Arc::clone(&registry), callback(|m: Message| async move { Ok(m) })).with_fail_fast(
            Arc::new(move |e: &PipeError| {
                failures.lock().unwrap().push(e.to_string());
            }),
        )
    };
    let token = CancellationToken::new();
    server.start_with_stream(Box::new(server_end) as BoxedStream, &token).await;

    write_frame(&mut raw, 999, b"{}").await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while server.is_serving().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("999"));
}

// =============================================================================
// Chunked decoding
// =============================================================================

proptest! {
    /// Any chunking of a frame stream decodes to the original messages.
    #[test]
    fn chunked_frames_decode_to_original(
        texts in prop::collection::vec(".{0,64}", 1..5),
        cuts in prop::collection::vec(1usize..97, 0..40),
    ) {
        let registry = registry();
        let mut wire = Vec::new();
        let originals: Vec<Echo> = texts
            .into_iter()
            .enumerate()
            .map(|(n, text)| Echo { n: n as u32, text })
            .collect();
        for echo in &originals {
            let (id, payload) = registry.encode(echo).unwrap();
            wire.extend(encode_frame(id, &payload).unwrap());
        }

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        let mut rest: &[u8] = &wire;
        let mut cuts = cuts.into_iter();
        while !rest.is_empty() {
            let take = cuts.next().unwrap_or(rest.len()).min(rest.len());
            decoder.push(&rest[..take]);
            rest = &rest[take..];
            while let Some(frame) = decoder.next_frame().unwrap() {
                prop_assert_eq!(frame.serializer_id, ECHO_ID);
                let message = registry.decode(frame.serializer_id, &frame.payload).unwrap();
                decoded.push(*message.downcast::<Echo>().unwrap());
            }
        }

        prop_assert!(decoder.is_empty());
        prop_assert_eq!(decoded, originals);
    }
}

// =============================================================================
// Real socket
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_end_to_end() {
    let registry = registry();
    let name = PipeName::unique("testhost_pipe_e2e");
    let server = Arc::new(
        NamedPipeServer::bind(name.clone(), Arc::clone(&registry), echo_server_handler()).unwrap(),
    );
    let token = CancellationToken::new();

    let accept = {
        let server = Arc::clone(&server);
        let token = token.clone();
        tokio::spawn(async move { server.wait_connection(&token).await })
    };

    let client = NamedPipeClient::new(name.clone(), registry);
    client.connect(Duration::from_secs(5), &token).await.unwrap();
    accept.await.unwrap().unwrap();

    let reply: EchoReply = client
        .request(
            &Echo {
                n: 42,
                text: "socket".into(),
            },
            &token,
        )
        .await
        .unwrap();
    assert_eq!(reply.n, 42);

    client.dispose().await;
    server.dispose().await.unwrap();
    assert!(!name.path().exists());
}

#[cfg(unix)]
fn echo_server_handler() -> testhost_pipe::RequestCallback {
    callback(|message: Message| async move {
        let echo = message
            .downcast::<Echo>()
            .map_err(|_| PipeError::Handler("expected Echo".into()))?;
        Ok(Box::new(EchoReply {
            n: echo.n,
            text: echo.text,
        }) as Message)
    })
}
