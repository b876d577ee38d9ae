#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, time::Duration};

use {
    bulkwa_common::{MediaRef, SendError},
    bulkwa_whatsapp::{
        DisconnectKind, OpenRequest, OutboundMessage, ProtocolVersion, SidecarTransport,
        Transport, TransportEvent,
    },
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::net::TcpListener,
    tokio_tungstenite::tungstenite::Message,
};

/// Start a one-connection sidecar that answers every request with the
/// messages `script` returns for it.
async fn fake_sidecar(script: fn(&Value) -> Vec<Value>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let request: Value = serde_json::from_str(&text).unwrap();
            for reply in script(&request) {
                ws.send(Message::Text(reply.to_string().into())).await.unwrap();
            }
        }
    });
    addr
}

fn open_request(account_id: &str) -> OpenRequest {
    OpenRequest {
        account_id: account_id.into(),
        auth_dir: std::env::temp_dir().join(account_id),
        credentials: None,
        protocol_version: ProtocolVersion::STABLE,
    }
}

fn pairing_script(request: &Value) -> Vec<Value> {
    let account = request["accountId"].clone();
    match request["type"].as_str() {
        Some("login") => {
            assert_eq!(request["version"], json!([2, 2413, 1]));
            vec![
                json!({"type": "qr", "accountId": account, "qr": "2@qr"}),
                json!({"type": "creds_update", "accountId": account, "creds": {"registered": true}}),
                json!({
                    "type": "connected",
                    "accountId": account,
                    "phoneNumber": "15551234567:4@s.whatsapp.net",
                    "name": "Shop"
                }),
            ]
        },
        Some("send_text") => vec![json!({
            "type": "send_result",
            "requestId": request["requestId"],
            "success": true,
            "messageId": "MSG1"
        })],
        Some("send_media") => {
            assert_eq!(request["mediaType"], "image");
            assert_eq!(request["caption"], "look");
            vec![json!({
                "type": "send_result",
                "requestId": request["requestId"],
                "success": false,
                "error": "media download failed"
            })]
        },
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn pairing_flow_and_sends() {
    let addr = fake_sidecar(pairing_script).await;
    let transport = SidecarTransport::new(format!("ws://{addr}"));

    let opened = transport.open(open_request("acct")).await.unwrap();
    let mut events = opened.events;

    assert_eq!(
        events.recv().await,
        Some(TransportEvent::PairingCode("2@qr".into()))
    );
    match events.recv().await {
        Some(TransportEvent::CredentialsUpdated(creds)) => assert_eq!(creds["registered"], true),
        other => panic!("expected credentials, got {other:?}"),
    }
    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Open {
            identity: "15551234567".into(),
            display_name: Some("Shop".into()),
        })
    );

    let receipt = opened
        .connection
        .send(OutboundMessage {
            to: "15550001@s.whatsapp.net",
            body: "hi",
            media: None,
        })
        .await
        .unwrap();
    assert_eq!(receipt.message_id.as_deref(), Some("MSG1"));
    assert_eq!(receipt.to, "15550001@s.whatsapp.net");

    let media = MediaRef::from_url("https://cdn.example.com/promo.png");
    let err = opened
        .connection
        .send(OutboundMessage {
            to: "15550001@s.whatsapp.net",
            body: "look",
            media: Some(&media),
        })
        .await
        .unwrap_err();
    assert_eq!(err, SendError::Rejected("media download failed".into()));
}

fn version_mismatch_script(request: &Value) -> Vec<Value> {
    match request["type"].as_str() {
        Some("login") => vec![json!({
            "type": "disconnected",
            "accountId": request["accountId"],
            "reason": "Connection Failure",
            "statusCode": 405
        })],
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn close_status_is_forwarded() {
    let addr = fake_sidecar(version_mismatch_script).await;
    let transport = SidecarTransport::new(format!("ws://{addr}"));

    let mut opened = transport.open(open_request("acct")).await.unwrap();
    match opened.events.recv().await {
        Some(TransportEvent::Close(reason)) => {
            assert_eq!(reason.kind(), DisconnectKind::VersionMismatch);
            assert_eq!(reason.message, "Connection Failure");
        },
        other => panic!("expected close, got {other:?}"),
    }
    // The route is gone once the connection closed.
    assert_eq!(opened.events.recv().await, None);
}

#[tokio::test]
async fn unreachable_sidecar_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = SidecarTransport::new(format!("ws://{addr}"));
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        transport.open(open_request("acct")),
    )
    .await
    .expect("open should give up");
    assert!(result.is_err());
}
