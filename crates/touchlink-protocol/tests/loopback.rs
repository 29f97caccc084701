//! Integration test: framed session traffic over real QUIC on loopback.

use std::net::SocketAddr;

use touchlink_types::{
    Heartbeat, PadMessage, TouchBatch, TouchPhase, TouchPoint, TrackingId, CONTROL_TOKEN,
};

#[tokio::test]
async fn control_request_heartbeat_and_ordered_batches() {
    let cert = touchlink_certgen::generate_certificate("test-pad").unwrap();
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server =
        touchlink_protocol::QuicTransport::bind(bind, &cert.cert_pem, &cert.key_pem).unwrap();
    let server_addr = server.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let conn = server.accept().await.unwrap();
        let (mut tx, mut rx) = conn.accept_session_stream().await.unwrap();

        // First frame must be the opening token.
        let opening: PadMessage = rx.recv().await.unwrap().unwrap();
        match opening {
            PadMessage::ControlRequest { token, device_name } => {
                assert_eq!(token, CONTROL_TOKEN);
                assert_eq!(device_name, "handheld");
            }
            other => panic!("expected ControlRequest, got {other:?}"),
        }

        // Answer one ping.
        let msg: PadMessage = rx.recv().await.unwrap().unwrap();
        match msg {
            PadMessage::Heartbeat(ping) => {
                tx.send(&PadMessage::Heartbeat(Heartbeat::pong_for(&ping, 0)))
                    .await
                    .unwrap();
            }
            other => panic!("expected Heartbeat, got {other:?}"),
        }

        // Batches arrive in submission order, one frame per batch.
        let mut seqs = Vec::new();
        let mut phases = Vec::new();
        for _ in 0..3 {
            let msg: PadMessage = rx.recv().await.unwrap().unwrap();
            match msg {
                PadMessage::Touch(batch) => {
                    assert_eq!(batch.points.len(), 1);
                    seqs.push(batch.seq);
                    phases.push(batch.points[0].phase);
                }
                other => panic!("expected Touch, got {other:?}"),
            }
        }
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(
            phases,
            vec![TouchPhase::Added, TouchPhase::Moved, TouchPhase::Removed]
        );

        server.close();
    });

    let client = touchlink_protocol::QuicTransport::client().unwrap();
    let conn = client.connect(server_addr).await.unwrap();
    let (mut tx, mut rx) = conn.open_session_stream().await.unwrap();

    tx.send(&PadMessage::ControlRequest {
        token: CONTROL_TOKEN.to_string(),
        device_name: "handheld".to_string(),
    })
    .await
    .unwrap();

    let ping = Heartbeat::ping(1, 1);
    tx.send(&PadMessage::Heartbeat(ping)).await.unwrap();
    let reply: PadMessage = rx.recv().await.unwrap().unwrap();
    match reply {
        PadMessage::Heartbeat(pong) => assert!(pong.answers(&ping)),
        other => panic!("expected Pong, got {other:?}"),
    }

    let frames = [
        (0u64, TouchPhase::Added, 10, 20),
        (1, TouchPhase::Moved, 12, 21),
        (2, TouchPhase::Removed, 12, 21),
    ];
    for (seq, phase, x, y) in frames {
        let batch = TouchBatch {
            seq,
            sent_at_ms: seq,
            points: vec![TouchPoint {
                tracking_id: TrackingId(1),
                phase,
                x,
                y,
            }],
        };
        tx.send(&PadMessage::Touch(batch)).await.unwrap();
    }

    server_task.await.unwrap();
    client.close();
}
