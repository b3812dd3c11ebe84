//! Turn lifecycle: send, stream, suspend, cancel, recover

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use gridchat::engine::EngineError;
use gridchat::transcript::types::{Block, Message, StatusVariant, ToolCallStatus};
use gridchat::{ChatEngine, MemoryTranscriptCache, SessionCache, TranscriptCache};

use super::common::transport::{
    frame, raw_assistant, raw_user, script, script_chunked, wait_idle, Chunk, ScriptedTransport,
};

fn engine_with(transport: Arc<ScriptedTransport>) -> (ChatEngine, Arc<MemoryTranscriptCache>) {
    let durable = Arc::new(MemoryTranscriptCache::default());
    let cache = Arc::new(SessionCache::new(durable.clone()));
    let engine = ChatEngine::new(transport, cache).with_recovery_delay(Duration::from_millis(50));
    (engine, durable)
}

fn assistant_blocks(engine: &ChatEngine) -> Vec<Block> {
    engine
        .snapshot()
        .messages
        .iter()
        .rev()
        .find(|m| m.is_assistant())
        .map(|m| m.blocks().to_vec())
        .unwrap_or_default()
}

#[tokio::test]
async fn full_turn_produces_user_and_assistant_pair() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_script(script(&[
        frame("session_init", &json!({"id": "s1"})),
        frame("text_delta", &json!({"delta": "Hello"})),
        frame("telemetry", &json!({"ignored": true})),
        frame("text_delta", &json!({"delta": " world"})),
        frame("done", &json!({})),
    ]));
    let (engine, durable) = engine_with(transport.clone());

    engine.send("make a budget", vec![]).unwrap();
    wait_idle(&engine).await;

    let snap = engine.snapshot();
    assert_eq!(snap.id.as_str(), "s1");
    assert_eq!(snap.messages.len(), 2);
    assert!(matches!(
        &snap.messages[0],
        Message::User { content, .. } if content == "make a budget"
    ));
    assert_eq!(
        assistant_blocks(&engine),
        vec![Block::Text {
            content: "Hello world".to_string()
        }]
    );

    // Persisted under the backend-assigned id. The persist runs just
    // after the streaming flag clears, so give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let persisted = durable.get(&snap.id).await.unwrap().unwrap();
    assert_eq!(persisted, snap.messages);
    assert!(transport.aborts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn deltas_survive_arbitrary_chunk_boundaries() {
    let transport = Arc::new(ScriptedTransport::new());
    // 3-byte chunks split frames and multi-byte characters alike.
    transport.push_script(script_chunked(
        &[
            frame("session_init", &json!({"id": "s1"})),
            frame("text_delta", &json!({"delta": "héllo "})),
            frame("text_delta", &json!({"delta": "wörld"})),
            frame("done", &json!({})),
        ],
        3,
    ));
    let (engine, _) = engine_with(transport);

    engine.send("hi", vec![]).unwrap();
    wait_idle(&engine).await;

    assert_eq!(
        assistant_blocks(&engine),
        vec![Block::Text {
            content: "héllo wörld".to_string()
        }]
    );
}

#[tokio::test]
async fn send_is_rejected_while_streaming() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_script(vec![Chunk::Hang]);
    let (engine, _) = engine_with(transport);

    engine.send("first", vec![]).unwrap();
    assert!(matches!(
        engine.send("second", vec![]),
        Err(EngineError::Busy)
    ));
    engine.cancel();
    wait_idle(&engine).await;
}

#[tokio::test]
async fn cancel_marks_stopped_without_error_block() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_script(vec![
        Chunk::Data(
            [
                frame("session_init", &json!({"id": "s1"})),
                frame(
                    "tool_call_start",
                    &json!({"tool_call_id": "t1", "name": "write_cells", "args": {}}),
                ),
            ]
            .concat()
            .into_bytes(),
        ),
        Chunk::Hang,
    ]);
    let (engine, _) = engine_with(transport.clone());

    engine.send("fill the sheet", vec![]).unwrap();
    // Let the tool call land before cancelling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.cancel();
    wait_idle(&engine).await;

    let blocks = assistant_blocks(&engine);
    assert!(blocks.iter().any(|b| matches!(
        b,
        Block::ToolCall { status: ToolCallStatus::Error, error: Some(e), .. }
            if e == "stopped by user"
    )));
    let stopped = blocks
        .iter()
        .filter(|b| matches!(b, Block::Status { variant: StatusVariant::Stopped, .. }))
        .count();
    assert_eq!(stopped, 1);
    assert!(!blocks.iter().any(|b| matches!(b, Block::Error { .. })));

    // The backend abort goes out fire-and-forget.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !transport.aborts.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("abort was never requested");
    assert_eq!(*transport.aborts.lock().unwrap(), vec!["s1".to_string()]);
}

#[tokio::test]
async fn paused_turn_defers_token_stats_until_resolution() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_script(script(&[
        frame("session_init", &json!({"id": "s1"})),
        frame(
            "tool_call_start",
            &json!({"tool_call_id": "t1", "name": "delete_sheet", "args": {}}),
        ),
        frame(
            "pending_approval",
            &json!({"approval_id": "a1", "tool_call_id": "t1", "tool_name": "delete_sheet"}),
        ),
        frame("reply", &json!({"total_tokens": 50, "iterations": 1})),
        frame(
            "approval_resolved",
            &json!({"approval_id": "a1", "tool_call_id": "t1", "success": true}),
        ),
        frame("reply", &json!({"total_tokens": 30, "iterations": 1})),
        frame("done", &json!({})),
    ]));
    let (engine, _) = engine_with(transport);

    engine.send("clean up", vec![]).unwrap();
    wait_idle(&engine).await;

    let blocks = assistant_blocks(&engine);
    let stats: Vec<_> = blocks
        .iter()
        .filter_map(|b| match b {
            Block::TokenStats { stats } => Some(*stats),
            _ => None,
        })
        .collect();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_tokens, 80);
    assert_eq!(stats[0].iterations, 2);
    assert!(blocks
        .iter()
        .any(|b| matches!(b, Block::ApprovalAction { success: true, .. })));
}

#[tokio::test]
async fn stream_error_recovers_from_backend_log() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_script(script(&[
        frame("session_init", &json!({"id": "s1"})),
        frame("text_delta", &json!({"delta": "partial"})),
        frame("error", &json!({"message": "model overloaded"})),
        frame("done", &json!({})),
    ]));
    transport.set_messages(
        "s1",
        vec![raw_user("make a budget"), raw_assistant("recovered answer")],
    );
    let (engine, _) = engine_with(transport);

    engine.send("make a budget", vec![]).unwrap();
    wait_idle(&engine).await;

    // The inline error block is visible right after the turn.
    assert!(assistant_blocks(&engine)
        .iter()
        .any(|b| matches!(b, Block::Error { message } if message == "model overloaded")));

    // The delayed refresh replaces the visible transcript.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let blocks = assistant_blocks(&engine);
            if blocks
                .iter()
                .any(|b| matches!(b, Block::Text { content } if content == "recovered answer"))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("recovery refresh never landed");
    assert!(!assistant_blocks(&engine)
        .iter()
        .any(|b| matches!(b, Block::Error { .. })));
}

#[tokio::test]
async fn transport_failure_appends_connection_error() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_script(vec![
        Chunk::Data(
            [
                frame("session_init", &json!({"id": "s1"})),
                frame("text_delta", &json!({"delta": "so far"})),
            ]
            .concat()
            .into_bytes(),
        ),
        Chunk::Fail,
    ]);
    let (engine, _) = engine_with(transport);

    engine.send("hi", vec![]).unwrap();
    wait_idle(&engine).await;

    let blocks = assistant_blocks(&engine);
    assert!(matches!(&blocks[0], Block::Text { content } if content == "so far"));
    assert!(blocks
        .iter()
        .any(|b| matches!(b, Block::Error { message } if message.starts_with("connection lost"))));
}

#[tokio::test]
async fn session_switch_discards_inflight_stream() {
    // select! polls branches in random order, so repeat the switch to
    // cover both orderings of "chunk ready" vs "token cancelled".
    for _ in 0..25 {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_script(script(&[
            frame("session_init", &json!({"id": "s1"})),
            frame("text_delta", &json!({"delta": "stale"})),
            frame("done", &json!({})),
        ]));
        transport.set_messages("b", vec![raw_user("hey"), raw_assistant("fresh")]);
        let (engine, _) = engine_with(transport);

        engine.send("hi", vec![]).unwrap();
        engine.load_session(gridchat::SessionId::new("b")).await;
        wait_idle(&engine).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snap = engine.snapshot();
        assert_eq!(snap.id.as_str(), "b");
        assert!(!snap
            .messages
            .iter()
            .any(|m| matches!(m, Message::User { content, .. } if content == "hi")));
        let blocks = assistant_blocks(&engine);
        assert!(!blocks
            .iter()
            .any(|b| matches!(b, Block::Text { content } if content == "stale")));
        assert_eq!(
            blocks,
            vec![Block::Text {
                content: "fresh".to_string()
            }]
        );
    }
}

#[tokio::test]
async fn failed_stream_open_recovers_from_backend_log() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_messages("s1", vec![raw_user("hi"), raw_assistant("recovered answer")]);
    let (engine, _) = engine_with(transport.clone());

    engine.load_session(gridchat::SessionId::new("s1")).await;
    transport.fail_next_open();
    engine.send("hi", vec![]).unwrap();
    wait_idle(&engine).await;

    assert!(assistant_blocks(&engine)
        .iter()
        .any(|b| matches!(b, Block::Error { message } if message.starts_with("connection failed"))));

    // The delayed refresh replaces the failed turn with the canonical log.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if engine.snapshot().messages.len() == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("recovery refresh never landed");
    let blocks = assistant_blocks(&engine);
    assert!(!blocks.iter().any(|b| matches!(b, Block::Error { .. })));
    assert!(blocks
        .iter()
        .any(|b| matches!(b, Block::Text { content } if content == "recovered answer")));
}

#[tokio::test]
async fn clean_continuation_clears_prior_error_flag() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_script(script(&[
        frame("session_init", &json!({"id": "s1"})),
        frame("error", &json!({"message": "model overloaded"})),
        frame("done", &json!({})),
    ]));
    transport.push_script(script(&[
        frame("text_delta", &json!({"delta": "all good"})),
        frame("done", &json!({})),
    ]));
    let (engine, _) = engine_with(transport.clone());

    engine.send("hi", vec![]).unwrap();
    wait_idle(&engine).await;
    assert!(engine.snapshot().error_seen);

    engine.continue_turn().unwrap();
    wait_idle(&engine).await;
    assert!(!engine.snapshot().error_seen);

    // Only the errored turn schedules a recovery refresh; the clean
    // continuation must not add a second one.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.fetches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn resubscribe_skips_session_init_and_appends() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_messages("s1", vec![raw_user("hi"), raw_assistant("partial")]);
    transport.push_script(script(&[
        frame("session_init", &json!({"id": "other-session"})),
        frame("text_delta", &json!({"delta": " and more"})),
        frame("done", &json!({})),
    ]));
    let (engine, _) = engine_with(transport.clone());

    engine
        .load_session(gridchat::SessionId::new("s1"))
        .await;
    engine.resubscribe().unwrap();
    wait_idle(&engine).await;

    let snap = engine.snapshot();
    // The replayed init must not reassign the id.
    assert_eq!(snap.id.as_str(), "s1");
    assert_eq!(
        assistant_blocks(&engine),
        vec![Block::Text {
            content: "partial and more".to_string()
        }]
    );
    assert_eq!(
        *transport.opened.lock().unwrap(),
        vec!["resubscribe".to_string()]
    );
}
