//! End-to-end scenarios driven against `RouterProcess`'s components
//! directly, without binding a real HTTP listener: build the process with
//! `RouterProcess::start`, point `static_backends` at `wiremock` mock
//! servers, then call `proxy.dispatch` / `message_bus` / `workflow_manager`
//! the same way the HTTP handlers do.

use fleet_router::config::{RoutingLogic, RouterConfig, ServiceDiscoveryMode};
use fleet_router::models::{AgentMessage, WorkflowFingerprint};
use fleet_router::proxy::ProxyOutcome;
use fleet_router::RouterProcess;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 0,
        "model": "m",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5},
    })
}

fn request_body() -> serde_json::Value {
    json!({
        "model": "m",
        "messages": [{"role": "user", "content": "hello there"}],
        "stream": false,
    })
}

fn config_for(backends: Vec<String>, routing_logic: RoutingLogic) -> RouterConfig {
    RouterConfig {
        routing_logic,
        service_discovery: ServiceDiscoveryMode::Static,
        static_backends: backends,
        static_models: vec!["m".to_string()],
        ..RouterConfig::default()
    }
}

/// Round-robin fairness: three static backends, twelve requests, each
/// backend serves exactly four, in strict A,B,C repeating order.
#[tokio::test]
async fn round_robin_fairness_distributes_evenly() {
    let servers = [MockServer::start().await, MockServer::start().await, MockServer::start().await];
    for server in &servers {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("ok")))
            .mount(server)
            .await;
    }
    let backends: Vec<String> = servers.iter().map(|s| s.uri()).collect();
    let config = config_for(backends.clone(), RoutingLogic::Roundrobin);
    let process = RouterProcess::start(config).await.unwrap();

    let fingerprint = process.proxy.fingerprint("m", "hello there", None, None);
    let mut order = Vec::new();
    for _ in 0..12 {
        let outcome = process.proxy.dispatch(&fingerprint, &request_body(), false).await.unwrap();
        match outcome {
            ProxyOutcome::Buffered { endpoint_url, .. } => order.push(endpoint_url),
            ProxyOutcome::Stream { .. } => panic!("expected buffered outcome"),
        }
    }

    for url in &backends {
        let served = order.iter().filter(|u| *u == url).count();
        assert_eq!(served, 4, "backend {url} should have served exactly 4 requests");
    }
    let expected: Vec<String> = backends.iter().cloned().cycle().take(12).collect();
    assert_eq!(order, expected);
}

/// Workflow pinning: every agent in the same workflow lands on the
/// engine the first request pinned, and the pin survives across agents.
#[tokio::test]
async fn workflow_pinning_sticks_across_agents() {
    let servers = [MockServer::start().await, MockServer::start().await];
    for server in &servers {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("ok")))
            .mount(server)
            .await;
    }
    let backends: Vec<String> = servers.iter().map(|s| s.uri()).collect();
    let config = config_for(backends, RoutingLogic::WorkflowAware);
    let process = RouterProcess::start(config).await.unwrap();

    let workflow = |agent: &str| WorkflowFingerprint {
        workflow_id: "w1".to_string(),
        agent_id: agent.to_string(),
    };

    let fp_planner = process.proxy.fingerprint("m", "hello there", None, Some(workflow("planner")));
    let fp_executor = process.proxy.fingerprint("m", "hello there", None, Some(workflow("executor")));

    let first = process.proxy.dispatch(&fp_planner, &request_body(), false).await.unwrap();
    let second = process.proxy.dispatch(&fp_executor, &request_body(), false).await.unwrap();

    let url_of = |o: ProxyOutcome| match o {
        ProxyOutcome::Buffered { endpoint_url, .. } => endpoint_url,
        ProxyOutcome::Stream { .. } => panic!("expected buffered outcome"),
    };
    assert_eq!(url_of(first), url_of(second));

    let snapshot = process.workflow_manager.snapshot("w1").await.unwrap();
    assert_eq!(snapshot.agent_count, 2);
    assert_eq!(snapshot.request_count, 2);
}

/// Agent messaging: a send through the Message Bus is visible to a
/// `receive` for the same `(workflow, target)` pair, in FIFO order.
#[tokio::test]
async fn agent_messaging_round_trips_in_order() {
    let config = config_for(vec!["http://unused".to_string()], RoutingLogic::Roundrobin);
    let process = RouterProcess::start(config).await.unwrap();

    for i in 0..3 {
        process
            .message_bus
            .send(AgentMessage {
                id: uuid::Uuid::new_v4(),
                workflow_id: "w1".to_string(),
                source_agent_id: "planner".to_string(),
                target_agent_id: "executor".to_string(),
                message_type: "step".to_string(),
                payload: json!({ "step": i }),
                created_at: chrono::Utc::now(),
                ttl_seconds: None,
            })
            .await
            .unwrap();
    }

    let received = process
        .message_bus
        .receive("w1", "executor", 10, Duration::from_millis(50))
        .await;
    assert_eq!(received.len(), 3);
    let steps: Vec<i64> = received.iter().map(|m| m.payload["step"].as_i64().unwrap()).collect();
    assert_eq!(steps, vec![0, 1, 2]);
}

/// Queue-full backpressure: a mailbox at capacity rejects further
/// sends with `QueueFull` rather than dropping the oldest message.
#[tokio::test]
async fn queue_full_backpressure() {
    let mut config = config_for(vec!["http://unused".to_string()], RoutingLogic::Roundrobin);
    config.max_message_queue_size = 2;
    let process = RouterProcess::start(config).await.unwrap();

    let msg = |i: i64| AgentMessage {
        id: uuid::Uuid::new_v4(),
        workflow_id: "w1".to_string(),
        source_agent_id: "a".to_string(),
        target_agent_id: "b".to_string(),
        message_type: "note".to_string(),
        payload: json!({ "i": i }),
        created_at: chrono::Utc::now(),
        ttl_seconds: None,
    };

    process.message_bus.send(msg(1)).await.unwrap();
    process.message_bus.send(msg(2)).await.unwrap();
    let err = process.message_bus.send(msg(3)).await.unwrap_err();
    assert_eq!(err.kind(), "queue_full");

    let received = process.message_bus.receive("w1", "b", 10, Duration::from_millis(20)).await;
    assert_eq!(received.len(), 2);
}

/// Registry churn: a backend that drops out of discovery is removed
/// from the live set and any workflow pinned to it gets reassigned rather
/// than stuck routing to a dead URL.
#[tokio::test]
async fn registry_churn_reassigns_pinned_workflow() {
    let servers = [MockServer::start().await, MockServer::start().await];
    for server in &servers {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("ok")))
            .mount(server)
            .await;
    }
    let backends: Vec<String> = servers.iter().map(|s| s.uri()).collect();
    let config = config_for(backends.clone(), RoutingLogic::WorkflowAware);
    let process = RouterProcess::start(config).await.unwrap();

    let fingerprint = process.proxy.fingerprint(
        "m",
        "hello there",
        None,
        Some(WorkflowFingerprint {
            workflow_id: "w1".to_string(),
            agent_id: "planner".to_string(),
        }),
    );
    let first = process.proxy.dispatch(&fingerprint, &request_body(), false).await.unwrap();
    let pinned_url = match first {
        ProxyOutcome::Buffered { endpoint_url, .. } => endpoint_url,
        ProxyOutcome::Stream { .. } => panic!("expected buffered outcome"),
    };

    let remaining: Vec<_> = backends.iter().filter(|u| **u != pinned_url).cloned().collect();
    process.registry.refresh_now(
        remaining
            .iter()
            .map(|url| fleet_router::models::Endpoint::new(url.clone(), vec!["m".to_string()]))
            .collect(),
    );

    // Waits for the cleanup task's background removal-event subscription
    // to clear the now-dangling pin before asserting reassignment.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = process.proxy.dispatch(&fingerprint, &request_body(), false).await.unwrap();
    let reassigned_url = match second {
        ProxyOutcome::Buffered { endpoint_url, .. } => endpoint_url,
        ProxyOutcome::Stream { .. } => panic!("expected buffered outcome"),
    };
    assert_ne!(reassigned_url, pinned_url);
    assert!(remaining.contains(&reassigned_url));
}

/// Disaggregated prefill: the prefill node receives exactly one call
/// tagged `sender`, the decode node receives exactly one call tagged
/// `receiver`, both carrying the same handshake id, and the client-visible
/// response comes only from the decode node.
#[tokio::test]
async fn disaggregated_prefill_handshake() {
    let prefill_server = MockServer::start().await;
    let decode_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("x-router-role", "sender"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("prefill-only")))
        .expect(1)
        .mount(&prefill_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("x-router-role", "receiver"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body("decoded answer")))
        .expect(1)
        .mount(&decode_server)
        .await;

    let mut labels_prefill = std::collections::HashMap::new();
    labels_prefill.insert("role".to_string(), "prefill".to_string());
    let mut labels_decode = std::collections::HashMap::new();
    labels_decode.insert("role".to_string(), "decode".to_string());

    let mut config = config_for(vec!["http://placeholder".to_string()], RoutingLogic::DisaggregatedPrefill);
    config.prefill_model_labels = vec!["prefill".to_string()];
    config.decode_model_labels = vec!["decode".to_string()];
    let process = RouterProcess::start(config).await.unwrap();
    process.registry.refresh_now(vec![
        fleet_router::models::Endpoint::new(prefill_server.uri(), vec!["m".to_string()]).with_labels(labels_prefill),
        fleet_router::models::Endpoint::new(decode_server.uri(), vec!["m".to_string()]).with_labels(labels_decode),
    ]);

    let fingerprint = process.proxy.fingerprint(
        "m",
        "hello there",
        None,
        Some(WorkflowFingerprint {
            workflow_id: "w1".to_string(),
            agent_id: "planner".to_string(),
        }),
    );
    let outcome = process.proxy.dispatch(&fingerprint, &request_body(), false).await.unwrap();
    match outcome {
        ProxyOutcome::Buffered { body, .. } => {
            let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(parsed["choices"][0]["message"]["content"], "decoded answer");
        }
        ProxyOutcome::Stream { .. } => panic!("expected buffered outcome"),
    }

    prefill_server.verify().await;
    decode_server.verify().await;
}
