//! Call-chain tests with a scripted client in place of the network.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::json;
use tempfile::TempDir;

use edgechain::client;
use edgechain::deployment::Error;
use edgechain::ChainClient;
use edgechain::Deployment;
use edgechain::MediaType;
use edgechain::Reply;
use edgechain::RequestBody;
use edgerun::host::IMAGE_BYTES;
use edgerun::BackendKind;
use edgerun::HostEnv;
use edgerun::ModuleConfig;
use edgerun::Runtime;
use edgerun::SharedRuntime;
use edgerun::Value;

#[derive(Debug, Clone, PartialEq)]
struct SentRequest {
    url: String,
    kind: String,
    content_type: String,
    body: Vec<u8>,
}

/// Answers each post with the next scripted reply and records what was sent.
struct ScriptedClient {
    replies: Mutex<VecDeque<Reply>>,
    sent: Mutex<Vec<SentRequest>>,
}

impl ScriptedClient {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChainClient for ScriptedClient {
    async fn post(&self, url: &str, body: RequestBody) -> client::Result<Reply> {
        let request = match body {
            RequestBody::Raw { content_type, bytes } => SentRequest {
                url: url.to_string(),
                kind: "raw".to_string(),
                content_type,
                body: bytes,
            },
            RequestBody::Multipart { field, mime, path, .. } => SentRequest {
                url: url.to_string(),
                kind: format!("multipart:{}", field),
                content_type: mime,
                body: std::fs::read(&path)?,
            },
        };
        self.sent.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        reply.ok_or_else(|| client::Error::Http("no scripted reply".to_string()))
    }
}

fn ok_reply(content_type: &str, body: &[u8]) -> Reply {
    Reply {
        status: 200,
        content_type: Some(content_type.to_string()),
        body: body.to_vec(),
    }
}

fn target(url: &str, path: &str, method: &str) -> serde_json::Value {
    json!({
        "servers": [{ "url": url }],
        "paths": { path: { method: { "responses": {} } } }
    })
}

fn deployment(instructions: serde_json::Value) -> Deployment {
    serde_json::from_value(json!({ "instructions": instructions })).expect("Invalid deployment")
}

fn empty_runtime() -> SharedRuntime {
    let rt = Runtime::new(BackendKind::Wasmi, HostEnv::builder().build()).expect("Failed to create runtime");
    rt.into_shared()
}

#[tokio::test]
async fn test_terminal_step_makes_no_call() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![]);
    let mut deployment = deployment(json!([{ "to": null }]));

    let response = deployment
        .call_chain(&runtime, &client, Some(Value::I32(3)), MediaType::OctetStream, None)
        .await
        .unwrap();

    assert_eq!(response.media_type, MediaType::OctetStream);
    assert_eq!(response.body, json!({ "result": 3 }));
    assert!(client.sent().is_empty());
    assert_eq!(deployment.program_counter, 1);
}

#[tokio::test]
async fn test_forward_then_wrap_reply() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![ok_reply("application/octet-stream", &[0xff, 0x01, 0x02])]);
    let mut deployment = deployment(json!([
        { "to": target("http://ml.local:5000/", "/deployments/d1/infer", "post") },
        { "to": null }
    ]));

    let response = deployment
        .call_chain(&runtime, &client, Some(Value::I64(9)), MediaType::OctetStream, None)
        .await
        .unwrap();

    assert_eq!(
        client.sent(),
        vec![SentRequest {
            url: "http://ml.local:5000/deployments/d1/infer".to_string(),
            kind: "raw".to_string(),
            content_type: "application/octet-stream".to_string(),
            body: b"9".to_vec(),
        }]
    );
    assert_eq!(response.body, json!({ "result": [255, 1, 2] }));
    assert_eq!(deployment.program_counter, 1);
}

#[tokio::test]
async fn test_octet_reply_is_not_read_as_json() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![ok_reply("application/octet-stream", br#"{"result":[1,2]}"#)]);
    let mut deployment = deployment(json!([
        { "to": target("http://peer", "/run", "post") },
        { "to": null }
    ]));

    let response = deployment
        .call_chain(&runtime, &client, Some(Value::I32(1)), MediaType::OctetStream, None)
        .await
        .unwrap();

    let expected: Vec<u8> = br#"{"result":[1,2]}"#.to_vec();
    assert_eq!(response.body, json!({ "result": expected }));
}

#[tokio::test]
async fn test_numeric_text_reply_stays_bytes() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![ok_reply("application/octet-stream", b"42")]);
    let mut deployment = deployment(json!([
        { "to": target("http://peer", "/run", "post") }
    ]));

    let response = deployment
        .call_chain(&runtime, &client, Some(Value::I32(1)), MediaType::OctetStream, None)
        .await
        .unwrap();
    assert_eq!(response.body, json!({ "result": [52, 50] }));
}

// --- Split steps ---

#[tokio::test]
async fn test_next_step_can_run_while_forward_is_pending() {
    let runtime = empty_runtime();
    let mut deployment = deployment(json!([
        { "to": target("http://self.local", "/deployments/d/answer", "post") },
        { "to": null }
    ]));

    let first = {
        let mut rt = runtime.lock().await;
        deployment
            .step(&mut rt, Some(Value::I32(42)), MediaType::OctetStream, None)
            .unwrap()
    };
    assert_eq!(first.target(), Some("http://self.local/deployments/d/answer"));
    assert_eq!(deployment.program_counter, 1);

    // The hop lands back on this deployment and takes the terminal step
    // before the first step has sent anything.
    let second = {
        let mut rt = runtime.lock().await;
        deployment
            .step(&mut rt, Some(Value::I32(42)), MediaType::OctetStream, None)
            .unwrap()
    };
    assert_eq!(second.target(), None);
    assert_eq!(deployment.program_counter, 2);
    let inner = second.finish(&ScriptedClient::new(vec![])).await.unwrap();
    assert_eq!(inner.body, json!({ "result": 42 }));

    let inner_body = inner.body.to_string().into_bytes();
    let client = ScriptedClient::new(vec![ok_reply("application/octet-stream", &inner_body)]);
    let outer = first.finish(&client).await.unwrap();
    assert_eq!(client.sent()[0].body, b"42");
    assert_eq!(outer.body, json!({ "result": inner_body }));
}

#[tokio::test]
async fn test_reply_media_type_decides_final_encoding() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![ok_reply("application/json", br#"{"result": 1}"#)]);
    let mut deployment = deployment(json!([
        { "to": target("http://peer", "/run", "post") }
    ]));

    match deployment
        .call_chain(&runtime, &client, None, MediaType::Json, Some(&json!(null)))
        .await
    {
        Err(Error::NotImplemented(_)) => {}
        other => panic!("Expected unimplemented terminal media type, got {:?}", other),
    }
    assert_eq!(client.sent().len(), 1);
    assert_eq!(client.sent()[0].content_type, "application/json");
    assert!(client.sent()[0].body.is_empty());
}

#[tokio::test]
async fn test_exhausted_deployment_fails_fast() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![]);
    let mut deployment = deployment(json!([{ "to": null }]));

    deployment
        .call_chain(&runtime, &client, None, MediaType::OctetStream, None)
        .await
        .unwrap();
    match deployment
        .call_chain(&runtime, &client, None, MediaType::OctetStream, None)
        .await
    {
        Err(Error::ProgramCounterExceeded { counter: 1, len: 1 }) => {}
        other => panic!("Expected exceeded counter, got {:?}", other),
    }
    assert_eq!(deployment.program_counter, 1);
}

#[tokio::test]
async fn test_get_only_target_is_not_implemented() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![ok_reply("application/octet-stream", b"")]);
    let mut deployment = deployment(json!([
        { "to": target("http://peer", "/status", "get") },
        { "to": null }
    ]));

    match deployment
        .call_chain(&runtime, &client, Some(Value::I32(1)), MediaType::OctetStream, None)
        .await
    {
        Err(Error::NotImplemented(_)) => {}
        other => panic!("Expected unimplemented method, got {:?}", other),
    }
    assert!(client.sent().is_empty());
}

#[tokio::test]
async fn test_failed_hop_stops_the_chain() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![
        Reply {
            status: 500,
            content_type: Some("text/plain".to_string()),
            body: b"boom".to_vec(),
        },
        ok_reply("application/octet-stream", b"never"),
    ]);
    let mut deployment = deployment(json!([
        { "to": target("http://peer", "/run", "post") },
        { "to": target("http://other", "/run", "post") },
        { "to": null }
    ]));

    match deployment
        .call_chain(&runtime, &client, Some(Value::I32(1)), MediaType::OctetStream, None)
        .await
    {
        Err(Error::RequestFailed { status: 500, url }) => assert_eq!(url, "http://peer/run"),
        other => panic!("Expected failed request, got {:?}", other),
    }
    assert_eq!(client.sent().len(), 1);
}

#[tokio::test]
async fn test_json_with_schema_is_not_implemented() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![]);
    let mut deployment = deployment(json!([{ "to": null }]));

    let schema = json!({ "type": "object" });
    match deployment
        .call_chain(&runtime, &client, None, MediaType::Json, Some(&schema))
        .await
    {
        Err(Error::NotImplemented(_)) => {}
        other => panic!("Expected unimplemented schema, got {:?}", other),
    }
    // Parsing failed before the step was taken.
    assert_eq!(deployment.program_counter, 0);
}

const CAMERA: &str = r#"
(module
  (memory (export "memory") 16)
  (func (export "get_img_ptr") (result i32)
    i32.const 4096))
"#;

#[tokio::test]
async fn test_image_is_read_from_guest_and_sent_as_jpeg() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("camera.wasm");
    std::fs::write(&path, wat::parse_str(CAMERA).unwrap()).unwrap();

    let mut rt = Runtime::new(BackendKind::Wasmtime, HostEnv::builder().build()).unwrap();
    rt.load_module(ModuleConfig::new("camera", &path)).unwrap();
    rt.run_function("get_img_ptr", &[]).unwrap();
    rt.write_memory(4096, &vec![200u8; IMAGE_BYTES]).unwrap();
    let runtime = rt.into_shared();

    let client = ScriptedClient::new(vec![ok_reply("application/octet-stream", b"\x00\x07")]);
    let mut deployment = deployment(json!([
        { "to": target("http://ml.local", "/classify", "post") }
    ]));

    let response = deployment
        .call_chain(&runtime, &client, None, MediaType::Jpeg, None)
        .await
        .unwrap();

    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "multipart:data");
    assert_eq!(sent[0].content_type, "image/jpeg");
    assert_eq!(&sent[0].body[..2], &[0xff, 0xd8]);
    assert_eq!(response.body, json!({ "result": [0, 7] }));
}

#[tokio::test]
async fn test_missing_image_function_is_a_runtime_error() {
    let runtime = empty_runtime();
    let client = ScriptedClient::new(vec![]);
    let mut deployment = deployment(json!([{ "to": null }]));

    match deployment
        .call_chain(&runtime, &client, None, MediaType::Jpeg, None)
        .await
    {
        Err(Error::Runtime(_)) => {}
        other => panic!("Expected runtime error, got {:?}", other),
    }
}
