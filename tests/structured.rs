//! End-to-end tests for structured and free-text requests against a
//! scripted transport

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use sonar_research::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, ChatTransport, Choice,
    EventInfo, MarketInfo, RequestOptions, ResponseMessage, SonarClient, SonarConfig, SonarError,
    SonarResult,
};

#[derive(Debug, Deserialize, JsonSchema)]
struct PriceEstimate {
    price: f64,
}

/// Transport that replays a scripted sequence of replies and records every
/// request it receives
struct ScriptedTransport {
    replies: Mutex<VecDeque<SonarResult<ChatCompletionResponse>>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<SonarResult<ChatCompletionResponse>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn first_request(&self) -> ChatCompletionRequest {
        self.requests.lock().unwrap()[0].clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn chat(&self, request: &ChatCompletionRequest) -> SonarResult<ChatCompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted transport ran out of replies")
    }
}

fn reply(content: &str) -> SonarResult<ChatCompletionResponse> {
    Ok(ChatCompletionResponse {
        choices: vec![Choice {
            message: ResponseMessage {
                content: content.to_string(),
            },
        }],
        citations: vec![],
    })
}

fn reply_with_citations(content: &str, citations: &[&str]) -> SonarResult<ChatCompletionResponse> {
    Ok(ChatCompletionResponse {
        choices: vec![Choice {
            message: ResponseMessage {
                content: content.to_string(),
            },
        }],
        citations: citations.iter().map(|c| c.to_string()).collect(),
    })
}

fn client(transport: Arc<ScriptedTransport>) -> SonarClient {
    SonarClient::with_transport(transport, SonarConfig::new("test-key"))
}

#[tokio::test]
async fn structured_request_parses_fenced_json() {
    let transport = ScriptedTransport::new(vec![reply("```json\n{\"price\": 42.5}\n```")]);
    let client = client(transport.clone());

    let result: PriceEstimate = client
        .request_structured(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await
        .unwrap();

    assert_eq!(result.price, 42.5);
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn structured_request_prepends_schema_instruction() {
    let transport = ScriptedTransport::new(vec![reply("{\"price\": 1.0}")]);
    let client = client(transport.clone());

    let _: PriceEstimate = client
        .request_structured(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await
        .unwrap();

    let request = transport.first_request();
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[0].role, ChatRole::System);
    assert!(request.messages[0].content.contains("price"));
    assert!(request.messages[0].content.contains("no markdown"));
    assert_eq!(request.messages[1].content, "price of X?");
    assert_eq!(request.model, "sonar-pro");
    assert!(!request.return_citations);
}

#[tokio::test]
async fn empty_response_fails_without_retry() {
    let transport = ScriptedTransport::new(vec![reply("")]);
    let client = client(transport.clone());

    let result = client
        .request_structured::<PriceEstimate>(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await;

    assert!(matches!(result, Err(SonarError::EmptyResponse)));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn incomplete_response_retries_then_succeeds() {
    let transport = ScriptedTransport::new(vec![
        reply("Let me search for that information"),
        reply("{\"price\": 42.5}"),
    ]);
    let client = client(transport.clone());

    let result: PriceEstimate = client
        .request_structured(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await
        .unwrap();

    assert_eq!(result.price, 42.5);
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn incomplete_response_exhausts_after_three_attempts() {
    let transport = ScriptedTransport::new(vec![
        reply("Let me search for that information"),
        reply("Searching for the latest data"),
        reply("I will search the web now"),
    ]);
    let client = client(transport.clone());

    let result = client
        .request_structured::<PriceEstimate>(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await;

    assert!(matches!(
        result,
        Err(SonarError::IncompleteResponse { attempts: 3 })
    ));
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test]
async fn upstream_error_surfaces_without_retry() {
    let transport = ScriptedTransport::new(vec![Err(SonarError::Api {
        status: 500,
        body: "internal error".to_string(),
    })]);
    let client = client(transport.clone());

    let result = client
        .request_structured::<PriceEstimate>(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await;

    assert!(matches!(result, Err(SonarError::Api { status: 500, .. })));
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn schema_mismatch_fails_validation_with_offending_value() {
    let transport = ScriptedTransport::new(vec![reply("{\"price\": \"forty\"}")]);
    let client = client(transport.clone());

    let result = client
        .request_structured::<PriceEstimate>(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await;

    match result {
        Err(SonarError::SchemaValidation { value, .. }) => {
            assert_eq!(value["price"], "forty");
        }
        other => panic!("expected SchemaValidation, got {:?}", other.map(|r| r.price)),
    }
}

#[tokio::test]
async fn unrecoverable_response_fails_extraction_with_snippet() {
    let transport = ScriptedTransport::new(vec![reply("The price is around forty dollars.")]);
    let client = client(transport.clone());

    let result = client
        .request_structured::<PriceEstimate>(
            vec![ChatMessage::user("price of X?")],
            RequestOptions::structured(),
        )
        .await;

    match result {
        Err(SonarError::Extraction { snippet }) => {
            assert!(snippet.contains("around forty"));
        }
        other => panic!("expected Extraction, got {:?}", other.map(|r| r.price)),
    }
}

#[tokio::test]
async fn text_request_returns_raw_content() {
    let transport =
        ScriptedTransport::new(vec![reply("<think>reasoning</think>The price is $42.50")]);
    let client = client(transport.clone());

    let result = client
        .request_text(vec![ChatMessage::user("price of X?")], RequestOptions::text())
        .await
        .unwrap();

    // Free-text mode performs no sanitization
    assert_eq!(result, "<think>reasoning</think>The price is $42.50");

    let request = transport.first_request();
    assert_eq!(request.model, "sonar-reasoning");
    assert_eq!(request.messages.len(), 1);
}

#[tokio::test]
async fn text_request_empty_content_is_an_error() {
    let transport = ScriptedTransport::new(vec![reply("")]);
    let client = client(transport.clone());

    let result = client
        .request_text(vec![ChatMessage::user("price of X?")], RequestOptions::text())
        .await;

    assert!(matches!(result, Err(SonarError::EmptyResponse)));
}

#[tokio::test]
async fn research_event_appends_citations() {
    let transport = ScriptedTransport::new(vec![reply_with_citations(
        "The Fed is expected to cut rates.",
        &["https://example.com/fed"],
    )]);
    let client = client(transport.clone());

    let event = EventInfo {
        event_ticker: "FED-25DEC".to_string(),
        title: "Fed decision in December?".to_string(),
        subtitle: String::new(),
        mutually_exclusive: true,
    };
    let markets = [MarketInfo {
        ticker: "FED-25DEC-C25".to_string(),
        title: "Cut by 25bps?".to_string(),
        subtitle: None,
        open_time: None,
        close_time: None,
        volume: 5000.0,
    }];

    let result = client.research_event(&event, &markets).await.unwrap();

    assert!(result.starts_with("The Fed is expected to cut rates."));
    assert!(result.contains("**Sources:**"));
    assert!(result.contains("1. https://example.com/fed"));

    let request = transport.first_request();
    assert!(request.return_citations);
    assert_eq!(request.messages[0].role, ChatRole::System);
    assert!(request.messages[1].content.contains("Cut by 25bps?"));
}
