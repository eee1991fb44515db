//! The OpenAI-compatible provider against a mock chat-completions server.

use reviewd::diff::chunker::{chunk_files, Chunk, ChunkerConfig};
use reviewd::diff::parser;
use reviewd::llm::openai::OpenAiProvider;
use reviewd::llm::{LlmProvider, RagContext};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn ts_chunk() -> Chunk {
    let diff = parser::parse(
        "diff --git a/src/app.ts b/src/app.ts\n--- a/src/app.ts\n+++ b/src/app.ts\n@@ -1,1 +1,2 @@\n ctx\n+const token = req.query.token;\n",
    )
    .expect("parse");
    chunk_files(diff.files, &ChunkerConfig::default())
        .into_iter()
        .next()
        .expect("one chunk")
}

#[tokio::test]
async fn issues_round_trip_through_the_chat_api() {
    let server = MockServer::start().await;
    let completion = json!({
        "model": "gpt-4o-2024-08-06",
        "choices": [{
            "message": {
                "role": "assistant",
                "content": "```json\n{\"issues\":[{\"category\":\"security\",\"subtype\":\"secret-in-url\",\"severity\":\"medium\",\"confidence\":0.8,\"file_path\":\"src/app.ts\",\"line_start\":2,\"line_end\":2,\"message\":\"Token is read from the query string and may be logged.\",\"evidence\":\"const token = req.query.token;\"}]}\n```"
            }
        }],
        "usage": {"total_tokens": 321}
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(
        "local",
        Some(server.uri()),
        None,
        None,
        "test-model".to_string(),
        1024,
    );
    let analysis = provider
        .analyze(&ts_chunk(), &RagContext::default(), "Add token", "")
        .await
        .expect("analysis");

    assert_eq!(analysis.model, "gpt-4o-2024-08-06");
    assert_eq!(analysis.tokens_used, 321);
    assert_eq!(analysis.issues.len(), 1);
    let issue = &analysis.issues[0];
    assert_eq!(issue.file_path, "src/app.ts");
    assert_eq!(issue.source_tool.as_deref(), Some("llm-local"));
    assert!(issue.is_llm_generated);
}

#[tokio::test]
async fn request_carries_system_and_fenced_user_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(move |req: &Request| {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let messages = body["messages"].as_array().unwrap();
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0]["role"], "system");
            let user = messages[1]["content"].as_str().unwrap();
            assert!(user.contains("<<<DIFF_START untrusted>>>"));
            assert!(user.contains("Files: src/app.ts"));
            ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"issues\": []}"}}],
                "usage": {"total_tokens": 10}
            }))
        })
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(
        "local",
        Some(server.uri()),
        None,
        None,
        "test-model".to_string(),
        1024,
    );
    let analysis = provider
        .analyze(&ts_chunk(), &RagContext::default(), "title", "body")
        .await
        .expect("analysis");
    assert!(analysis.issues.is_empty());
}

#[tokio::test]
async fn unparseable_completion_yields_zero_issues_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "I am unable to review this code."}}],
            "usage": {"total_tokens": 5}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(
        "local",
        Some(server.uri()),
        None,
        None,
        "test-model".to_string(),
        1024,
    );
    let analysis = provider
        .analyze(&ts_chunk(), &RagContext::default(), "t", "")
        .await
        .expect("no transport error");
    assert!(analysis.issues.is_empty());
}
