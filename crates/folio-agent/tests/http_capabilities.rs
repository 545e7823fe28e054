use folio_agent::{LlmClient, ModelConfig, SearxSearch, YahooMarketData};
use folio_core::{FolioError, GenerationRequest, MarketDataProvider, SearchProvider, TextGenerator};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn model(server: &MockServer) -> ModelConfig {
    ModelConfig {
        api_key: "test-key".into(),
        api_base_url: Some(server.uri()),
        ..ModelConfig::default()
    }
}

#[tokio::test]
async fn test_llm_client_posts_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Allocate 60% VTI and 40% BND."},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = LlmClient::new(model(&server)).unwrap();
    let text = client
        .generate(&GenerationRequest::new(
            "StrategyDrafter",
            "You draft portfolio strategies.",
            "Risk: Moderate",
        ))
        .await
        .unwrap();
    assert_eq!(text, "Allocate 60% VTI and 40% BND.");
}

#[tokio::test]
async fn test_llm_error_status_is_capability_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(serde_json::json!({"error": "rate limited"})),
        )
        .mount(&server)
        .await;

    let client = LlmClient::new(model(&server)).unwrap();
    let err = client
        .generate(&GenerationRequest::new("RiskCritic_internal", "", "review"))
        .await
        .unwrap_err();
    match err {
        FolioError::Capability(msg) => assert!(msg.contains("429")),
        other => panic!("expected capability error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_yahoo_quote_parses_chart_meta() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/VTI"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "VTI",
                        "currency": "USD",
                        "regularMarketPrice": 250.0,
                        "chartPreviousClose": 248.0
                    }
                }],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    let market = YahooMarketData::new(server.uri()).unwrap();
    let quote = market.quote("vti").await.unwrap();
    assert_eq!(quote.symbol, "VTI");
    assert_eq!(quote.price, 250.0);
    assert!((quote.change - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_yahoo_unknown_symbol_is_capability_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/ZZZZ"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "chart": {"result": null, "error": {"code": "Not Found"}}
        })))
        .mount(&server)
        .await;

    let market = YahooMarketData::new(server.uri()).unwrap();
    let err = market.quote("ZZZZ").await.unwrap_err();
    assert!(matches!(err, FolioError::Capability(_)));
}

#[tokio::test]
async fn test_searx_search_limits_and_maps_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "bond market outlook"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [
                {"title": "Bonds rally", "url": "https://news.example/a", "content": "Yields fell."},
                {"title": "", "url": "https://news.example/b", "content": ""},
                {"title": "Third", "url": "https://news.example/c", "content": "More."}
            ]
        })))
        .mount(&server)
        .await;

    let search = SearxSearch::new(server.uri()).unwrap();
    let hits = search.search("bond market outlook", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].title, "Bonds rally");
    assert_eq!(hits[0].snippet, "Yields fell.");
    assert_eq!(hits[1].title, "https://news.example/b");
}

#[tokio::test]
async fn test_searx_unreachable_is_http_error() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let search = SearxSearch::new(uri).unwrap();
    let err = search.search("anything", 3).await.unwrap_err();
    assert!(matches!(err, FolioError::Http(_)));
}
