//! End-to-end pipeline tests over mock ports.
//!
//! These exercise the full flow (query generation → search → geo
//! validation → prefilter → classification → expansion → price
//! extraction) in both execution modes, without any real backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use discovery::testing::{MockCrawlService, MockLanguageModel};
use discovery::{
    ContentCache, ContentCacheConfig, Degradation, DiscoveryEngine, DiscoveryRequest,
    EngineConfig, JobStage, MemoryKeyValueCache, MemoryPageRepository, MockSearcher, PageContent,
    PipelineScheduler, SchedulerConfig, SearchHit,
};

const PRODUCT_1: &str = "https://tienda.com.uy/producto/111111";
const PRODUCT_2: &str = "https://compumouse.com.uy/p/222222";
const PRODUCT_3: &str = "https://tienda.com.uy/producto/333333-mouse-genius";
const CATEGORY: &str = "https://tienda.com.uy/computacion/mouse";
const FOREIGN: &str = "https://plazavea.com.pe/p/999999";

/// A model scripted for the whole happy path: query generation, geo
/// validation, refinement, classification, and per-URL prices.
fn happy_model() -> MockLanguageModel {
    MockLanguageModel::new()
        .with_response(
            "search query generator",
            json!([
                "comprar mouse inalambrico uruguay",
                "mouse inalambrico precio montevideo",
                "oferta mouse inalambrico uruguay",
                "tienda mouse online uruguay",
                "mouse inalambrico gamer uruguay",
            ]),
        )
        .with_response("STRICT URL classifier", json!([]))
        .with_response(
            "search query optimizer",
            json!(["comprar mouse inalambrico uruguay tienda"]),
        )
        .with_response(
            CATEGORY,
            json!({
                "page_type": "CATEGORY",
                "confidence": 0.9,
                "category_name": "Mouse",
                "reasoning": "Lists multiple mouse products"
            }),
        )
        .with_response(
            "EXCLUDE_NON_LOCAL",
            json!({
                "page_type": "PRODUCT",
                "confidence": 0.9,
                "reasoning": "Individual product page"
            }),
        )
        .with_response(
            "producto/111111",
            json!({"price": 1290.0, "currency": "UYU", "availability": "in_stock"}),
        )
        .with_response(
            "p/222222",
            json!({"price": 890.0, "currency": "UYU", "availability": "in_stock"}),
        )
        .with_response(
            "producto/333333",
            json!({"price": 1590.0, "currency": "UYU", "availability": "unknown"}),
        )
}

fn happy_searcher() -> MockSearcher {
    MockSearcher::new()
        .with_hits(
            "comprar mouse inalambrico uruguay",
            vec![
                SearchHit::new(PRODUCT_1)
                    .with_title("Mouse Logitech M185 inalámbrico")
                    .with_description("Mouse inalámbrico con receptor USB"),
                SearchHit::new(CATEGORY)
                    .with_title("Mouse — Computación")
                    .with_description("Listado de mouse y accesorios"),
            ],
        )
        .with_hits(
            "mouse inalambrico precio montevideo",
            vec![
                SearchHit::new(PRODUCT_2)
                    .with_title("Mouse Genius NX-7000")
                    .with_description("Mouse inalámbrico económico"),
                SearchHit::new(FOREIGN)
                    .with_title("Mouse inalámbrico")
                    .with_description("Envíos a todo Perú"),
            ],
        )
}

fn happy_crawler() -> MockCrawlService {
    MockCrawlService::new()
        .with_content(
            CATEGORY,
            PageContent::new("<a href=\"/producto/333333-mouse-genius\">Mouse Genius</a>")
                .with_title("Mouse — Computación"),
        )
        .with_content(
            PRODUCT_1,
            PageContent::new("Mouse Logitech M185 — $U 1.290 — en stock"),
        )
        .with_content(
            PRODUCT_2,
            PageContent::new("Mouse Genius NX-7000 — $U 890 — en stock"),
        )
        .with_content(
            PRODUCT_3,
            PageContent::new("Mouse Genius — $U 1.590"),
        )
}

fn build_engine(
    model: MockLanguageModel,
    searcher: MockSearcher,
    crawler: MockCrawlService,
) -> DiscoveryEngine {
    let cache = Arc::new(ContentCache::new(
        Arc::new(MemoryKeyValueCache::new()),
        Arc::new(MemoryPageRepository::new()),
        Arc::new(crawler),
        ContentCacheConfig::default(),
    ));
    DiscoveryEngine::new(
        Arc::new(model),
        Arc::new(searcher),
        cache,
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn test_full_discovery_happy_path() {
    let engine = build_engine(happy_model(), happy_searcher(), happy_crawler());
    let request = DiscoveryRequest::new("wireless mouse").with_country("UY");

    let response = engine.run(&request).await.unwrap();

    assert!(response.success);
    assert_eq!(response.query, "wireless mouse");
    assert_eq!(response.generated_queries.len(), 5);
    assert_eq!(response.search_results_count, 4);
    assert_eq!(response.unique_urls_found, 4);
    // Three .com.uy URLs validated; the Peruvian domain rejected
    assert_eq!(response.geographic_validated_urls, 3);
    assert!(response.validation_retry_count <= 3);
    assert!(response.crawl_triggered);
    assert!(response.degradations.is_empty());

    // Two direct products plus one recovered by category expansion,
    // ranked by ascending price
    assert_eq!(response.product_page_candidates.len(), 3);
    let prices: Vec<Option<f64>> = response
        .product_page_candidates
        .iter()
        .map(|e| e.price)
        .collect();
    assert_eq!(prices, vec![Some(890.0), Some(1290.0), Some(1590.0)]);
    assert!(response
        .product_page_candidates
        .iter()
        .all(|e| e.classification == "product"));
    assert!(response
        .product_page_candidates
        .iter()
        .all(|e| e.validation_method == "domain_pattern"));
    assert!(!response
        .product_page_candidates
        .iter()
        .any(|e| e.url == FOREIGN));
}

#[tokio::test]
async fn test_repeat_run_hits_cache() {
    let crawler = happy_crawler();
    let crawl_calls = crawler.call_count();
    let engine = build_engine(happy_model(), happy_searcher(), crawler);
    let request = DiscoveryRequest::new("wireless mouse");

    engine.run(&request).await.unwrap();
    let calls_after_first = crawl_calls.load(std::sync::atomic::Ordering::SeqCst);

    let response = engine.run(&request).await.unwrap();
    // Same URLs, same content: everything served from cache, no new
    // crawl batches
    assert_eq!(
        crawl_calls.load(std::sync::atomic::Ordering::SeqCst),
        calls_after_first
    );
    assert!(!response.crawl_triggered);
    assert_eq!(response.product_page_candidates.len(), 3);
}

#[tokio::test]
async fn test_model_outage_degrades_to_fallback() {
    // Every model call errors: raw-phrase query, pattern-only geo
    // validation, unknown classification — and still a non-error result
    let searcher = MockSearcher::new().with_hits(
        "wireless mouse",
        vec![SearchHit::new(PRODUCT_1)
            .with_title("Mouse Logitech")
            .with_description("Mouse inalámbrico")],
    );
    let engine = build_engine(
        MockLanguageModel::new().fail_all(),
        searcher,
        happy_crawler(),
    );

    let response = engine
        .run(&DiscoveryRequest::new("wireless mouse"))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.generated_queries, vec!["wireless mouse".to_string()]);
    assert!(response.degradations.contains(&Degradation::QueryFallback));
    assert_eq!(response.geographic_validated_urls, 1);
    // No model confirmation anywhere: every entry is marked fallback
    assert!(response
        .product_page_candidates
        .iter()
        .all(|e| e.validation_method == "fallback"));
    // The classifier could not label the page; it stays as unresolved
    assert!(response
        .product_page_candidates
        .iter()
        .all(|e| e.classification == "unknown"));
}

#[tokio::test]
async fn test_partial_crawl_failure_keeps_candidate() {
    let model = MockLanguageModel::new()
        .with_response("search query generator", json!(["comprar mouse uruguay"]))
        .with_response("STRICT URL classifier", json!([]))
        .with_response("search query optimizer", json!(["comprar mouse uruguay tienda"]))
        .with_response(
            "EXCLUDE_NON_LOCAL",
            json!({"page_type": "PRODUCT", "confidence": 0.8}),
        )
        .with_response(
            "producto/111111",
            json!({"price": 450.0, "currency": "UYU", "availability": "in_stock"}),
        );
    let searcher = MockSearcher::new().with_hits(
        "comprar mouse uruguay",
        vec![
            SearchHit::new(PRODUCT_1)
                .with_title("Mouse A")
                .with_description("desc"),
            SearchHit::new("https://down.com.uy/producto/666666")
                .with_title("Mouse B")
                .with_description("desc"),
        ],
    );
    let crawler = MockCrawlService::new()
        .with_content(PRODUCT_1, PageContent::new("Mouse A $U 450"))
        .fail_url("https://down.com.uy/producto/666666");

    let engine = build_engine(model, searcher, crawler);
    let response = engine
        .run(&DiscoveryRequest::new("wireless mouse"))
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.product_page_candidates.len(), 2);
    // Priced candidate first; the unfetchable page survives as
    // price_unknown and ranks last
    assert_eq!(response.product_page_candidates[0].price, Some(450.0));
    assert_eq!(response.product_page_candidates[1].price, None);
    assert!(response
        .degradations
        .contains(&Degradation::CrawlPartial { missing: 1 }));
}

#[tokio::test]
async fn test_pipeline_mode_batch_and_metrics() {
    let engine = Arc::new(build_engine(happy_model(), happy_searcher(), happy_crawler()));
    let scheduler = PipelineScheduler::new(engine, SchedulerConfig::default());
    scheduler.start().await;

    let handles = scheduler
        .submit_batch(vec![
            DiscoveryRequest::new("wireless mouse"),
            DiscoveryRequest::new("wireless mouse"),
        ])
        .await;
    assert_eq!(handles.len(), 2);

    for handle in handles {
        let id = handle.unwrap();
        let outcome = scheduler
            .await_result(id, Duration::from_secs(15))
            .await
            .expect("job should complete");
        assert_eq!(outcome.stage, JobStage::Completed);
        let response = outcome.response.unwrap();
        assert_eq!(response.product_page_candidates.len(), 3);
    }

    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.jobs_submitted, 2);
    assert_eq!(metrics.jobs_completed, 2);
    assert_eq!(metrics.jobs_failed, 0);
    assert_eq!(metrics.jobs_active, 0);
    assert!(metrics.queue_depths.contains_key("search"));
    assert!(metrics.queue_depths.contains_key("price"));
    assert!(metrics.running);

    scheduler.shutdown().await;
    assert!(!scheduler.metrics().await.running);
}

#[tokio::test]
async fn test_pipeline_mode_failure_is_recorded() {
    let engine = Arc::new(build_engine(
        MockLanguageModel::new().fail_all(),
        MockSearcher::new().fail_all(),
        MockCrawlService::new(),
    ));
    let scheduler = PipelineScheduler::new(engine, SchedulerConfig::default());
    scheduler.start().await;

    let id = scheduler
        .submit(DiscoveryRequest::new("wireless mouse"))
        .await
        .unwrap();
    let outcome = scheduler
        .await_result(id, Duration::from_secs(15))
        .await
        .expect("job should reach a terminal state");

    assert_eq!(outcome.stage, JobStage::Failed);
    assert!(outcome.error.is_some());
    assert_eq!(scheduler.metrics().await.jobs_failed, 1);

    scheduler.shutdown().await;
}
