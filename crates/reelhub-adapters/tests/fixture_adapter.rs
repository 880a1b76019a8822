use reelhub_adapters::{adapter_for_kind, AdapterError, PageContext};
use reelhub_core::{AdapterKind, PaginationPolicy, SourceDefinition};
use reelhub_storage::{HttpClientConfig, HttpFetcher};
use uuid::Uuid;

fn fixture_source(base: &str) -> SourceDefinition {
    SourceDefinition {
        name: "captured-anime".into(),
        category: "anime".into(),
        adapter: AdapterKind::Fixture,
        endpoints: vec![base.to_string()],
        min_items: None,
        enabled: true,
        pagination: PaginationPolicy {
            max_pages: 3,
            template: Some("{base}.{page}".into()),
            page_size: None,
        },
        selectors: None,
        items_pointer: Some("/results".into()),
    }
}

#[tokio::test]
async fn fixture_pages_load_and_missing_later_pages_are_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("page.json");
    std::fs::write(
        &base,
        r#"{"results":[{"id":"a1","title":"First"},{"id":"a2","title":"Second"}]}"#,
    )
    .unwrap();
    let base = format!("file://{}", base.display());

    let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
    let source = fixture_source(&base);
    let adapter = adapter_for_kind(AdapterKind::Fixture);
    let run_id = Uuid::new_v4();

    let page1 = adapter
        .fetch(&http, &source, &PageContext::new(run_id, &source, &base, 1))
        .await
        .expect("first page");
    assert_eq!(page1.len(), 2);
    assert_eq!(page1[1].title.as_deref(), Some("Second"));

    let page2 = adapter
        .fetch(&http, &source, &PageContext::new(run_id, &source, &base, 2))
        .await
        .expect("second page");
    assert!(page2.is_empty());
}

#[tokio::test]
async fn missing_first_fixture_page_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path().join("absent.json").display().to_string();

    let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
    let source = fixture_source(&base);
    let err = adapter_for_kind(AdapterKind::Fixture)
        .fetch(&http, &source, &PageContext::new(Uuid::new_v4(), &source, &base, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Fixture { .. }));
}
