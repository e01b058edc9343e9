//! Upstream fetch API client against a mock server.

use execute_sync::config::UpstreamConfig;
use execute_sync::cursor::SyncCursor;
use execute_sync::schema::FieldType;
use execute_sync::upstream::{HIGHWATER_HEADER, TRUNCATED_HEADER, UpstreamClient};
use wiremock::matchers::{basic_auth, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, include_calcs: bool) -> UpstreamClient {
    UpstreamClient::new(UpstreamConfig {
        url: server.uri(),
        key_id: "key-id".into(),
        key_secret: "key-secret".into(),
        max_documents: 25,
        include_calcs,
        timeout_secs: 5,
    })
    .unwrap()
}

#[tokio::test]
async fn fetch_page_sends_auth_and_paging_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fetch/document/"))
        .and(basic_auth("key-id", "key-secret"))
        .and(query_param("limit", "25"))
        .and(query_param("since", "1900-01-01"))
        .and(query_param_is_missing("calc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(HIGHWATER_HEADER, "2024-05-01T10:00:00Z")
                .insert_header(TRUNCATED_HEADER, "TRUE")
                .set_body_string("{\"A\":1}\n{\"A\":2}\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut page = client(&server, false)
        .fetch_page(&SyncCursor::beginning())
        .await
        .unwrap();

    assert_eq!(page.next_cursor.as_str(), "2024-05-01T10:00:00Z");
    assert!(page.truncated);
    assert_eq!(page.next_line().await.unwrap().as_deref(), Some("{\"A\":1}"));
    assert_eq!(page.next_line().await.unwrap().as_deref(), Some("{\"A\":2}"));
    assert_eq!(page.next_line().await.unwrap(), None);
}

#[tokio::test]
async fn fetch_page_requests_calculated_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fetch/document/"))
        .and(query_param("calc", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(HIGHWATER_HEADER, "c1")
                .insert_header(TRUNCATED_HEADER, "false"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut page = client(&server, true)
        .fetch_page(&SyncCursor::new("c0"))
        .await
        .unwrap();

    assert!(!page.truncated);
    assert!(page.next_batch(1024).await.unwrap().is_empty());
}

#[tokio::test]
async fn large_body_is_read_in_bounded_batches() {
    let server = MockServer::start().await;
    let line = format!("{{\"PAD\":\"{}\"}}", "x".repeat(1000));
    let body = vec![line.as_str(); 50].join("\n");
    Mock::given(method("GET"))
        .and(path("/fetch/document/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(HIGHWATER_HEADER, "c1")
                .set_body_string(body.clone()),
        )
        .mount(&server)
        .await;

    let mut page = client(&server, false)
        .fetch_page(&SyncCursor::beginning())
        .await
        .unwrap();

    let mut batches = Vec::new();
    loop {
        let lines = page.next_batch(10 * line.len()).await.unwrap();
        if lines.is_empty() {
            break;
        }
        batches.push(lines.len());
    }

    assert_eq!(batches, vec![10, 10, 10, 10, 10]);
    assert_eq!(page.bytes_read(), body.len());
}

#[tokio::test]
async fn non_success_status_is_an_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fetch/document/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server, false)
        .fetch_page(&SyncCursor::beginning())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "UPSTREAM_STATUS");
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn missing_highwater_mark_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fetch/document/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"A\":1}\n"))
        .mount(&server)
        .await;

    let err = client(&server, false)
        .fetch_page(&SyncCursor::beginning())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "UPSTREAM_ERROR");
}

#[tokio::test]
async fn fetch_schema_parses_root_schema() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fetch/document/schema"))
        .and(basic_auth("key-id", "key-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"Well": {
                "NAME": {"NAME": "NAME", "ACTIVE": true, "TYPE": "TEXT", "NULLABLE": true},
                "OLD": {"NAME": "OLD", "ACTIVE": false, "TYPE": "TEXT", "NULLABLE": true}
            }}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let schema = client(&server, false).fetch_schema().await.unwrap();
    let well = schema.get("Well").unwrap();

    assert_eq!(well.get("NAME").unwrap().field_type, FieldType::Text);
    assert!(well.get("OLD").is_some());
    assert!(schema.without_inactive().get("Well").unwrap().get("OLD").is_none());
}
