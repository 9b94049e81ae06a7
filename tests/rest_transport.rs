use civicrm_client::remote::rest::URL_PATHS;
use civicrm_client::remote::{RemoteCaller, RestCaller, RestConfig, RetryPolicy};
use civicrm_client::{Civi, CiviError, CiviResult, Value, fields};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const ENDPOINT: &str = URL_PATHS[0];

/// Endpoint discovery probe: a bare GET answered with 200.
async fn mount_endpoint(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .with_priority(10)
        .mount(server)
        .await;
}

fn config(server: &MockServer) -> RestConfig {
    RestConfig::new(format!("{}{}", server.uri(), ENDPOINT), "site-key", "api-key")
}

/// Blocking reqwest must not run on the async test runtime.
async fn blocking<T, F>(work: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.expect("blocking task panicked")
}

fn query_of(request: &Request) -> HashMap<String, String> {
    request.url.query_pairs().into_owned().collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn get_calls_send_credentials_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("entity", "Contact"))
        .and(query_param("action", "get"))
        .and(query_param("key", "site-key"))
        .and(query_param("api_key", "api-key"))
        .and(query_param("version", "3"))
        .and(query_param("sequential", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_error": 0,
            "count": 1,
            "values": [{ "id": "5", "display_name": "Ada" }]
        })))
        .mount(&server)
        .await;
    mount_endpoint(&server).await;

    let config = config(&server);
    let reply = blocking(move || -> CiviResult<_> {
        let caller = RestCaller::connect(config)?;
        caller.call("Contact", "get", &fields! { "external_identifier" => "X1" })
    })
    .await
    .expect("call succeeds");

    assert_eq!(reply.count, 1);
    assert_eq!(reply.values[0].get("id").and_then(Value::as_i64), Some(5));

    let requests = server.received_requests().await.expect("recording enabled");
    let call = requests.iter().find(|request| request.url.query().is_some()).expect("api call");
    assert_eq!(query_of(call).get("external_identifier").map(String::as_str), Some("X1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn creates_are_posted_as_forms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .and(body_string_contains("action=create"))
        .and(body_string_contains("first_name=Ada"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_error": 0,
            "count": 1,
            "id": 77,
            "values": [{ "id": "77", "first_name": "Ada" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_endpoint(&server).await;

    let config = config(&server);
    let id = blocking(move || -> CiviResult<_> {
        let civi = Civi::new(RestCaller::connect(config)?);
        let entity = civi.create_entity("Contact", &fields! { "first_name" => "Ada" })?;
        Ok(entity.id())
    })
    .await
    .expect("create succeeds");

    assert_eq!(id, Some(77));
}

#[tokio::test(flavor = "multi_thread")]
async fn overlong_requests_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("entity", "Contact"))
        .respond_with(ResponseTemplate::new(414))
        .mount(&server)
        .await;
    mount_endpoint(&server).await;

    let config = config(&server);
    let result = blocking(move || -> CiviResult<_> {
        RestCaller::connect(config)?.call("Contact", "get", &fields! { "id" => 1 })
    })
    .await;

    assert!(matches!(result, Err(CiviError::RequestTooLong)));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("entity", "Tag"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("entity", "Tag"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_error": 0,
            "count": 1,
            "values": [{ "id": "3", "name": "Donor" }]
        })))
        .with_priority(2)
        .mount(&server)
        .await;
    mount_endpoint(&server).await;

    let config = config(&server);
    let id = blocking(move || -> CiviResult<_> {
        let civi = Civi::rest(config, RetryPolicy::new(3, Duration::from_millis(10)))?;
        civi.get_or_create_tag_id("Donor", None)
    })
    .await
    .expect("third attempt succeeds");
    assert_eq!(id, 3);

    let requests = server.received_requests().await.expect("recording enabled");
    let tag_calls = requests
        .iter()
        .filter(|request| query_of(request).get("entity").map(String::as_str) == Some("Tag"))
        .count();
    assert_eq!(tag_calls, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_without_retries_fail_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("entity", "Tag"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;
    mount_endpoint(&server).await;

    let config = config(&server);
    let result = blocking(move || -> CiviResult<_> {
        let civi = Civi::rest(config, RetryPolicy::new(0, Duration::ZERO))?;
        civi.get_or_create_tag_id("Donor", None)
    })
    .await;

    match result {
        Err(err) => {
            assert_eq!(err.status_code(), Some(500));
            assert!(err.is_transport());
        }
        Ok(id) => panic!("expected a status error, got tag {id}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn api_errors_become_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("entity", "Contact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_error": 1,
            "error_message": "Invalid value for contact_type",
            "error_code": "incorrect_value"
        })))
        .mount(&server)
        .await;
    mount_endpoint(&server).await;

    let config = config(&server);
    let result = blocking(move || -> CiviResult<_> {
        let civi = Civi::new(RestCaller::connect(config)?);
        civi.get_entity("Contact", &fields! { "id" => 1 }, &["id"]).map(|found| found.is_some())
    })
    .await;

    match result {
        Err(CiviError::Api { message, code }) => {
            assert_eq!(message, "Invalid value for contact_type");
            assert_eq!(code.as_deref(), Some("incorrect_value"));
        }
        other => panic!("expected an API error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn json_params_pack_everything_but_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("entity", "Membership"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "is_error": 0, "count": 0, "values": [] })))
        .mount(&server)
        .await;
    mount_endpoint(&server).await;

    let mut config = config(&server);
    config.json_params = true;
    blocking(move || -> CiviResult<_> {
        RestCaller::connect(config)?.call("Membership", "get", &fields! { "contact_id" => 5 })
    })
    .await
    .expect("call succeeds");

    let requests = server.received_requests().await.expect("recording enabled");
    let call = requests.iter().find(|request| request.url.query().is_some()).expect("api call");
    let query = query_of(call);
    assert_eq!(query.get("api_key").map(String::as_str), Some("api-key"));
    assert_eq!(query.get("action").map(String::as_str), Some("get"));
    assert!(!query.contains_key("contact_id"));

    let packed: serde_json::Value = serde_json::from_str(&query["json"]).expect("packed json");
    assert_eq!(packed["contact_id"], json!(5));
    assert_eq!(packed["version"], json!(3));
    assert!(packed.get("api_key").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_lists_every_rejected_candidate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let site = format!("{}/civicrm/", server.uri());
    let result = blocking(move || RestCaller::connect(RestConfig::new(site, "site-key", "api-key")).map(|_| ())).await;

    match result {
        Err(CiviError::Unreachable { attempts }) => {
            assert_eq!(attempts.len(), URL_PATHS.len() + 1);
            assert!(attempts[0].contains("Error code was: 404"));
            assert!(attempts.last().is_some_and(|hint| hint.contains("Extern URL Style")));
        }
        other => panic!("expected discovery to fail, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn forbidden_endpoint_still_counts_as_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(URL_PATHS[1]))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(10)
        .mount(&server)
        .await;

    let site = server.uri();
    let endpoint = blocking(move || -> CiviResult<_> {
        Ok(RestCaller::connect(RestConfig::new(site, "site-key", "api-key"))?.endpoint().to_string())
    })
    .await
    .expect("second candidate accepted");

    assert!(endpoint.ends_with(URL_PATHS[1]));
}
