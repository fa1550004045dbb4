use davsync_core::{Credentials, DavClient, DeleteRequest, TransportError};
use wiremock::matchers::{basic_auth, bearer_token, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(path: &str) -> DeleteRequest {
    DeleteRequest {
        path: path.to_string(),
        if_condition: None,
        skip_trashbin: false,
    }
}

#[tokio::test]
async fn delete_sends_basic_auth_and_request_id() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/Docs/A.txt"))
        .and(basic_auth("alice", "secret"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = DavClient::new(
        &server.uri(),
        Credentials::Basic {
            user: "alice".into(),
            password: "secret".into(),
        },
    )
    .unwrap();
    let reply = client.delete(&request("Docs/A.txt")).await.unwrap();

    assert_eq!(reply.status, 204);
    assert_eq!(reply.error, TransportError::None);
    assert!(reply.error_message.is_empty());
    assert!(reply.request_id.is_some());
}

#[tokio::test]
async fn delete_encodes_path_and_uses_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/Docs/Hello%20World.txt"))
        .and(bearer_token("app-token"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = DavClient::new(&server.uri(), Credentials::Bearer("app-token".into())).unwrap();
    let reply = client
        .delete(&request("Docs/Hello World.txt"))
        .await
        .unwrap();

    assert_eq!(reply.status, 204);
}

#[tokio::test]
async fn delete_attaches_lock_condition_and_trashbin_flag() {
    let server = MockServer::start().await;
    let client = DavClient::new(&server.uri(), Credentials::Anonymous).unwrap();
    let condition = client.lock_condition("Docs/A.txt", "tok-1");

    Mock::given(method("DELETE"))
        .and(path("/Docs/A.txt"))
        .and(header("if", condition.as_str()))
        .and(header("x-nc-skip-trashbin", "true"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client
        .delete(&DeleteRequest {
            path: "Docs/A.txt".into(),
            if_condition: Some(condition.clone()),
            skip_trashbin: true,
        })
        .await
        .unwrap();

    assert_eq!(reply.status, 204);
    assert!(condition.ends_with("(<opaquelocktoken:tok-1>)"));
}

#[tokio::test]
async fn delete_without_flags_sends_no_optional_headers() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/A.txt"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = DavClient::new(&server.uri(), Credentials::Anonymous).unwrap();
    client.delete(&request("A.txt")).await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].headers.contains_key("if"));
    assert!(!received[0].headers.contains_key("x-nc-skip-trashbin"));
}

#[tokio::test]
async fn not_found_is_reported_as_content_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/Gone.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = DavClient::new(&server.uri(), Credentials::Anonymous).unwrap();
    let reply = client.delete(&request("Gone.txt")).await.unwrap();

    assert_eq!(reply.status, 404);
    assert_eq!(reply.error, TransportError::ContentNotFound);
    assert!(reply.error.is_success_or_not_found());
}

#[tokio::test]
async fn forbidden_carries_reason_and_message() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/Locked.txt"))
        .respond_with(ResponseTemplate::new(403).set_body_string("no"))
        .mount(&server)
        .await;

    let client = DavClient::new(&server.uri(), Credentials::Anonymous).unwrap();
    let reply = client.delete(&request("Locked.txt")).await.unwrap();

    assert_eq!(reply.error, TransportError::ContentAccessDenied);
    assert_eq!(reply.reason, "Forbidden");
    assert!(reply.error_message.contains("403 Forbidden"));
    assert_eq!(reply.body, "no");
}

#[tokio::test]
async fn server_request_id_and_date_are_captured() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/A.txt"))
        .respond_with(
            ResponseTemplate::new(204)
                .insert_header("X-Request-ID", "server-id-7")
                .insert_header("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
        )
        .mount(&server)
        .await;

    let client = DavClient::new(&server.uri(), Credentials::Anonymous).unwrap();
    let reply = client.delete(&request("A.txt")).await.unwrap();

    assert_eq!(reply.request_id.as_deref(), Some("server-id-7"));
    assert_eq!(reply.response_timestamp, Some(784_111_777));
}

#[tokio::test]
async fn unreachable_server_maps_to_network_error() {
    let client = DavClient::new("http://127.0.0.1:9/", Credentials::Anonymous).unwrap();
    let err = client.delete(&request("A.txt")).await.unwrap_err();

    assert!(err.transport_error().is_network_level());
    let reply = davsync_core::DeleteReply::from_error(&err);
    assert_eq!(reply.status, 0);
    assert!(!reply.error.is_success_or_not_found());
}
