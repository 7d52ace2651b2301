use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::*;
use crate::message::{BodyReader, Exchange};

type Response = Arc<Mutex<BufferedResponse>>;

fn destination(observer: Arc<dyn MessageObserver>) -> HttpDestination {
    HttpDestination::new("test-destination", "/svc", ServerPolicy::default(), observer)
}

async fn invoke(destination: &HttpDestination, mut request: BufferedRequest) -> (Result<InvokeOutcome>, Response) {
    let response = BufferedResponse::shared();
    let outcome = destination.invoke(&mut request, response.clone()).await;
    (outcome, response)
}

/// Keeps every delivered message for inspection.
#[derive(Default)]
struct Capture {
    messages: StdMutex<Vec<Message>>,
}

impl Capture {
    fn take(&self) -> Message {
        self.messages.lock().unwrap().pop().expect("no message delivered")
    }

    fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageObserver for Capture {
    async fn on_message(&self, message: Message) -> Delivery {
        self.messages.lock().unwrap().push(message);
        Delivery::Completed
    }
}

/// Answers with the request body.
struct Echo;

#[async_trait]
impl MessageObserver for Echo {
    async fn on_message(&self, mut message: Message) -> Delivery {
        let body = message.body.as_mut().unwrap().read_to_end().await.unwrap();
        let destination = message.destination.clone().unwrap();
        let mut channel = destination.back_channel(message);
        let mut out = channel.create_out_message();
        out.content_type = Some("text/plain".to_string());
        channel.write(&mut out, body).await.unwrap();
        channel.close(&mut out).await.unwrap();
        Delivery::Completed
    }
}

/// Suspends the first delivery of every request and completes the next.
#[derive(Default)]
struct SuspendOnce {
    deliveries: AtomicUsize,
    ids: StdMutex<Vec<uuid::Uuid>>,
}

#[async_trait]
impl MessageObserver for SuspendOnce {
    async fn on_message(&self, message: Message) -> Delivery {
        self.ids.lock().unwrap().push(message.id);
        if self.deliveries.fetch_add(1, Ordering::SeqCst) == 0 {
            message.continuation.as_ref().unwrap().suspend(None);
            Delivery::Suspended(message)
        } else {
            Delivery::Completed
        }
    }
}

fn inbound(oneway: bool, partial: bool, empty_partial: bool) -> Message {
    let mut message = Message::new();
    message.exchange = Some(if oneway {
        Exchange::builder().oneway().build()
    } else {
        Exchange::new()
    });
    message.partial_response = partial;
    message.empty_partial_response = empty_partial;
    message
}

fn out_for(response: &Response, exchange: Exchange) -> Message {
    let mut out = Message::new();
    out.exchange = Some(exchange);
    let shared: SharedResponse = response.clone();
    out.http_response = Some(shared);
    out
}

#[tokio::test]
async fn builds_message_from_request() {
    let capture = Arc::new(Capture::default());
    let destination = destination(capture.clone());
    let request = BufferedRequest::new("POST", "/svc/orders/7?verbose=true")
        .with_header("Host", "shop.example")
        .with_header("Content-Type", "text/xml; charset=latin1")
        .with_header("Accept", "text/xml")
        .with_header("X-Trace", "a")
        .with_header("X-Trace", "b")
        .with_header("Authorization", "Basic ZGF2ZTpzZWNyZXQ=")
        .with_principal("dave")
        .with_body("<order/>");

    let (outcome, _) = invoke(&destination, request).await;
    assert!(matches!(outcome.unwrap(), InvokeOutcome::Completed));

    let mut message = capture.take();
    assert_eq!(message.method.as_deref(), Some("POST"));
    assert_eq!(message.request_uri.as_deref(), Some("/svc/orders/7"));
    assert_eq!(message.path_info.as_deref(), Some("/orders/7"));
    assert_eq!(message.query_string.as_deref(), Some("verbose=true"));
    assert_eq!(message.endpoint_address.as_deref(), Some("http://shop.example/svc/orders/7"));
    assert_eq!(message.base_path.as_deref(), Some("/svc"));
    assert_eq!(message.encoding.as_deref(), Some("ISO-8859-1"));
    assert_eq!(message.accept.as_deref(), Some("text/xml"));
    assert_eq!(message.user_principal.as_deref(), Some("dave"));

    let policy = message.authorization_policy.clone().unwrap();
    assert_eq!(policy.user_name.as_deref(), Some("dave"));
    assert_eq!(policy.password.as_deref(), Some("secret"));
    assert_eq!(policy.authorization_type.as_deref(), Some("Basic"));

    let headers = message.headers.as_ref().unwrap();
    assert_eq!(headers.get("X-Trace").unwrap(), &["a".to_string(), "b".to_string()]);

    let body = message.body.as_mut().unwrap().read_to_end().await.unwrap();
    assert_eq!(&body[..], b"<order/>");
    assert!(message.destination.is_some());
    assert_eq!(
        message.continuation.as_ref().unwrap().state(),
        ContinuationState::Completed
    );
}

#[tokio::test]
async fn unsupported_charset_is_rejected() {
    let capture = Arc::new(Capture::default());
    let destination = destination(capture.clone());
    let request = BufferedRequest::new("POST", "/svc").with_header("Content-Type", "text/plain; charset=klingon");

    let (outcome, _) = invoke(&destination, request).await;
    match outcome {
        Err(TransportError::InvalidEncoding { charset }) => assert_eq!(charset, "klingon"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(capture.count(), 0);
}

#[tokio::test]
async fn echo_answers_with_status_200() {
    let destination = destination(Arc::new(Echo));
    let request = BufferedRequest::new("POST", "/svc/echo").with_body("ping");

    let (outcome, response) = invoke(&destination, request).await;
    assert!(matches!(outcome.unwrap(), InvokeOutcome::Completed));

    let response = response.lock().await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), b"ping");
    assert_eq!(response.header("content-type"), Some("text/plain; charset=UTF-8"));
    assert!(response.is_closed());
}

#[test]
fn no_response_content_truth_table() {
    let cases = [
        // oneway, partial, empty_partial, expected
        (false, false, false, false),
        (false, false, true, true),
        (false, true, false, false),
        (false, true, true, true),
        (true, false, false, true),
        (true, false, true, true),
        (true, true, false, false),
        (true, true, true, true),
    ];
    for (oneway, partial, empty_partial, expected) in cases {
        let message = inbound(oneway, partial, empty_partial);
        assert_eq!(
            has_no_response_content(&message),
            expected,
            "oneway={oneway} partial={partial} empty_partial={empty_partial}"
        );
    }
}

#[tokio::test]
async fn oneway_flush_sends_empty_202() {
    let destination = destination(Arc::new(Capture::default()));
    let response = BufferedResponse::shared();
    let mut out = out_for(&response, Exchange::builder().oneway().build());

    let stream = destination.flush_headers(&mut out, None).await.unwrap();
    assert!(stream.is_none());
    assert_eq!(out.response_code, Some(202));
    assert!(out.http_response.is_none());

    let response = response.lock().await;
    assert_eq!(response.status(), 202);
    assert_eq!(response.content_length(), Some(0));
    assert!(response.is_closed());
}

#[tokio::test]
async fn flush_is_idempotent() {
    let destination = destination(Arc::new(Capture::default()));
    let response = BufferedResponse::shared();
    let mut out = out_for(&response, Exchange::new());
    out.response_code = Some(201);

    assert!(destination.flush_headers(&mut out, None).await.unwrap().is_some());
    assert!(out.response_headers_copied);

    out.response_code = Some(409);
    assert!(destination.flush_headers(&mut out, None).await.unwrap().is_none());
    assert_eq!(response.lock().await.status(), 201);
}

#[tokio::test]
async fn flush_without_response_fails() {
    let destination = destination(Arc::new(Capture::default()));
    let mut out = Message::new();
    assert!(matches!(
        destination.flush_headers(&mut out, None).await,
        Err(TransportError::MissingResponse(_))
    ));
}

#[tokio::test]
async fn fault_status_drops_content_type() {
    let policy = ServerPolicy {
        content_type: Some("text/xml".to_string()),
        ..Default::default()
    };
    let destination = HttpDestination::new("faulty", "/", policy, Arc::new(Capture::default()));
    let response = BufferedResponse::shared();
    let mut out = out_for(&response, Exchange::new());
    out.content_type = Some("text/xml".to_string());
    out.response_code = Some(500);

    destination.flush_headers(&mut out, None).await.unwrap();
    let response = response.lock().await;
    assert_eq!(response.status(), 500);
    assert_eq!(response.header("content-type"), None);
}

#[tokio::test]
async fn server_policy_fills_headers() {
    let policy = ServerPolicy {
        server_type: Some("conduit-test".to_string()),
        cache_control: Some("no-cache".to_string()),
        honor_keep_alive: false,
        ..Default::default()
    };
    let destination = HttpDestination::new("policy", "/", policy, Arc::new(Capture::default()));
    let response = BufferedResponse::shared();
    let mut out = out_for(&response, Exchange::new());

    destination.flush_headers(&mut out, None).await.unwrap();
    let response = response.lock().await;
    assert_eq!(response.header("server"), Some("conduit-test"));
    assert_eq!(response.header("cache-control"), Some("no-cache"));
    assert_eq!(response.header("connection"), Some("close"));
}

#[tokio::test]
async fn flush_drains_unread_request_body() {
    let destination = destination(Arc::new(Capture::default()));
    let response = BufferedResponse::shared();
    let mut out = out_for(&response, Exchange::new());
    let mut in_message = Message::new();
    in_message.body = Some(BodyReader::from_bytes(vec![1u8; 10_000]));

    destination.flush_headers(&mut out, Some(&mut in_message)).await.unwrap();
    let body = in_message.body.as_ref().unwrap();
    assert!(body.is_consumed());
    assert_eq!(body.bytes_read(), 10_000);
}

#[tokio::test]
async fn redirected_response_is_not_flushed() {
    let destination = destination(Arc::new(Capture::default()));
    let response = BufferedResponse::shared();
    response.lock().await.send_redirect("http://elsewhere/");
    let mut out = out_for(&response, Exchange::new());

    assert!(destination.flush_headers(&mut out, None).await.unwrap().is_none());
    assert!(!out.response_headers_copied);
    assert_eq!(response.lock().await.status(), 302);
}

#[tokio::test]
async fn redirect_policy_skips_observer() {
    let capture = Arc::new(Capture::default());
    let policy = ServerPolicy {
        redirect_url: Some("http://moved.example/svc".to_string()),
        ..Default::default()
    };
    let destination = HttpDestination::new("moved", "/svc", policy, capture.clone());

    let (outcome, response) = invoke(&destination, BufferedRequest::new("GET", "/svc/a")).await;
    assert!(matches!(outcome.unwrap(), InvokeOutcome::Redirected));
    assert_eq!(capture.count(), 0);

    let response = response.lock().await;
    assert_eq!(response.status(), 302);
    assert_eq!(response.header("location"), Some("http://moved.example/svc"));
}

#[tokio::test]
async fn suspended_message_is_reused_on_resume() {
    let observer = Arc::new(SuspendOnce::default());
    let destination = destination(observer.clone());
    let mut request = BufferedRequest::new("POST", "/svc/slow").with_body("x");
    let response: SharedResponse = BufferedResponse::shared();

    let continuation = match destination.invoke(&mut request, response.clone()).await.unwrap() {
        InvokeOutcome::Suspended(continuation) => continuation,
        other => panic!("expected suspension, got {other:?}"),
    };
    assert_eq!(destination.suspended_count(), 1);
    assert!(continuation.resume());

    let outcome = destination.invoke(&mut request, response).await.unwrap();
    assert!(matches!(outcome, InvokeOutcome::Completed));
    assert_eq!(destination.suspended_count(), 0);
    assert_eq!(continuation.state(), ContinuationState::Completed);

    let ids = observer.ids.lock().unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);
}

#[tokio::test]
async fn suspension_without_async_support_completes() {
    let observer = Arc::new(SuspendOnce::default());
    let listener = ListenerConfig {
        async_supported: false,
        ..Default::default()
    };
    let destination = HttpDestination::from_listener("sync", &listener, ServerPolicy::default(), observer.clone());
    assert!(!destination.is_async_supported());

    let (outcome, _) = invoke(&destination, BufferedRequest::new("GET", "/x")).await;
    assert!(matches!(outcome.unwrap(), InvokeOutcome::Completed));
    assert_eq!(destination.suspended_count(), 0);
    assert_eq!(observer.deliveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn back_channel_close_closes_request_input() {
    let capture = Arc::new(Capture::default());
    let destination = destination(capture.clone());
    let request = BufferedRequest::new("POST", "/svc").with_body("unread");
    let (_, response) = invoke(&destination, request).await;

    let in_message = capture.take();
    let channel = destination.back_channel(in_message);
    let input = channel.in_message().body.as_ref().unwrap().close_handle();
    let mut out = channel.create_out_message();
    out.response_code = Some(204);
    channel.close(&mut out).await.unwrap();

    assert!(input.is_closed());
    let response = response.lock().await;
    assert_eq!(response.status(), 204);
    assert!(response.is_closed());
}

#[tokio::test]
async fn partial_response_is_content_free() {
    let capture = Arc::new(Capture::default());
    let destination = destination(capture.clone());
    let (_, response) = invoke(&destination, BufferedRequest::new("POST", "/svc")).await;

    let mut channel = destination.back_channel(capture.take());
    let mut out = channel.create_partial_response();
    out.empty_partial_response = true;
    channel.write(&mut out, Bytes::from_static(b"dropped")).await.unwrap();
    channel.close(&mut out).await.unwrap();

    let response = response.lock().await;
    assert_eq!(response.status(), 202);
    assert!(response.body().is_empty());
    assert_eq!(response.content_length(), Some(0));
}

#[test]
fn policy_swap_is_visible() {
    let destination = destination(Arc::new(Capture::default()));
    assert!(destination.server_policy().server_type.is_none());
    destination.set_server_policy(ServerPolicy {
        server_type: Some("v2".to_string()),
        ..Default::default()
    });
    assert_eq!(destination.server_policy().server_type.as_deref(), Some("v2"));
}
