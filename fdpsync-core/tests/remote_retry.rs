//! Retry and batching behaviour of the remote client against a scripted
//! transport. No network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use fdpsync_core::domain::Isin;
use fdpsync_core::remote::{
    plan_batches, CircuitBreaker, ClientIdentity, ClientSettings, Environment, FetchError,
    FetchRequest, FormPost, RawResponse, RemoteClient, RetryPolicy, Secret, TransientCause,
    Transport, TransportError,
};

/// Answers per ISIN list; counts calls per list.
#[derive(Default)]
struct PerBatch {
    script: Mutex<HashMap<String, Vec<Result<RawResponse, TransportError>>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    auth: Mutex<Vec<(Option<String>, Option<String>)>>,
}

impl PerBatch {
    fn answer(self, isins: &str, mut replies: Vec<Result<RawResponse, TransportError>>) -> Self {
        replies.reverse();
        self.script.lock().unwrap().insert(isins.to_string(), replies);
        self
    }

    fn calls(&self, isins: &str) -> usize {
        self.calls.lock().unwrap().get(isins).copied().unwrap_or(0)
    }
}

impl Transport for PerBatch {
    fn post_form(&self, post: &FormPost<'_>) -> Result<RawResponse, TransportError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.auth.lock().unwrap().push((
            post.user.map(str::to_string),
            post.password.map(str::to_string),
        ));
        let isins = post
            .fields
            .iter()
            .find(|(k, _)| *k == "isin")
            .map(|(_, v)| v.clone())
            .unwrap_or_default();
        *self.calls.lock().unwrap().entry(isins.clone()).or_default() += 1;
        self.script
            .lock()
            .unwrap()
            .get_mut(&isins)
            .and_then(Vec::pop)
            .unwrap_or_else(|| Ok(RawResponse::new(200, format!("<FundsXML4>{isins}</FundsXML4>"))))
    }
}

fn settings(max_retries: u32) -> ClientSettings {
    ClientSettings {
        endpoint: Environment::Test.default_endpoint().to_string(),
        identity: ClientIdentity {
            environment: Environment::Test,
            user: "reporting".into(),
            data_supplier: "ALPEN".into(),
            client_version: "0.1.0".into(),
        },
        password: Some(Secret::new("s3cret")),
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: true,
        },
    }
}

fn isins(codes: &[&str]) -> Vec<Isin> {
    codes.iter().map(|c| Isin::parse(c).unwrap()).collect()
}

#[test]
fn connection_resets_are_retried_with_credentials_each_time() {
    let transport = PerBatch::default().answer(
        "AT0000A20FX4",
        vec![
            Err(TransportError::Interrupted("connection reset by peer".into())),
            Err(TransportError::Connect("refused".into())),
        ],
    );
    let client = RemoteClient::with_transport(&transport, settings(2));
    let body = client
        .fetch(&FetchRequest::new(isins(&["AT0000A20FX4"])))
        .unwrap();

    assert_eq!(body, b"<FundsXML4>AT0000A20FX4</FundsXML4>");
    assert_eq!(transport.calls("AT0000A20FX4"), 3);
    let auth = transport.auth.lock().unwrap();
    assert!(auth
        .iter()
        .all(|(u, p)| u.as_deref() == Some("reporting") && p.as_deref() == Some("s3cret")));
}

#[test]
fn too_many_requests_is_fatal() {
    let transport =
        PerBatch::default().answer("AT0000A20FX4", vec![Ok(RawResponse::new(429, "slow down"))]);
    let client = RemoteClient::with_transport(&transport, settings(5));
    let err = client
        .fetch(&FetchRequest::new(isins(&["AT0000A20FX4"])))
        .unwrap_err();

    assert!(matches!(err, FetchError::Client { status: 429, .. }));
    assert_eq!(transport.calls("AT0000A20FX4"), 1);
}

#[test]
fn invalid_request_is_not_retried() {
    let transport = PerBatch::default().answer(
        "AT0000A20FX4",
        vec![Err(TransportError::InvalidRequest("relative URL".into()))],
    );
    let client = RemoteClient::with_transport(&transport, settings(5));
    let err = client
        .fetch(&FetchRequest::new(isins(&["AT0000A20FX4"])))
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidRequest(_)));
    assert_eq!(transport.calls("AT0000A20FX4"), 1);
}

#[test]
fn exhausted_retries_carry_the_last_cause() {
    let transport = PerBatch::default().answer(
        "AT0000A20FX4",
        vec![
            Ok(RawResponse::new(503, "maintenance")),
            Err(TransportError::Timeout("30s elapsed".into())),
        ],
    );
    let client = RemoteClient::with_transport(&transport, settings(1))
        .with_breaker(CircuitBreaker::disabled());
    let err = client
        .fetch(&FetchRequest::new(isins(&["AT0000A20FX4"])))
        .unwrap_err();

    match err {
        FetchError::RemoteUnavailable { attempts, source } => {
            assert_eq!(attempts, 2);
            assert!(matches!(
                source,
                TransientCause::Transport(TransportError::Timeout(_))
            ));
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn batches_come_back_in_request_order() {
    let codes = isins(&[
        "AT0000A20FX4",
        "US0378331005",
        "DE0005140008",
        "IE00B4L5Y983",
        "LU0274208692",
    ]);
    let requests = plan_batches(&codes, 2, &FetchRequest::new(Vec::new()));
    let transport = PerBatch::default().answer(
        "AT0000A20FX4 US0378331005",
        vec![Ok(RawResponse::new(500, "oops"))],
    );
    let client = RemoteClient::with_transport(&transport, settings(1));
    let completed = AtomicUsize::new(0);

    let responses = client.fetch_batches(&requests, 3, |_| {
        completed.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(completed.load(Ordering::SeqCst), 3);
    let indices: Vec<usize> = responses.iter().map(|r| r.batch_index).collect();
    assert_eq!(indices, [0, 1, 2]);
    assert_eq!(responses[2].isins, codes[4..]);
    assert_eq!(
        responses[0].result.as_deref().unwrap(),
        b"<FundsXML4>AT0000A20FX4 US0378331005</FundsXML4>"
    );
    assert_eq!(transport.total.load(Ordering::SeqCst), 4);
}

#[test]
fn sequential_fallback_matches_pooled_results() {
    let codes = isins(&["AT0000A20FX4", "US0378331005", "DE0005140008"]);
    let requests = plan_batches(&codes, 1, &FetchRequest::new(Vec::new()));
    let transport = PerBatch::default();
    let client = RemoteClient::with_transport(&transport, settings(0));

    let pooled = client.fetch_batches(&requests, 4, |_| {});
    let sequential = client.fetch_batches(&requests, 1, |_| {});
    let bodies = |rs: &[fdpsync_core::remote::BatchResponse]| -> Vec<Vec<u8>> {
        rs.iter().map(|r| r.result.clone().unwrap()).collect()
    };
    assert_eq!(bodies(&pooled), bodies(&sequential));
}
