use std::{
    collections::HashMap,
    io::{Read, Write},
    net::{Ipv4Addr, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use callsocket::{Decoder, DeserializeError, Encoder};
use callsocket_messagepack::MessagePackCodec;
use callsocket_rpc::{
    client::{Client, Configuration as ClientConfiguration, ConnectionPool, Destination},
    server::{Configuration, Methods, RpcResponder, Server, ServerHandle},
    Error, EventLoop, Fault, FaultKind, Response, Value,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Responders parked by `bench.never`, so those calls stay pending.
type Parked = Arc<Mutex<Vec<RpcResponder>>>;

fn bench(invocations: Arc<AtomicUsize>, parked: Parked) -> Methods {
    Methods::new()
        .method("foo", move |(a, b, c): (i64, i64, i64)| {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Fault>(a + b + c)
        })
        .method("explode", |(): ()| Err::<(), _>("boom"))
        .deferred("slow", |args, responder| {
            let millis = args.first().and_then(Value::as_u64).unwrap_or_default();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(millis));
                responder.respond(Ok(Value::from("finally")));
            });
        })
        .deferred("never", move |_args, responder| {
            parked.lock().expect("test mutex").push(responder);
        })
}

struct BenchServer {
    handle: ServerHandle,
    invocations: Arc<AtomicUsize>,
    parked: Parked,
}

impl BenchServer {
    fn destination(&self) -> Destination {
        Destination::from(self.handle.local_address())
    }
}

#[track_caller]
fn serve(configure: impl FnOnce(&mut Configuration)) -> BenchServer {
    init();
    let invocations = Arc::new(AtomicUsize::new(0));
    let parked = Parked::default();
    let mut configuration = Configuration::new("127.0.0.1", 0);
    configure(&mut configuration);
    let mut server: Server = Server::new(configuration);
    server.add_handler("bench", bench(invocations.clone(), parked.clone()));
    let handle = server.start().expect("server starts");
    BenchServer {
        handle,
        invocations,
        parked,
    }
}

#[track_caller]
fn connect(destination: Destination) -> Client {
    Client::connect(destination, ClientConfiguration::default()).expect("connects")
}

#[track_caller]
fn fault_of(result: callsocket_rpc::Result<Value>) -> Fault {
    match result {
        Err(Error::Fault(fault)) => fault,
        other => panic!("expected a fault, got {other:?}"),
    }
}

fn args(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

#[test]
fn sync_calls_return_the_remote_value() {
    let server = serve(|_| {});
    let client = connect(server.destination());

    assert_eq!(
        Value::from(6),
        client.call("bench.foo", args(&[1, 2, 3])).expect("calls")
    );
    assert_eq!(
        Value::from(6),
        client.remote("bench").call("foo", args(&[1, 2, 3])).expect("calls")
    );
}

#[test]
fn concurrent_async_calls_are_matched_to_their_continuations() {
    let server = serve(|_| {});
    let client = connect(server.destination());
    let (replies, received) = std::sync::mpsc::channel();

    for i in 0..100 {
        let replies = replies.clone();
        client.call_with("bench.foo", args(&[i, i + 1, i + 2]), move |reply| {
            replies.send((i, reply)).expect("test is listening");
        });
    }

    let mut seen = std::collections::HashSet::new();
    for _ in 0..100 {
        let (i, reply) = received
            .recv_timeout(Duration::from_secs(10))
            .expect("every continuation fires");
        assert_eq!(Ok(Value::from(3 * i + 3)), reply, "call {i}");
        assert!(seen.insert(i), "call {i} completed twice");
    }
    assert_eq!(1, client.pool().connection_count());
    assert_eq!(100, server.invocations.load(Ordering::SeqCst));
}

#[test]
fn remote_failures_are_raised_with_their_kind_and_message() {
    let server = serve(|_| {});
    let client = connect(server.destination());

    let fault = fault_of(client.call("bench.explode", Vec::new()));
    assert_eq!(FaultKind::RemoteException, fault.kind());
    assert_eq!("boom", fault.message());
    assert!(
        fault
            .backtrace()
            .iter()
            .any(|line| line.contains("bench.explode")),
        "{:?}",
        fault.backtrace()
    );

    let (reply, received) = std::sync::mpsc::channel();
    client.call_with("bench.explode", Vec::new(), move |result| {
        reply.send(result).expect("test is listening");
    });
    let fault = received
        .recv_timeout(Duration::from_secs(10))
        .expect("continuation fires")
        .expect_err("handed the fault");
    assert_eq!("boom", fault.message());
}

#[test]
fn tokens_are_enforced() {
    let server = serve(|configuration| configuration.token("other"));
    let client = connect(server.destination()).with_token("secret");

    let fault = fault_of(client.call("bench.foo", args(&[1, 2, 3])));
    assert_eq!(FaultKind::Authentication, fault.kind());
    let anonymous = connect(server.destination());
    let fault = fault_of(anonymous.call("bench.foo", args(&[1, 2, 3])));
    assert_eq!(FaultKind::Authentication, fault.kind());
    assert_eq!(0, server.invocations.load(Ordering::SeqCst));

    let trusted = connect(server.destination()).with_token("other");
    assert_eq!(
        Value::from(6),
        trusted.call("bench.foo", args(&[1, 2, 3])).expect("calls")
    );
}

#[test]
fn missing_handlers_and_methods_are_invalid_references() {
    let server = serve(|_| {});
    let client = connect(server.destination());

    let fault = fault_of(client.call("missing.method", Vec::new()));
    assert_eq!(FaultKind::InvalidObject, fault.kind());
    let fault = fault_of(client.call("bench.missing", Vec::new()));
    assert_eq!(FaultKind::InvalidMethod, fault.kind());
    let fault = fault_of(client.call("bench.foo", args(&[1, 2])));
    assert_eq!(FaultKind::InvalidArgument, fault.kind());
}

#[test]
fn unreachable_destinations_fail_to_connect() {
    init();
    let port = {
        let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).expect("binds");
        listener.local_addr().expect("bound").port()
    };
    let destination = Destination::new("127.0.0.1", port);

    let fault = match Client::connect(destination.clone(), ClientConfiguration::default()) {
        Err(Error::Fault(fault)) => fault,
        other => panic!("expected a connection fault, got {other:?}"),
    };
    assert_eq!(FaultKind::ConnectionError, fault.kind());
    assert!(
        fault.message().ends_with(&format!("for '{destination}'.")),
        "{fault}"
    );

    let pool = Arc::new(ConnectionPool::new(
        Arc::new(ClientConfiguration::default()),
        EventLoop::shared().expect("starts"),
    ));
    let client = Client::new(destination, pool);
    let fault = fault_of(client.call("bench.foo", args(&[1, 2, 3])));
    assert_eq!(FaultKind::ConnectionError, fault.kind());
}

#[test]
fn one_connection_is_shared_per_destination() {
    let server = serve(|_| {});
    let other_server = serve(|_| {});
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(ClientConfiguration::default()),
        EventLoop::shared().expect("starts"),
    ));

    let first = Client::new(server.destination(), pool.clone());
    let second = Client::new(server.destination(), pool.clone()).with_token("unused");
    let elsewhere = Client::new(other_server.destination(), pool.clone());

    let first_connection = first.connection().expect("connects");
    assert!(first_connection.same_connection(&second.connection().expect("connects")));
    assert!(!first_connection.same_connection(&elsewhere.connection().expect("connects")));
    assert_eq!(2, pool.connection_count());

    assert_eq!(
        Value::from(6),
        second.call("bench.foo", args(&[1, 2, 3])).expect("calls")
    );
    assert!(first_connection.same_connection(&first.connection().expect("connects")));
}

#[test]
fn shared_clients_reuse_the_process_wide_connection() {
    let server = serve(|_| {});
    let first = Client::shared(server.destination()).expect("connects");
    let second = Client::shared(server.destination()).expect("connects");
    assert!(Arc::ptr_eq(first.pool(), second.pool()));

    let shared_connection = first.connection().expect("connects");
    assert!(shared_connection.same_connection(&second.connection().expect("connects")));
    assert_eq!(
        Value::from(6),
        second.call("bench.foo", args(&[1, 2, 3])).expect("calls")
    );

    let private = connect(server.destination());
    assert!(!shared_connection.same_connection(&private.connection().expect("connects")));
}

#[test]
fn timed_out_calls_leave_orphans_that_are_dropped() {
    let server = serve(|_| {});
    let client = connect(server.destination()).with_call_timeout(Duration::from_millis(50));

    match client.call("bench.slow", vec![Value::from(300)]) {
        Err(Error::CallTimedOut { call, timeout }) => {
            assert_eq!("bench.slow", call);
            assert_eq!(Duration::from_millis(50), timeout);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    let connection = client.connection().expect("connected");
    assert_eq!(0, connection.pending_calls(), "the timed out call is forgotten");

    // the late reply arrives while another call is pending, and must not disturb it
    let (reply, received) = std::sync::mpsc::channel();
    client.call_with("bench.slow", vec![Value::from(600)], move |result| {
        reply.send(result).expect("test is listening");
    });
    assert_eq!(
        Ok(Value::from("finally")),
        received
            .recv_timeout(Duration::from_secs(10))
            .expect("continuation fires")
    );
    assert!(connection.is_alive());
    assert_eq!(
        Value::from(6),
        client.call("bench.foo", args(&[1, 2, 3])).expect("calls")
    );
}

#[test]
fn blocking_calls_refuse_to_run_on_the_event_loop() {
    let server = serve(|_| {});
    let client = connect(server.destination());
    let event_loop = client.pool().event_loop().clone();

    let on_loop = client.clone();
    let result = event_loop
        .block_on(event_loop.spawn(async move { on_loop.call("bench.foo", args(&[1, 2, 3])) }))
        .expect("the test thread is not the loop")
        .expect("task completes");
    assert!(matches!(result, Err(Error::WouldDeadlock)), "{result:?}");
}

#[test]
fn continuations_may_make_blocking_calls() {
    let server = serve(|_| {});
    let client = connect(server.destination());
    let (reply, received) = std::sync::mpsc::channel();

    let nested = client.clone();
    client.call_with("bench.foo", args(&[1, 2, 3]), move |first| {
        let first = first.ok().and_then(|value| value.as_i64()).unwrap_or_default();
        reply
            .send(nested.call("bench.foo", args(&[first, first, first])))
            .expect("test is listening");
    });
    assert_eq!(
        Value::from(18),
        received
            .recv_timeout(Duration::from_secs(10))
            .expect("continuation fires")
            .expect("nested call works")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn async_callers_can_await_calls() {
    let server = serve(|_| {});
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(ClientConfiguration::default()),
        EventLoop::shared().expect("starts"),
    ));
    let client = Client::new(server.destination(), pool);
    let remote = client.remote("bench");

    let (sum, fault) = tokio::join!(
        client.send("bench.foo", args(&[1, 2, 3])),
        remote.send("explode", Vec::new()),
    );
    assert_eq!(Value::from(6), sum.expect("calls"));
    assert_eq!("boom", fault_of(fault).message());
}

fn request(call: Value, args: Vec<Value>, cb_id: &str) -> Value {
    Value::Map(vec![
        (Value::from("call"), call),
        (Value::from("args"), Value::Array(args)),
        (Value::from("token"), Value::Nil),
        (Value::from("cb_id"), Value::from(cb_id)),
    ])
}

/// Read responses off a raw socket until `count` have arrived.
#[track_caller]
fn read_responses(stream: &mut TcpStream, count: usize) -> HashMap<String, Result<Value, Fault>> {
    let mut codec = MessagePackCodec::<Value, Response>::default();
    let mut buffer = Vec::new();
    let mut replies = HashMap::new();
    let mut chunk = [0; 1024];
    while replies.len() < count {
        match codec.decode(&buffer[..]) {
            Ok((consumed, response)) => {
                buffer.drain(..consumed);
                let (cb_id, result) = response.into_reply();
                replies.insert(cb_id, result);
            }
            Err(DeserializeError::IncompleteBuffer { .. }) => {
                let read = stream.read(&mut chunk).expect("server replies");
                assert_ne!(0, read, "server closed the connection");
                buffer.extend_from_slice(&chunk[..read]);
            }
            Err(e) => panic!("undecodable response: {e:?}"),
        }
    }
    replies
}

#[test]
fn malformed_requests_do_not_disturb_calls_in_flight() {
    let server = serve(|_| {});
    let mut stream = TcpStream::connect(server.handle.local_address()).expect("connects");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("sets a timeout");
    let mut codec = MessagePackCodec::<Value, Response>::default();

    let slow = codec.encode(request(Value::from("bench.slow"), vec![Value::from(100)], "a"));
    stream.write_all(&slow[..]).expect("writes");
    let malformed = codec.encode(request(Value::from(5), Vec::new(), "b"));
    stream.write_all(&malformed[..]).expect("writes");

    let replies = read_responses(&mut stream, 2);
    let fault = replies["b"].clone().expect_err("a fault");
    assert_eq!(FaultKind::ProtocolError, fault.kind());
    assert_eq!(Ok(Value::from("finally")), replies["a"]);

    let after = codec.encode(request(Value::from("bench.foo"), args(&[1, 2, 3]), "c"));
    stream.write_all(&after[..]).expect("still connected");
    assert_eq!(Ok(Value::from(6)), read_responses(&mut stream, 1)["c"]);
}

#[test]
fn closing_a_connection_fails_its_pending_calls() {
    let server = serve(|_| {});
    let client = connect(server.destination());
    let (reply, received) = std::sync::mpsc::channel();

    client.call_with("bench.never", Vec::new(), move |result| {
        reply.send(result).expect("test is listening");
    });
    let connection = client.connection().expect("connected");
    while server.parked.lock().expect("test mutex").is_empty() {
        std::thread::sleep(Duration::from_millis(5));
    }
    connection.close();

    let fault = received
        .recv_timeout(Duration::from_secs(10))
        .expect("continuation fires")
        .expect_err("closed");
    assert_eq!(FaultKind::ConnectionError, fault.kind());
    assert!(!connection.is_alive());

    // the next call reconnects
    assert_eq!(
        Value::from(6),
        client.call("bench.foo", args(&[1, 2, 3])).expect("calls")
    );
    assert!(!connection.same_connection(&client.connection().expect("connected")));
}

#[test]
fn server_shutdown_closes_client_connections() {
    let server = serve(|_| {});
    let client = connect(server.destination());
    let (reply, received) = std::sync::mpsc::channel();
    client.call_with("bench.never", Vec::new(), move |result| {
        reply.send(result).expect("test is listening");
    });
    while server.parked.lock().expect("test mutex").is_empty() {
        std::thread::sleep(Duration::from_millis(5));
    }

    server.handle.shutdown();

    let fault = received
        .recv_timeout(Duration::from_secs(10))
        .expect("continuation fires")
        .expect_err("closed");
    assert_eq!(FaultKind::ConnectionError, fault.kind());
}

mod tls {
    use std::sync::Arc;

    use callsocket_rpc::{
        client::{
            Client, Configuration as ClientConfiguration, TrustedTlsStreamConnector,
            UnverifiedTlsStreamConnector,
        },
        Value,
    };
    use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
    use tokio_rustls::rustls::{RootCertStore, ServerConfig};

    use super::{args, serve};

    fn self_signed() -> (rustls_pki_types::CertificateDer<'static>, Arc<ServerConfig>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("generates a certificate");
        let certificate = certified.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], key)
            .expect("valid certificate");
        (certificate, Arc::new(server_config))
    }

    #[test]
    fn calls_work_over_verified_tls() {
        let (certificate, server_config) = self_signed();
        let server = serve(|configuration| configuration.tls(server_config));

        let mut roots = RootCertStore::empty();
        roots.add(certificate).expect("valid root");
        let configuration: ClientConfiguration<TrustedTlsStreamConnector> =
            ClientConfiguration::new(TrustedTlsStreamConnector::new(
                ServerName::try_from("localhost").expect("valid name"),
                roots,
            ));
        let client = Client::connect(server.destination(), configuration).expect("connects");

        assert_eq!(
            Value::from(6),
            client.call("bench.foo", args(&[1, 2, 3])).expect("calls")
        );
    }

    #[test]
    fn calls_work_over_unverified_tls() {
        let (_certificate, server_config) = self_signed();
        let server = serve(|configuration| configuration.tls(server_config));

        let configuration: ClientConfiguration<UnverifiedTlsStreamConnector> =
            ClientConfiguration::new(UnverifiedTlsStreamConnector::new(
                ServerName::try_from("localhost").expect("valid name"),
            ));
        let client = Client::connect(server.destination(), configuration).expect("connects");

        assert_eq!(
            Value::from(6),
            client.call("bench.foo", args(&[1, 2, 3])).expect("calls")
        );
    }

    #[test]
    fn plain_clients_cannot_call_tls_servers() {
        let (_certificate, server_config) = self_signed();
        let server = serve(|configuration| configuration.tls(server_config));

        let result = Client::connect(server.destination(), ClientConfiguration::default())
            .and_then(|client| {
                client
                    .with_call_timeout(std::time::Duration::from_secs(2))
                    .call("bench.foo", args(&[1, 2, 3]))
            });
        assert!(result.is_err(), "{result:?}");
    }
}
