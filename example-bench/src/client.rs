use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use callsocket_rpc::{
    client::{Client, Configuration, Destination},
    Value,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address: std::net::SocketAddr = std::env::var("HOST")
        .unwrap_or_else(|_| "127.0.0.1:7331".to_string())
        .parse()?;
    let mut client = Client::connect(Destination::from(address), Configuration::default())?;
    if let Ok(token) = std::env::var("TOKEN") {
        client = client.with_token(token);
    }

    log::info!(
        "bench.foo(1, 2, 3) = {}",
        client.call("bench.foo", vec![1.into(), 2.into(), 3.into()])?
    );
    match client.remote("bench").call("explode", Vec::new()) {
        Ok(value) => log::warn!("bench.explode did not explode: {value}"),
        Err(e) => log::info!("bench.explode failed as it should: {e}"),
    }

    let response_count = Arc::new(AtomicUsize::new(0));
    let in_flight = Arc::new(AtomicUsize::new(0));

    // pipelined calls, kept topped up from a continuation
    for i in 0..256 {
        issue(client.clone(), i, in_flight.clone(), response_count.clone());
    }
    // and some blocking callers sharing the same connection
    for _ in 0..2 {
        let client = client.clone();
        let response_count = response_count.clone();
        std::thread::spawn(move || loop {
            match client.call("bench.echo", vec![Value::from("hello")]) {
                Ok(_) => {
                    response_count.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log::error!("blocking caller stopping: {e}");
                    break;
                }
            }
        });
    }

    loop {
        let start = Instant::now();
        std::thread::sleep(Duration::from_secs(1));
        let total = response_count.swap(0, Ordering::Relaxed);
        let hz = (total as f64) / start.elapsed().as_secs_f64().max(0.1);
        eprintln!(
            "Messages: {total:10} rate: {hz:9.1}hz in flight: {:5}",
            in_flight.load(Ordering::Relaxed)
        );
    }
}

fn issue(client: Client, i: i64, in_flight: Arc<AtomicUsize>, response_count: Arc<AtomicUsize>) {
    in_flight.fetch_add(1, Ordering::Relaxed);
    let next = client.clone();
    client.call_with(
        "bench.foo",
        vec![i.into(), (i + 1).into(), (i + 2).into()],
        move |result| {
            in_flight.fetch_sub(1, Ordering::Relaxed);
            match result {
                Ok(sum) if sum.as_i64() == Some(3 * i + 3) => {
                    response_count.fetch_add(1, Ordering::Relaxed);
                    issue(next, i, in_flight, response_count);
                }
                Ok(sum) => log::error!("bench.foo({i}, ..) returned {sum}"),
                Err(e) => log::error!("bench.foo({i}, ..) failed: {e}"),
            }
        },
    );
}
