use std::{net::SocketAddr, time::Duration};

use callsocket_rpc::{
    server::{Configuration, Methods, Server},
    Value,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let address: SocketAddr = std::env::var("HOST")
        .unwrap_or_else(|_| "0.0.0.0:7331".to_string())
        .parse()?;
    let mut configuration = Configuration::new(address.ip().to_string(), address.port());
    if let Ok(token) = std::env::var("TOKEN") {
        configuration.token(token);
    }
    configuration.max_queued_outbound_messages(512);

    let mut server: Server = Server::new(configuration);
    server.add_handler("bench", bench());
    let running = server.start()?;
    log::info!("bench server listening on {}", running.local_address());

    loop {
        std::thread::park();
    }
}

/// The methods the bench client exercises.
fn bench() -> Methods {
    Methods::new()
        .method("foo", |(a, b, c): (i64, i64, i64)| Ok::<_, String>(a + b + c))
        .method("echo", |(message,): (Value,)| Ok::<_, String>(message))
        .method("explode", |(): ()| Err::<(), _>("boom"))
        .deferred("sleep", |args, responder| {
            let millis = args.first().and_then(Value::as_u64).unwrap_or_default();
            // replies from another thread; the worker is free right away
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(millis));
                responder.respond(Ok(Value::from(millis)));
            });
        })
}
