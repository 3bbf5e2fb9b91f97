//! Send two metrics to a Drifter endpoint and print whatever comes back.
//!
//! ```text
//! cargo run --example readme -- <capability> [hostname] [port]
//! ```

use std::{env, thread, time::Duration};

use drifter_sender::{BuildError, DrifterSender, encode_pairs};

fn main() -> Result<(), BuildError> {
    let mut args = env::args().skip(1);
    let capability = args.next().unwrap_or_else(|| "02hAozGflu".into());
    let hostname = args.next().unwrap_or_else(|| "localhost".into());
    let port = args
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(443);

    let sender = DrifterSender::builder()
        .with_capability(capability)
        .with_hostname(hostname)
        .with_path("/1/log".into())
        .with_port(port)
        .with_connect_timeout_ms(5_000)
        .build()?;

    let events = sender.events();
    let listener = thread::spawn(move || {
        loop {
            crossbeam_channel::select! {
                recv(events.data) -> bytes => match bytes {
                    Ok(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
                    Err(_) => break,
                },
                recv(events.errors) -> err => match err {
                    Ok(err) => eprintln!("error: {err}"),
                    Err(_) => break,
                },
                recv(events.telemetry) -> sample => match sample {
                    Ok(sample) => println!("telemetry: {sample}"),
                    Err(_) => break,
                },
                default(Duration::from_secs(2)) => break,
            }
        }
    });

    sender.send(encode_pairs([
        ("service", "mysql"),
        ("server", "db15"),
        ("unit", "B"),
        ("value", "17"),
    ]));
    sender.send(encode_pairs([
        ("service", "mysql"),
        ("server", "db15"),
        ("unit", "connections"),
        ("value", "4"),
    ]));

    if !sender.flush() {
        eprintln!("messages still queued after flush timeout");
    }
    let _ = listener.join();
    Ok(())
}
