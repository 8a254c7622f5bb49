use pellematic::catalog::Catalog;
use pellematic::{ClientConfig, DecodedValue, Entry, Event, PellematicClient};
use std::env;

#[tokio::main]
async fn main() -> pellematic::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args
        .get(1)
        .expect("usage: monitor <host> <user> <password> [--all]");
    let mut config = ClientConfig::new(host);
    config.username = args.get(2).cloned().unwrap_or_default();
    config.password = args.get(3).cloned().unwrap_or_default();
    let all = args.iter().any(|a| a == "--all");

    let catalog = Catalog::builtin();
    let identifiers = if all {
        catalog.all_identifiers()
    } else {
        catalog.core_identifiers()
    };

    let client = PellematicClient::from_config(&config)
        .on_event(|event| match event {
            Event::ValueChanged {
                identifier,
                previous,
                current,
            } => println!("{identifier}: {previous} -> {current}"),
            other => println!("{other:?}"),
        })
        .on_readings(move |readings| {
            for (id, entry) in readings.iter() {
                let name = catalog.find(id).map_or(id, |spec| spec.name.as_str());
                match entry {
                    Entry::Value(reading) => {
                        let unit = reading.unit().unwrap_or("");
                        match &reading.value {
                            DecodedValue::Enum { label, index } => {
                                println!("{name}: {label} [{index}]")
                            }
                            value => println!("{name}: {value}{unit}"),
                        }
                    }
                    Entry::Missing => println!("{name}: --"),
                }
            }
        })
        .build()?;

    println!("Validating {}...", client.base_url());
    client.validate().await?;
    println!("Connected. Polling every {}s...", config.poll_interval_secs);

    let mut interval = tokio::time::interval(config.poll_interval());
    loop {
        interval.tick().await;
        if let Err(e) = client.fetch(&identifiers).await {
            eprintln!("Fetch error: {e}");
            client.invalidate().await;
        }
    }
}
