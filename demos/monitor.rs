use std::time::Duration;
use futures_concurrency::future::Join;
use autoaddr::{
    config::{Config, ClassConfig},
    device::DeviceClass,
    master::{Scheduler, SerialTransport, FileStore, HostFlags, Event},
    };

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".into());
    let directory = args.next().unwrap_or_else(|| ".".into());

    // manage all known device classes with their standard addresses
    let config = Config::default().with_classes(DeviceClass::ALL.map(ClassConfig::new));
    let transport = SerialTransport::open(&port, 115_200).unwrap();
    let (events, mut received) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut scheduler = Scheduler::new(config, transport, FileStore::new(directory), events).unwrap();
    let mut operator = scheduler.operator();
    let host = &HostFlags::default();
    println!("created master on {}", port);

    let shutdown = async move {
        tokio::signal::ctrl_c().await.unwrap();
        println!("shutting down after current cycle");
        host.request_shutdown();
    };
    let notifications = async {
        while let Some(event) = received.recv().await {
            println!("event: {}", event);
        }
    };
    let monitor = async {
        while operator.changed().await {
            for line in operator.dump() {
                println!("{}", line);
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    };
    // the other tasks end once the scheduler and its channels are dropped
    let run = async move {
        scheduler.run(host).await;
        drop(scheduler);
    };
    (run, shutdown, notifications, monitor).join().await;
}
