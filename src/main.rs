use std::env;
use std::path::PathBuf;

use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use escrow_eng::csv::{read_bookings, read_commands, read_rewards, read_users, write_bookings, write_rewards};
use escrow_eng::engine::Engine;
use escrow_eng::notify::Notifier;
use escrow_eng::processor::RecordingProcessor;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let data_dir: PathBuf = args
        .next()
        .expect("usage: escrow-eng <data-dir> <out-dir>")
        .into();
    let out_dir: PathBuf = args
        .next()
        .expect("usage: escrow-eng <data-dir> <out-dir>")
        .into();

    let directory = read_users(data_dir.join("users.csv")).expect("failed to load users");
    let bookings = read_bookings(data_dir.join("bookings.csv")).expect("failed to load bookings");
    let rewards = read_rewards(data_dir.join("rewards.csv")).expect("failed to load rewards");

    let (notifier, mut deliveries) = Notifier::channel(64);
    let delivery_log = tokio::spawn(async move {
        while let Some(n) = deliveries.recv().await {
            info!(recipient = %n.recipient, channel = ?n.channel, "notify: {}", n.event);
        }
    });

    let mut engine = Engine::new(RecordingProcessor::new(), directory).with_notifier(notifier);
    for booking in bookings {
        engine.insert_booking(booking);
    }
    for reward in rewards {
        engine.insert_reward(reward);
    }

    let commands = read_commands(data_dir.join("commands.csv")).expect("failed to open commands");
    let (sender, receiver) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        for result in commands {
            match result {
                Ok(command) => {
                    if sender.send(command).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
    });

    engine.run(ReceiverStream::new(receiver)).await;

    write_bookings(out_dir.join("bookings.csv"), engine.bookings())
        .expect("failed to write bookings");
    write_rewards(out_dir.join("rewards.csv"), engine.rewards())
        .expect("failed to write rewards");

    drop(engine);
    let _ = delivery_log.await;
}
