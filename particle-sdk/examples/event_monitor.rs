//! Live event monitor for the Particle cloud
//!
//! Logs in (or injects an existing token), subscribes to events from the
//! account's devices and prints them until Ctrl+C.
//!
//! Environment:
//! - `PARTICLE_ACCESS_TOKEN`, or `PARTICLE_USERNAME` and `PARTICLE_PASSWORD`
//! - `PARTICLE_EVENT_PREFIX` (optional) to filter by event name
//! - `PARTICLE_DEVICE_ID` (optional) to watch a single device
//!
//! Run with: cargo run -p particle-sdk --example event_monitor

use std::env;

use particle_sdk::{CloudConfig, ListenerError, ParticleCloud, StreamNotification};

fn print_notification(notification: &StreamNotification) -> Result<(), ListenerError> {
    match notification {
        StreamNotification::Event(event) => println!(
            "[{}] {} from {}: {} (ttl {}s)",
            event.published_at.format("%H:%M:%S"),
            event.name,
            event.device_id,
            event.data,
            event.ttl
        ),
        StreamNotification::Error(error) => println!("stream error: {error}"),
        StreamNotification::Reconnecting { attempt, delay } => {
            println!("reconnecting (attempt {attempt}) in {delay:?}")
        }
        StreamNotification::Closed(reason) => println!("subscription closed: {reason}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("particle_sdk=info".parse()?)
                .add_directive("particle_session=info".parse()?)
                .add_directive("particle_stream=info".parse()?),
        )
        .init();

    println!("=== Particle Event Monitor ===\n");

    let cloud = ParticleCloud::new(CloudConfig::default())?;

    if let Ok(token) = env::var("PARTICLE_ACCESS_TOKEN") {
        if !cloud.inject_access_token(&token) {
            return Err("PARTICLE_ACCESS_TOKEN is empty".into());
        }
        println!("Using injected access token");
    } else {
        let username = env::var("PARTICLE_USERNAME")?;
        let password = env::var("PARTICLE_PASSWORD")?;
        cloud.login(&username, &password).await?;
        println!("Logged in as {username}");
    }

    let prefix = env::var("PARTICLE_EVENT_PREFIX").ok();
    let id = match env::var("PARTICLE_DEVICE_ID") {
        Ok(device_id) => {
            println!("Watching device {device_id}");
            cloud.subscribe_to_device_events(prefix.as_deref(), &device_id, print_notification)
        }
        Err(_) => {
            println!("Watching all owned devices");
            cloud.subscribe_to_my_devices_events(prefix.as_deref(), print_notification)
        }
    };

    println!("Press Ctrl+C to stop\n");
    tokio::signal::ctrl_c().await?;

    cloud.unsubscribe(id);
    cloud.logout();
    println!("\nDone");
    Ok(())
}
