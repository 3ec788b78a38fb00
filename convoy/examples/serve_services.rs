//! Serve a handful of simulated services as one unit.
//!
//! Demonstrates:
//! - a [`ContainerFactory`] building workers from definitions
//! - workers signalling `wait` through a [`ShutdownToken`]
//! - a scoped session that always tears services down
//! - lifecycle events streamed from a [`LifecycleEventBus`]
//!
//! Run with `RUST_LOG=convoy=debug cargo run --example serve_services`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convoy::*;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Definition of one simulated service.
struct ServiceSpec {
    name: &'static str,
    warmup: Duration,
    /// Crash this long after starting, if set.
    crash_after: Option<Duration>,
}

/// A service that runs until stopped or until its scripted crash.
struct SimulatedService {
    name: String,
    warmup: Duration,
    crash_after: Option<Duration>,
    shutdown: ShutdownToken,
}

#[async_trait]
impl ServiceWorker for SimulatedService {
    async fn start(&self) -> anyhow::Result<()> {
        tokio::time::sleep(self.warmup).await;
        info!(service = %self.name, "accepting requests");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!(service = %self.name, "draining in-flight requests");
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.shutdown.cancel();
        Ok(())
    }

    async fn kill(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        Ok(())
    }

    async fn wait(&self) -> anyhow::Result<()> {
        match self.crash_after {
            Some(after) => tokio::select! {
                _ = self.shutdown.cancelled() => Ok(()),
                _ = tokio::time::sleep(after) => {
                    anyhow::bail!("lost connection to broker")
                }
            },
            None => {
                self.shutdown.cancelled().await;
                Ok(())
            }
        }
    }
}

struct SimulatedFactory;

impl ContainerFactory for SimulatedFactory {
    type Definition = ServiceSpec;

    fn service_name(&self, definition: &ServiceSpec) -> String {
        definition.name.to_string()
    }

    fn build(
        &self,
        definition: ServiceSpec,
        config: &RunnerConfig,
    ) -> anyhow::Result<Arc<dyn ServiceWorker>> {
        info!(
            service = definition.name,
            runner = %config.label,
            "building service container"
        );
        Ok(Arc::new(SimulatedService {
            name: definition.name.to_string(),
            warmup: definition.warmup,
            crash_after: definition.crash_after,
            shutdown: ShutdownToken::new(),
        }))
    }
}

fn definitions(crash: bool) -> Vec<ServiceSpec> {
    vec![
        ServiceSpec {
            name: "billing",
            warmup: Duration::from_millis(30),
            crash_after: None,
        },
        ServiceSpec {
            name: "search",
            warmup: Duration::from_millis(10),
            crash_after: crash.then(|| Duration::from_millis(200)),
        },
        ServiceSpec {
            name: "notifications",
            warmup: Duration::from_millis(20),
            crash_after: None,
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let bus = Arc::new(LifecycleEventBus::new(256).with_tracing(false));
    let mut rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            println!("[EVENT] {}", serde_json::to_string(&event.payload)?);
        }
        anyhow::Ok(())
    });

    let config = RunnerConfig::new("demo").with_setting("AMQP_URI", "amqp://guest@localhost");

    println!("1. Serving services for a fixed window, then stopping them...");
    let served = ServiceSession::new(config.clone())
        .with_observer(bus.clone())
        .run(&SimulatedFactory, definitions(false), |runner| async move {
            println!("   running: {}", runner.service_names().join(", "));
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(runner.len())
        })
        .await?;
    println!("   served {served} services\n");

    println!("2. Waiting on services until one crashes...");
    let outcome = ServiceSession::new(config)
        .kill_on_exit(true)
        .with_observer(bus.clone())
        .run(&SimulatedFactory, definitions(true), |runner| async move {
            runner.wait().await?;
            Ok(())
        })
        .await;
    match outcome {
        Ok(()) => println!("   every service exited cleanly"),
        Err(err) => println!("   session ended with: {err:#}"),
    }

    drop(bus);
    printer.await??;
    Ok(())
}
