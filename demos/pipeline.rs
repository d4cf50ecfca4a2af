//! Failure handling: a flaky upstream trips the breaker, then recovers.
//!
//! Run with: cargo run --example pipeline

use std::sync::Arc;
use std::time::Duration;
use upstream_guard::infrastructure::mocks::{ScriptedCall, ScriptedUpstream};
use upstream_guard::{
    BreakerConfig, GuardConfig, OperationRequest, OperationSpec, ServiceContext, StaticResolver,
    TierLimits, TierTable,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tiers = TierTable::builder()
        .with_tier(
            "premium",
            TierLimits {
                requests_per_minute: 600,
                requests_per_hour: 10_000,
                requests_per_day: 100_000,
                burst_allowance: 50,
                max_concurrent: 10,
            },
        )
        .build()?;

    let upstream = Arc::new(ScriptedUpstream::new());
    // Three failures, then recovery
    upstream.push_failures(3, "connection reset by upstream");
    upstream.push(ScriptedCall::Succeed(serde_json::json!({"status": "healthy"})));

    let config = GuardConfig {
        breaker: BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(200),
            ..BreakerConfig::default()
        },
        ..GuardConfig::default()
    };

    let context = ServiceContext::builder()
        .with_tiers(tiers)
        .with_resolver(Arc::new(
            StaticResolver::new().with_identity("demo-key", "demo-user", "premium"),
        ))
        .with_config(config)
        .register_operation(OperationSpec::read(
            "fetch",
            "upstream/fetch",
            upstream.clone(),
        ))
        .initialize()
        .await?;

    let pipeline = context.pipeline();
    let request = OperationRequest::new("fetch", "demo-key");

    // Trip the breaker
    for i in 1..=5 {
        match pipeline.execute(request.clone()).await {
            Ok(outcome) => println!("call {}: ok -> {}", i, outcome.value),
            Err(envelope) => println!("call {}: {} - {}", i, envelope.error, envelope.message),
        }
    }

    for status in context.guard_status().breakers {
        println!("breaker '{}': {}", status.endpoint, status.state);
    }

    // Wait out the recovery timeout; the single probe succeeds and closes
    // the circuit
    tokio::time::sleep(Duration::from_millis(250)).await;
    match pipeline.execute(request).await {
        Ok(outcome) => println!("probe: ok -> {}", outcome.value),
        Err(envelope) => println!("probe: {}", envelope.error),
    }

    println!(
        "upstream handler was invoked {} times",
        upstream.invocations()
    );
    Ok(())
}
