//! Minimal wiring: one tier, one operation, a few requests.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;
use std::time::Duration;
use upstream_guard::infrastructure::mocks::ScriptedUpstream;
use upstream_guard::{
    OperationRequest, OperationSpec, ServiceContext, StaticResolver, TierLimits, TierTable,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tiers = TierTable::builder()
        .with_tier(
            "basic",
            TierLimits {
                requests_per_minute: 3,
                requests_per_hour: 100,
                requests_per_day: 1_000,
                burst_allowance: 0,
                max_concurrent: 2,
            },
        )
        .build()?;

    let resolver = StaticResolver::new().with_identity("demo-key", "demo-user", "basic");

    let context = ServiceContext::builder()
        .with_tiers(tiers)
        .with_resolver(Arc::new(resolver))
        .register_operation(OperationSpec::cached_read(
            "search",
            "upstream/search",
            "search",
            Duration::from_secs(60),
            Arc::new(ScriptedUpstream::new()),
        ))
        .initialize()
        .await?;

    let pipeline = context.pipeline();

    for i in 1..=5 {
        let request = OperationRequest::new("search", "demo-key")
            .with_args(serde_json::json!({"q": format!("query {}", i % 2)}));

        match pipeline.execute(request).await {
            Ok(outcome) => println!(
                "request {}: ok via {:?} -> {}",
                i, outcome.cache, outcome.value
            ),
            Err(envelope) => println!(
                "request {}: {} (retry_after: {:?})",
                i, envelope.error, envelope.retry_after
            ),
        }
    }

    let status = context.rate_limit_status("demo-key").await?;
    println!("remaining this minute: {}", status.per_minute.remaining);

    context.shutdown();
    Ok(())
}
