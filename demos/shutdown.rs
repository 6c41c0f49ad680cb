use anyhow::Result;
use burst_limiter::{CancellationToken, Limiter};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    helpers::init_logging();

    let cancellation = CancellationToken::new();
    let limiter = Arc::new(Limiter::new(
        cancellation.clone(),
        1,
        Duration::from_secs(60),
    )?);

    limiter.take().await?;

    let mut tasks = Vec::new();

    for n in 0..4 {
        let limiter = limiter.clone();

        tasks.push(tokio::spawn(async move {
            // Blocks until the next minute, or until cancelled.
            let result = limiter.take().await;
            println!("waiter {}: {:?}", n, result);
        }));
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("cancelling");
    cancellation.cancel();

    for task in tasks {
        task.await?;
    }

    Ok(())
}
