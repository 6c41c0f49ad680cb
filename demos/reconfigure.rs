use anyhow::Result;
use burst_limiter::{CancellationToken, Limiter};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<()> {
    helpers::init_logging();

    let limiter = Arc::new(Limiter::new(
        CancellationToken::new(),
        10,
        Duration::from_millis(500),
    )?);

    let start = Instant::now();

    let worker = tokio::spawn({
        let limiter = limiter.clone();

        async move {
            let mut granted = 0;
            let mut denied = 0;

            while start.elapsed() < Duration::from_secs(4) {
                match limiter.take().await {
                    Ok(()) => granted += 1,
                    Err(error) => {
                        denied += 1;
                        println!("denied after {:?}: {}", start.elapsed(), error);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }

            (granted, denied)
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;

    println!("backing off, limit was {}", limiter.limit());
    limiter
        .sleep_and_reset(Duration::from_secs(1), 2, Duration::from_millis(500))
        .await?;
    println!("resumed with limit {}", limiter.limit());

    let (granted, denied) = worker.await?;
    println!("granted: {}, denied: {}", granted, denied);
    Ok(())
}
