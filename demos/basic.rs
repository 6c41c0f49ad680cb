use anyhow::Result;
use burst_limiter::{CancellationToken, Limiter};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<()> {
    helpers::init_logging();

    let limiter = Limiter::new(CancellationToken::new(), 3, Duration::from_secs(1))?;
    let start = Instant::now();

    // The first three are instant, then three per second.
    for n in 0..10 {
        limiter.take().await?;
        println!("permit {} after {:?}", n, start.elapsed());
    }

    Ok(())
}
