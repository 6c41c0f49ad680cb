use std::sync::Arc;

use burst_limiter::{CancellationToken, Error, Limiter};
use tokio::time::{self, Duration, Instant};

#[tokio::test(start_paused = true)]
async fn test_sleep_and_reset() -> anyhow::Result<()> {
    let limiter = Arc::new(Limiter::new(
        CancellationToken::new(),
        5,
        Duration::from_millis(50),
    )?);

    let start = Instant::now();

    let reset = tokio::spawn({
        let limiter = limiter.clone();

        async move {
            limiter
                .sleep_and_reset(Duration::from_millis(200), 2, Duration::from_millis(50))
                .await
        }
    });

    time::sleep(Duration::from_millis(10)).await;

    // Nothing is handed out while the limiter is sleeping.
    assert_eq!(limiter.take().await, Err(Error::Closed));
    assert_eq!(limiter.take().await, Err(Error::Closed));
    assert_eq!(
        Instant::now().duration_since(start),
        Duration::from_millis(10)
    );

    reset.await??;

    assert_eq!(
        Instant::now().duration_since(start),
        Duration::from_millis(200)
    );
    assert_eq!(limiter.limit(), 2);

    limiter.take().await?;
    limiter.take().await?;

    assert_eq!(
        Instant::now().duration_since(start),
        Duration::from_millis(200)
    );

    limiter.take().await?;

    assert_eq!(
        Instant::now().duration_since(start),
        Duration::from_millis(250)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reset_releases_waiters() -> anyhow::Result<()> {
    let limiter = Arc::new(Limiter::new(
        CancellationToken::new(),
        1,
        Duration::from_secs(3600),
    )?);

    limiter.take().await?;

    let blocked = tokio::spawn({
        let limiter = limiter.clone();
        async move { limiter.take().await }
    });

    time::sleep(Duration::from_millis(1)).await;
    assert!(!blocked.is_finished());

    limiter
        .sleep_and_reset(Duration::ZERO, 1, Duration::from_secs(3600))
        .await?;

    assert_eq!(blocked.await?, Err(Error::Closed));

    // A fresh burst is available on the new gate.
    let start = Instant::now();
    limiter.take().await?;
    assert_eq!(Instant::now().duration_since(start), Duration::ZERO);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_resets_are_serialized() -> anyhow::Result<()> {
    let limiter = Limiter::new(CancellationToken::new(), 1, Duration::from_millis(10))?;
    let start = Instant::now();

    let (a, b) = tokio::join!(
        limiter.sleep_and_reset(Duration::from_millis(100), 3, Duration::from_millis(10)),
        limiter.sleep_and_reset(Duration::from_millis(100), 7, Duration::from_millis(10)),
    );

    a?;
    b?;

    assert_eq!(
        Instant::now().duration_since(start),
        Duration::from_millis(200)
    );
    assert_eq!(limiter.limit(), 7);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reset() -> anyhow::Result<()> {
    let limiter = Arc::new(Limiter::new(
        CancellationToken::new(),
        5,
        Duration::from_millis(50),
    )?);

    let reset = tokio::spawn({
        let limiter = limiter.clone();

        async move {
            limiter
                .sleep_and_reset(Duration::from_millis(100), 2, Duration::from_millis(50))
                .await
        }
    });

    time::sleep(Duration::from_millis(10)).await;
    limiter.stop();

    assert_eq!(reset.await?, Err(Error::Stopped));
    assert_eq!(limiter.limit(), 5);
    assert_eq!(limiter.take().await, Err(Error::Closed));

    let result = limiter
        .sleep_and_reset(Duration::ZERO, 2, Duration::from_millis(50))
        .await;
    assert_eq!(result, Err(Error::Stopped));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reset_after_cancellation() -> anyhow::Result<()> {
    let cancellation = CancellationToken::new();
    let limiter = Limiter::new(cancellation.clone(), 5, Duration::from_millis(50))?;

    cancellation.cancel();

    limiter
        .sleep_and_reset(Duration::from_millis(10), 2, Duration::from_millis(50))
        .await?;

    // The new limit is recorded, but the cancellation is permanent.
    assert_eq!(limiter.limit(), 2);
    assert_eq!(limiter.take().await, Err(Error::Closed));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropped_reset_restarts() -> anyhow::Result<()> {
    let limiter = Limiter::new(CancellationToken::new(), 5, Duration::from_millis(50))?;

    let result = time::timeout(
        Duration::from_millis(20),
        limiter.sleep_and_reset(Duration::from_millis(100), 2, Duration::from_millis(50)),
    )
    .await;

    assert!(result.is_err());

    // The new configuration takes over right away instead of leaving the
    // limiter without a refill loop.
    assert!(!limiter.is_stopped());
    assert_eq!(limiter.limit(), 2);

    let start = Instant::now();

    limiter.take().await?;
    limiter.take().await?;

    assert_eq!(Instant::now().duration_since(start), Duration::ZERO);

    limiter.take().await?;
    assert_eq!(
        Instant::now().duration_since(start),
        Duration::from_millis(50)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropped_reset_after_stop() -> anyhow::Result<()> {
    let limiter = Arc::new(Limiter::new(
        CancellationToken::new(),
        5,
        Duration::from_millis(50),
    )?);

    let reset = tokio::spawn({
        let limiter = limiter.clone();

        async move {
            limiter
                .sleep_and_reset(Duration::from_millis(100), 2, Duration::from_millis(50))
                .await
        }
    });

    time::sleep(Duration::from_millis(10)).await;
    limiter.stop();
    reset.abort();
    assert!(reset.await.is_err());

    // Being stopped wins over the interrupted reconfiguration.
    assert!(limiter.is_stopped());
    assert_eq!(limiter.take().await, Err(Error::Closed));
    Ok(())
}
