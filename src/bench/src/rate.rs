// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Request rate limiting.

use gale_record::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Limits the global request rate across all workers.
///
/// Every worker calls [acquire][RateLimiter::acquire] before each request.
/// The call blocks until the request may start, or returns an error when
/// the run context is cancelled while waiting.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self, ctx: &CancellationToken) -> Result<()>;
}

/// A limiter that never blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

#[async_trait::async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self, _ctx: &CancellationToken) -> Result<()> {
        Ok(())
    }
}

/// Paces requests to a fixed number per second.
///
/// Slots are handed out at a fixed period; a request arriving late does not
/// entitle later requests to a burst.
#[derive(Debug)]
pub struct OpsPerSec {
    period: std::time::Duration,
    next: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl OpsPerSec {
    /// Creates a limiter allowing `rate` operations per second.
    pub fn new(rate: f64) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::config(format!(
                "request rate must be positive, got {rate}"
            )));
        }
        Ok(Self {
            period: std::time::Duration::from_secs_f64(1.0 / rate),
            next: tokio::sync::Mutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl RateLimiter for OpsPerSec {
    async fn acquire(&self, ctx: &CancellationToken) -> Result<()> {
        let deadline = {
            let mut next = self.next.lock().await;
            let now = tokio::time::Instant::now();
            let at = match *next {
                None => now,
                Some(t) if t < now => now,
                Some(t) => t,
            };
            *next = Some(at + self.period);
            at
        };
        tokio::select! {
            _ = ctx.cancelled() => Err(Error::other("cancelled while waiting for a rate slot")),
            _ = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paces_to_the_configured_rate() -> anyhow::Result<()> {
        let limiter = OpsPerSec::new(10.0)?;
        let ctx = CancellationToken::new();
        let began = tokio::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire(&ctx).await?;
        }
        // First slot is immediate, the remaining four are 100ms apart.
        let elapsed = tokio::time::Instant::now() - began;
        assert_eq!(elapsed.as_millis(), 400);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_waiters() -> anyhow::Result<()> {
        let limiter = OpsPerSec::new(0.001)?;
        let ctx = CancellationToken::new();
        limiter.acquire(&ctx).await?;
        let waiter = {
            let ctx = ctx.clone();
            async move { limiter.acquire(&ctx).await }
        };
        ctx.cancel();
        assert!(waiter.await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unlimited_never_blocks() -> anyhow::Result<()> {
        let ctx = CancellationToken::new();
        Unlimited.acquire(&ctx).await?;
        ctx.cancel();
        Unlimited.acquire(&ctx).await?;
        Ok(())
    }

    #[test]
    fn invalid_rates_are_rejected() {
        assert!(OpsPerSec::new(0.0).is_err());
        assert!(OpsPerSec::new(-5.0).is_err());
        assert!(OpsPerSec::new(f64::NAN).is_err());
    }
}
