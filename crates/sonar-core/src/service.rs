//! The probe service contract and its basic implementation.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::context::CallContext;
use crate::error::{ProbeError, SonarError, SonarResult};

/// Payload returned by a successful probe.
pub const PONG: &str = "pong";

/// Default share of probes that fail on purpose.
pub const DEFAULT_FAILURE_RATE: f64 = 0.1;

/// The probe capability.
///
/// Decorators, the endpoint set and transport clients all implement this
/// trait, so any of them can stand in for the basic service.
///
/// # Example
///
/// ```rust,ignore
/// use sonar_core::{CallContext, ProbeService, SonarResult};
///
/// struct AlwaysUp;
///
/// impl ProbeService for AlwaysUp {
///     async fn ping(&self, _ctx: &CallContext) -> SonarResult<String> {
///         Ok("pong".to_string())
///     }
/// }
/// ```
pub trait ProbeService: Send + Sync + 'static {
    /// Probes liveness and returns a payload.
    ///
    /// # Errors
    ///
    /// Returns [`SonarError::Probe`] for a domain failure, or any other
    /// [`SonarError`] when the call did not reach the service.
    fn ping(&self, ctx: &CallContext) -> impl Future<Output = SonarResult<String>> + Send;
}

impl<S: ProbeService> ProbeService for Arc<S> {
    fn ping(&self, ctx: &CallContext) -> impl Future<Output = SonarResult<String>> + Send {
        (**self).ping(ctx)
    }
}

/// A stateless probe that succeeds with [`PONG`] or fails with the
/// sentinel [`ProbeError::Failed`].
///
/// Entropy comes from a [`StdRng`] seeded once at construction.
#[derive(Debug)]
pub struct BasicService {
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl BasicService {
    /// Creates a service seeded from the operating system.
    pub fn new(failure_rate: f64) -> SonarResult<Self> {
        Self::with_rng(failure_rate, StdRng::from_os_rng())
    }

    /// Creates a service with a fixed seed, for reproducible runs.
    pub fn seeded(failure_rate: f64, seed: u64) -> SonarResult<Self> {
        Self::with_rng(failure_rate, StdRng::seed_from_u64(seed))
    }

    /// Creates a service drawing from the given generator.
    pub fn with_rng(failure_rate: f64, rng: StdRng) -> SonarResult<Self> {
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(SonarError::config(format!(
                "failure rate must be between 0.0 and 1.0, got {failure_rate}"
            )));
        }
        Ok(Self {
            failure_rate,
            rng: Mutex::new(rng),
        })
    }

    /// Returns the configured failure rate.
    #[must_use]
    pub const fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    fn roll(&self) -> Result<String, ProbeError> {
        let sample: f64 = self.rng.lock().random();
        if sample < self.failure_rate {
            Err(ProbeError::Failed)
        } else {
            Ok(PONG.to_string())
        }
    }
}

impl ProbeService for BasicService {
    async fn ping(&self, _ctx: &CallContext) -> SonarResult<String> {
        self.roll().map_err(SonarError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_rate() {
        assert!(BasicService::seeded(-0.1, 1).is_err());
        assert!(BasicService::seeded(1.5, 1).is_err());
        assert!(BasicService::seeded(f64::NAN, 1).is_err());
        assert!(BasicService::seeded(0.0, 1).is_ok());
        assert!(BasicService::seeded(1.0, 1).is_ok());
    }

    #[tokio::test]
    async fn test_zero_rate_always_pongs() {
        let svc = BasicService::seeded(0.0, 42).unwrap();
        let ctx = CallContext::new();
        for _ in 0..1000 {
            assert_eq!(svc.ping(&ctx).await.unwrap(), PONG);
        }
    }

    #[tokio::test]
    async fn test_full_rate_always_fails_with_sentinel() {
        let svc = BasicService::seeded(1.0, 42).unwrap();
        let ctx = CallContext::new();
        for _ in 0..1000 {
            let err = svc.ping(&ctx).await.unwrap_err();
            assert_eq!(err, SonarError::Probe(ProbeError::Failed));
        }
    }

    #[tokio::test]
    async fn test_failure_rate_is_statistically_honored() {
        let svc = BasicService::seeded(DEFAULT_FAILURE_RATE, 7).unwrap();
        let ctx = CallContext::new();
        let samples = 20_000;
        let mut failures = 0;
        for _ in 0..samples {
            if svc.ping(&ctx).await.is_err() {
                failures += 1;
            }
        }
        let observed = f64::from(failures) / f64::from(samples);
        assert!(
            (observed - DEFAULT_FAILURE_RATE).abs() < 0.02,
            "observed failure rate {observed}"
        );
    }

    #[tokio::test]
    async fn test_same_seed_same_sequence() {
        let a = BasicService::seeded(0.5, 99).unwrap();
        let b = BasicService::seeded(0.5, 99).unwrap();
        let ctx = CallContext::new();
        for _ in 0..100 {
            assert_eq!(a.ping(&ctx).await.is_ok(), b.ping(&ctx).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_arc_forwards() {
        let svc = Arc::new(BasicService::seeded(0.0, 1).unwrap());
        assert_eq!(svc.ping(&CallContext::new()).await.unwrap(), PONG);
    }
}
