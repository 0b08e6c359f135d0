//! Row discovery over a lazily loaded table
//!
//! Probes the table until either the target count is rendered or the row
//! count stops growing for `stagnation_threshold` consecutive probes. Each
//! call to [`DiscoveryEngine::discover`] starts from a fresh state.

use std::time::Duration;

use coa_common::config::DiscoveryConfig;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::page::RowTable;
use crate::probe::Probe;

/// Why a discovery episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TargetReached,
    /// No growth for `stagnation_threshold` consecutive probes
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// Last observed rendered row count
    pub final_count: usize,
    /// `min(target, final_count)`
    pub lots_to_test: usize,
    pub probes: usize,
    pub stop: StopReason,
}

/// Transient per-episode bookkeeping
#[derive(Debug)]
struct DiscoveryState {
    rendered_count: Option<usize>,
    stagnant_probes: usize,
    target_count: usize,
    stagnation_threshold: usize,
}

enum Step {
    Stop(StopReason),
    Probe,
}

impl DiscoveryState {
    fn new(target_count: usize, stagnation_threshold: usize) -> Self {
        Self {
            rendered_count: None,
            stagnant_probes: 0,
            target_count,
            stagnation_threshold,
        }
    }

    fn observe(&mut self, count: usize) -> Step {
        let previous = self.rendered_count.replace(count);
        if count >= self.target_count {
            return Step::Stop(StopReason::TargetReached);
        }
        match previous {
            Some(prev) if count <= prev => {
                self.stagnant_probes += 1;
                if self.stagnant_probes >= self.stagnation_threshold {
                    return Step::Stop(StopReason::Exhausted);
                }
            }
            _ => self.stagnant_probes = 0,
        }
        Step::Probe
    }
}

/// Reveals rows until the target is met or the source is exhausted
pub struct DiscoveryEngine<'a> {
    target_count: usize,
    stagnation_threshold: usize,
    settle_delay: Duration,
    timeout: Duration,
    probe: &'a dyn Probe,
}

impl<'a> DiscoveryEngine<'a> {
    pub fn new(config: &DiscoveryConfig, probe: &'a dyn Probe) -> Self {
        Self {
            target_count: config.target_lot_count,
            stagnation_threshold: config.stagnation_threshold.max(1),
            settle_delay: config.settle_delay(),
            timeout: config.timeout(),
            probe,
        }
    }

    /// Run one discovery episode; a timeout or a failing count query is fatal
    pub async fn discover(&self, table: &dyn RowTable) -> E2eResult<DiscoveryOutcome> {
        match tokio::time::timeout(self.timeout, self.run(table)).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::DiscoveryTimeout(self.timeout)),
        }
    }

    async fn run(&self, table: &dyn RowTable) -> E2eResult<DiscoveryOutcome> {
        let mut state = DiscoveryState::new(self.target_count, self.stagnation_threshold);
        let mut probes = 0;

        loop {
            let count = table
                .row_count()
                .await
                .map_err(|e| E2eError::CountQuery(e.to_string()))?;

            if let Step::Stop(stop) = state.observe(count) {
                let outcome = DiscoveryOutcome {
                    final_count: count,
                    lots_to_test: count.min(self.target_count),
                    probes,
                    stop,
                };
                info!(
                    "Discovery finished: {} row(s) rendered, {} to test ({:?} after {} probe(s))",
                    outcome.final_count, outcome.lots_to_test, outcome.stop, outcome.probes
                );
                return Ok(outcome);
            }

            debug!(
                "Probing for more rows via {} ({} rendered, {} stagnant)",
                self.probe.name(),
                count,
                state.stagnant_probes
            );
            if let Err(e) = self.probe.probe(table, count).await {
                warn!("Probe failed: {}", e);
            }
            probes += 1;
            sleep(self.settle_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::LastRowIntoView;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use test_case::test_case;

    /// Loads `step` more rows on every hover, up to `total`
    struct Source {
        total: usize,
        step: usize,
        rendered: AtomicUsize,
        probes: AtomicUsize,
    }

    impl Source {
        fn new(total: usize, step: usize) -> Self {
            Self {
                total,
                step,
                rendered: AtomicUsize::new(step.min(total)),
                probes: AtomicUsize::new(0),
            }
        }

        fn load_more(&self) {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let now = self.rendered.load(Ordering::SeqCst);
            self.rendered
                .store((now + self.step).min(self.total), Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RowTable for Source {
        async fn row_count(&self) -> E2eResult<usize> {
            Ok(self.rendered.load(Ordering::SeqCst))
        }
        async fn scroll_row_into_view(&self, _index: usize) -> E2eResult<()> {
            Ok(())
        }
        async fn hover_row(&self, _index: usize) -> E2eResult<()> {
            self.load_more();
            Ok(())
        }
        async fn scroll_table_by(&self, _pixels: i64) -> E2eResult<()> {
            self.load_more();
            Ok(())
        }
    }

    /// Always grows by one row, never reaching the target in time
    struct Endless {
        rendered: AtomicUsize,
    }

    #[async_trait]
    impl RowTable for Endless {
        async fn row_count(&self) -> E2eResult<usize> {
            Ok(self.rendered.load(Ordering::SeqCst))
        }
        async fn scroll_row_into_view(&self, _index: usize) -> E2eResult<()> {
            Ok(())
        }
        async fn hover_row(&self, _index: usize) -> E2eResult<()> {
            self.rendered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn scroll_table_by(&self, _pixels: i64) -> E2eResult<()> {
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl RowTable for Broken {
        async fn row_count(&self) -> E2eResult<usize> {
            Err(E2eError::Browser("target closed".to_string()))
        }
        async fn scroll_row_into_view(&self, _index: usize) -> E2eResult<()> {
            Ok(())
        }
        async fn hover_row(&self, _index: usize) -> E2eResult<()> {
            Ok(())
        }
        async fn scroll_table_by(&self, _pixels: i64) -> E2eResult<()> {
            Ok(())
        }
    }

    fn config(target: usize, threshold: usize) -> DiscoveryConfig {
        DiscoveryConfig {
            target_lot_count: target,
            stagnation_threshold: threshold,
            ..Default::default()
        }
    }

    #[test_case(30, 100, 10 ; "target reached exactly")]
    #[test_case(30, 100, 7 ; "target overshot by load step")]
    #[test_case(30, 12, 5 ; "source smaller than target")]
    #[test_case(5, 5, 5 ; "first page equals target")]
    #[test_case(30, 0, 10 ; "empty source")]
    #[tokio::test(start_paused = true)]
    async fn test_lots_to_test_is_min_of_target_and_total(target: usize, total: usize, step: usize) {
        let source = Source::new(total, step);
        let probe = LastRowIntoView;
        let engine = DiscoveryEngine::new(&config(target, 3), &probe);

        let outcome = engine.discover(&source).await.unwrap();

        assert_eq!(outcome.lots_to_test, target.min(total));
        if total < target {
            assert_eq!(outcome.final_count, total);
            assert_eq!(outcome.stop, StopReason::Exhausted);
        } else {
            assert!(outcome.final_count >= target);
            assert_eq!(outcome.stop, StopReason::TargetReached);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_threshold_stagnant_probes() {
        let source = Source::new(12, 5);
        let probe = LastRowIntoView;
        let engine = DiscoveryEngine::new(&config(30, 3), &probe);

        let outcome = engine.discover(&source).await.unwrap();

        // 5 -> 10 -> 12, then three probes without growth
        assert_eq!(outcome.final_count, 12);
        assert_eq!(outcome.probes, 2 + 3);
        assert_eq!(source.probes.load(Ordering::SeqCst), outcome.probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rows_terminates_via_stagnation() {
        let source = Source::new(0, 10);
        let probe = LastRowIntoView;
        let engine = DiscoveryEngine::new(&config(30, 2), &probe);

        let outcome = engine.discover(&source).await.unwrap();

        assert_eq!(outcome.final_count, 0);
        assert_eq!(outcome.lots_to_test, 0);
        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.probes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_settling_source_hits_timeout() {
        let source = Endless {
            rendered: AtomicUsize::new(1),
        };
        let probe = LastRowIntoView;
        let mut cfg = config(1_000_000, 3);
        cfg.timeout_secs = 60;
        let engine = DiscoveryEngine::new(&cfg, &probe);

        let err = engine.discover(&source).await.unwrap_err();

        assert!(matches!(err, E2eError::DiscoveryTimeout(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_query_failure_is_fatal() {
        let probe = LastRowIntoView;
        let engine = DiscoveryEngine::new(&config(30, 3), &probe);

        let err = engine.discover(&Broken).await.unwrap_err();

        assert!(matches!(err, E2eError::CountQuery(_)));
        assert!(err.is_fatal());
    }
}
