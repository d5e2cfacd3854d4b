//! Bounded, cancellable condition polling.
//!
//! Every wait has an explicit timeout. The delay between two evaluations is
//! raced against the run's cancellation token, so a waiting call returns
//! `Cancelled` within one scheduler turn of the token firing rather than at
//! the next poll tick.

use crate::emitter::{is_clickable, is_visible};
use crate::error::{AutomationError, Result};
use crate::mapping::normalize_label;
use crate::Page;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of a wait where absence is a legitimate answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<E> {
    Found(E),
    NotFound,
}

/// Polls conditions at a fixed interval until they hold, time runs out, or
/// the run is cancelled.
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    /// Same token, different cadence. For call sites that trade CPU for latency.
    pub fn with_interval(&self, interval: Duration) -> Self {
        Self {
            interval,
            cancel: self.cancel.clone(),
        }
    }

    /// Fixed settle delay that still aborts on cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AutomationError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Evaluate `probe` until it yields a value.
    pub async fn until<T, F>(&self, what: &str, timeout: Duration, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Option<T>,
    {
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            if self.cancel.is_cancelled() {
                return Err(AutomationError::Cancelled);
            }
            if let Some(value) = probe() {
                return Ok(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AutomationError::Timeout {
                    what: what.to_string(),
                    waited_ms: (now - start).as_millis() as u64,
                });
            }

            self.sleep(self.interval.min(deadline - now)).await?;
        }
    }

    /// Wait for the first laid-out match of `selector` under `root`.
    ///
    /// A match with zero rendered width does not count: frameworks often
    /// insert placeholders before populating them.
    pub async fn element<P: Page>(
        &self,
        page: &P,
        root: Option<&P::Element>,
        selector: &str,
        timeout: Duration,
    ) -> Result<P::Element> {
        self.until(selector, timeout, || {
            page.query_all(root, selector)
                .into_iter()
                .find(|el| page.bounding_rect(el).width > 0.0)
        })
        .await
    }

    /// Wait until hit-testing the element's centre lands on it or a descendant.
    pub async fn clickable<P: Page>(
        &self,
        page: &P,
        element: &P::Element,
        timeout: Duration,
    ) -> Result<()> {
        self.until("element to become clickable", timeout, || {
            is_clickable(page, element).then_some(())
        })
        .await
    }

    pub async fn enabled<P: Page>(
        &self,
        page: &P,
        element: &P::Element,
        timeout: Duration,
    ) -> Result<()> {
        self.until("element to become enabled", timeout, || {
            (!page.is_disabled(element)).then_some(())
        })
        .await
    }

    /// Wait for the visible overlay with the highest z-index.
    pub async fn topmost_modal<P: Page>(
        &self,
        page: &P,
        selector_group: &str,
        timeout: Duration,
    ) -> Result<P::Element> {
        self.until("modal/dialog to appear", timeout, || {
            page.query_all(None, selector_group)
                .into_iter()
                .filter(|el| is_visible(page, el))
                .fold(None, |best: Option<(f64, P::Element)>, el| {
                    let z = page.z_index(&el);
                    match best {
                        Some((best_z, _)) if best_z >= z => best,
                        _ => Some((z, el)),
                    }
                })
                .map(|(_, el)| el)
        })
        .await
    }

    /// Three-way wait after a search: a result row, an explicit empty
    /// indicator, or neither yet.
    ///
    /// Indicators listed in `stale` were on screen before the search and do
    /// not count; a page that keeps showing the previous "no results" while
    /// the new query loads would otherwise skip a real match. Running out of
    /// time with neither present also resolves to [`Lookup::NotFound`].
    pub async fn row_or_empty<P: Page>(
        &self,
        page: &P,
        root: Option<&P::Element>,
        row_selector: &str,
        empty_selector: &str,
        stale: &[P::Element],
        timeout: Duration,
    ) -> Result<Lookup<P::Element>> {
        let waited = self
            .until("search results", timeout, || {
                let laid_out = |selector: &str| {
                    page.query_all(root, selector)
                        .into_iter()
                        .filter(|el| !stale.contains(el))
                        .find(|el| page.bounding_rect(el).width > 0.0)
                };
                if let Some(row) = laid_out(row_selector) {
                    return Some(Lookup::Found(row));
                }
                laid_out(empty_selector).map(|_| Lookup::NotFound)
            })
            .await;

        match waited {
            Err(AutomationError::Timeout { waited_ms, .. }) => {
                tracing::debug!(waited_ms, row_selector, "no result row before timeout");
                Ok(Lookup::NotFound)
            }
            other => other,
        }
    }

    /// Wait for a laid-out match of `selector` whose visible text equals
    /// `label` (case and whitespace normalized).
    ///
    /// Used for dropdown options, which can populate after the control renders.
    pub async fn labelled<P: Page>(
        &self,
        page: &P,
        root: Option<&P::Element>,
        selector: &str,
        label: &str,
        timeout: Duration,
    ) -> Result<P::Element> {
        let wanted = normalize_label(label);
        let what = format!("\"{}\" in {}", label, selector);
        self.until(&what, timeout, || {
            page.query_all(root, selector).into_iter().find(|el| {
                page.bounding_rect(el).width > 0.0
                    && normalize_label(&page.text_content(el)) == wanted
            })
        })
        .await
    }
}
