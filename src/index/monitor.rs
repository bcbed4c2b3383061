//! Background index maintenance
//!
//! Runs the periodic scan and a debounced rescan after DOM mutations.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::core::config::IndexConfig;
use crate::dom::{DomEvent, EventFilter, EventKind, Page, Subscription};
use crate::index::store::{ScanReport, SharedIndex};

/// Handle to the running scan task; dropping it stops the task
#[derive(Debug)]
pub struct IndexMonitor {
    handle: Option<JoinHandle<()>>,
}

impl IndexMonitor {
    pub fn start(page: Page, index: SharedIndex, config: &IndexConfig) -> Self {
        let (subscription, events) = page
            .events()
            .subscribe(EventFilter::kinds([EventKind::Mutation]).passive());
        let period = Duration::from_millis(config.scan_interval_ms.max(1));
        let debounce = Duration::from_millis(config.mutation_debounce_ms);
        let handle = tokio::spawn(run(page, index, subscription, events, period, debounce));
        info!(interval_ms = period.as_millis() as u64, "index monitor started");
        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("index monitor stopped");
        }
    }
}

impl Drop for IndexMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One budgeted scan against the current document
pub fn scan_once(page: &Page, index: &SharedIndex) -> ScanReport {
    let doc = page.read();
    index.lock().scan(&doc)
}

async fn run(
    page: Page,
    index: SharedIndex,
    _subscription: Subscription,
    mut events: UnboundedReceiver<DomEvent>,
    period: Duration,
    debounce: Duration,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pending: Option<Instant> = None;

    loop {
        let rescan_due = async move {
            match pending {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = ticker.tick() => {
                scan_once(&page, &index);
            }
            event = events.recv() => match event {
                Some(_) => {
                    // Each mutation pushes the rescan back
                    pending = Some(Instant::now() + debounce);
                }
                None => break,
            },
            _ = rescan_due => {
                pending = None;
                let report = scan_once(&page, &index);
                debug!(visited = report.visited, "mutation rescan");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rect;
    use crate::dom::Document;
    use crate::index::store::ElementIndex;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_scans_periodically_and_on_mutation() {
        let page = Page::new(Document::with_body());
        let config = IndexConfig {
            scan_interval_ms: 60_000,
            mutation_debounce_ms: 100,
            max_scan_millis: 10_000,
            ..Default::default()
        };
        let index = ElementIndex::new(config.clone()).shared();
        let mut monitor = IndexMonitor::start(page.clone(), index.clone(), &config);

        // The first tick fires immediately
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(index.lock().stats().scans, 1);

        let body = page.read().body().unwrap();
        page.mutate(|doc| {
            let b = doc.append_element(body, "button", &[]);
            doc.append_text(b, "Late");
            doc.set_rect(b, Rect::new(0.0, 0.0, 10.0, 10.0));
        });
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(index.lock().stats().scans, 2);
        assert_eq!(index.lock().len(), 1);

        monitor.stop();
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(page.events().listener_count(), 0);
    }
}
