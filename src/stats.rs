use log::{debug, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use webrtckit_core::signaling::now_millis;

use crate::peer::PeerConnectionManager;

pub use webrtckit_core::stats::*;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the peer connection's stats and publishes digested reports.
pub struct RtcStatsCollector {
    peer: Arc<PeerConnectionManager>,
    interval: Duration,
    latest: Arc<watch::Sender<Option<RtcStatsReport>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RtcStatsCollector {
    /// A zero `interval` polls at [`DEFAULT_STATS_INTERVAL`].
    pub fn new(peer: Arc<PeerConnectionManager>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_STATS_INTERVAL
        } else {
            interval
        };
        Self {
            peer,
            interval,
            latest: Arc::new(watch::channel(None).0),
            task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RtcStatsReport>> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> Option<RtcStatsReport> {
        self.latest.borrow().clone()
    }

    /// Starts polling; a collector that is already running keeps its task.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        debug!("Starting stats collection every {:?}", self.interval);
        *task = Some(tokio::spawn(poll_stats(
            Arc::clone(&self.peer),
            self.interval,
            Arc::clone(&self.latest),
        )));
    }

    /// Stops polling and clears the last report.
    pub async fn stop(&self) {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            debug!("Stopped stats collection");
        }
        self.latest.send_replace(None);
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }
}

impl Drop for RtcStatsCollector {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

async fn poll_stats(
    peer: Arc<PeerConnectionManager>,
    every: Duration,
    latest: Arc<watch::Sender<Option<RtcStatsReport>>>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut previous = None;

    loop {
        ticker.tick().await;
        let entries = match peer.collect_stats().await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(target: "Stats/Collector", "Skipping stats tick: {e}");
                continue;
            }
        };
        let (report, sample) = parse_report(&entries, now_millis(), previous);
        previous = Some(sample);
        trace!(
            target: "Stats/Collector",
            "rtt={:.0}ms loss={:.1}% bitrate={:.0}bps quality={}",
            report.rtt_ms,
            report.packet_loss,
            report.bitrate_bps,
            report.quality_score
        );
        latest.send_replace(Some(report));
    }
}
