//! Inbound frame rate telemetry
//!
//! Once per interval the connection manager hands the transport's stats snapshot to the
//! sampler, which publishes the average frame rate over all inbound video reports on a
//! read-only gauge.

use std::time::Duration;

use str0m::media::MediaKind;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::transport::StatsSnapshot;

/// Average frame rate over the video reports in `snapshot`.
///
/// Reports that have not measured a frame rate yet are skipped. With no video report at
/// all the average is `0.0`.
pub fn average_video_fps(snapshot: &StatsSnapshot) -> f64 {
    let (sum, count) = snapshot
        .reports
        .iter()
        .filter(|r| r.kind == MediaKind::Video)
        .filter_map(|r| r.frames_per_second)
        .fold((0.0, 0u32), |(sum, count), fps| (sum + fps, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}

/// Read side of the frame rate gauge.
#[derive(Debug, Clone)]
pub struct FrameRateGauge {
    rx: watch::Receiver<f64>,
}

impl FrameRateGauge {
    pub fn get(&self) -> f64 {
        *self.rx.borrow()
    }

    /// Waits for the next published value. Returns `None` once the sampler is gone.
    pub async fn changed(&mut self) -> Option<f64> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[derive(Debug)]
pub struct StatsSampler {
    period: Duration,
    tx: watch::Sender<f64>,
    ticker: Option<Interval>,
}

impl StatsSampler {
    pub fn new(period: Duration) -> Self {
        let (tx, _) = watch::channel(0.0);
        Self {
            period,
            tx,
            ticker: None,
        }
    }

    pub fn gauge(&self) -> FrameRateGauge {
        FrameRateGauge {
            rx: self.tx.subscribe(),
        }
    }

    pub fn start(&mut self) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    pub fn stop(&mut self) {
        self.ticker = None;
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Resolves on the next sampling tick. Pending forever while stopped.
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Publishes the average for `snapshot` and returns it.
    pub fn record(&self, snapshot: &StatsSnapshot) -> f64 {
        let fps = average_video_fps(snapshot);
        debug!("Inbound video: {:.1} fps over {} reports", fps, snapshot.reports.len());
        self.tx.send_replace(fps);
        fps
    }
}
