//! Fixed-rate pose sampling
//!
//! A [`PoseScheduler`] ticks at the configured rate and asks every registered
//! [`PoseProducer`] for its events. Producers read their state from host supplied sources:
//! [`PoseSource`] for the headset and controllers, [`HandSource`] for tracked hands.

use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

use crate::codec::{Device, Finger, HandGesture, HandJoint, InputEvent, Pose, Vec3};

const GRIP_LONG_START_DISTANCE: f32 = 0.15;
const GRIP_SHORT_START_DISTANCE: f32 = 0.125;
const GRIP_END_DISTANCE: f32 = 0.12;
const PINCH_START_DISTANCE: f32 = 0.015;
const PINCH_END_DISTANCE: f32 = 0.015;

/// Something sampled once per scheduler tick.
pub trait PoseProducer: Send {
    fn sample(&mut self, out: &mut Vec<InputEvent>);
}

/// Current pose of a headset or controller, `None` while untracked.
pub trait PoseSource: Send {
    fn pose(&mut self) -> Option<Pose>;
}

/// Joint poses of one hand for the current frame, `None` while untracked.
pub trait HandSource: Send {
    fn frame(&mut self) -> Option<HandFrame>;
}

impl<F> PoseSource for F
where
    F: FnMut() -> Option<Pose> + Send,
{
    fn pose(&mut self) -> Option<Pose> {
        self()
    }
}

/// All joints of a hand. `fingers[f][j]` is joint `j` of finger `f`, metacarpal first; the
/// thumb uses joints 0..=3.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandFrame {
    pub wrist: Pose,
    pub fingers: [[Pose; 5]; 5],
}

impl HandFrame {
    pub fn pose(&self, joint: HandJoint) -> Pose {
        match joint {
            HandJoint::Wrist => self.wrist,
            HandJoint::Digit { finger, joint } => self.fingers[finger as usize][usize::from(joint)],
        }
    }

    pub fn tip(&self, finger: Finger) -> Vec3 {
        let tip = *finger.joints().end();
        self.fingers[finger as usize][usize::from(tip)].position
    }
}

/// Sends `PosRot` for one tracked device.
pub struct TrackedDevice<S> {
    device: Device,
    source: S,
}

impl<S: PoseSource> TrackedDevice<S> {
    pub fn new(device: Device, source: S) -> Self {
        Self { device, source }
    }
}

impl<S: PoseSource> PoseProducer for TrackedDevice<S> {
    fn sample(&mut self, out: &mut Vec<InputEvent>) {
        if let Some(pose) = self.source.pose() {
            out.push(InputEvent::PosRot {
                device: self.device,
                pose,
            });
        }
    }
}

/// Grip and pinch detection with the hysteresis of the headset runtime.
#[derive(Debug, Default)]
pub struct GestureDetector {
    gripping: bool,
    pinch_origin: Option<Vec3>,
}

impl GestureDetector {
    pub fn is_gripping(&self) -> bool {
        self.gripping
    }

    pub fn is_pinching(&self) -> bool {
        self.pinch_origin.is_some()
    }

    pub fn update(&mut self, device: Device, frame: &HandFrame, out: &mut Vec<InputEvent>) {
        let wrist = frame.wrist.position;
        let thumb = frame.tip(Finger::Thumb);
        let tips = [Finger::Index, Finger::Middle, Finger::Ring, Finger::Little].map(|f| frame.tip(f));

        if wrist.is_finite() && tips.iter().all(|t| t.is_finite()) {
            let [d1, d2, d3, d4] = tips.map(|t| t.distance(wrist));

            if !self.gripping
                && d1 < GRIP_LONG_START_DISTANCE
                && d2 < GRIP_LONG_START_DISTANCE
                && d3 < GRIP_SHORT_START_DISTANCE
                && d4 < GRIP_SHORT_START_DISTANCE
            {
                self.gripping = true;
                out.push(InputEvent::HandGesture {
                    device,
                    gesture: HandGesture::Grip,
                    active: true,
                });
            }
            // Checked after the start so a hand resting between the end and start distances
            // reports a start and an end in the same tick.
            if self.gripping && [d1, d2, d3, d4].iter().all(|d| *d > GRIP_END_DISTANCE) {
                self.gripping = false;
                out.push(InputEvent::HandGesture {
                    device,
                    gesture: HandGesture::Grip,
                    active: false,
                });
            }
        }

        let index = tips[0];
        if !thumb.is_finite() || !index.is_finite() {
            return;
        }

        let distance = thumb.distance(index);
        if self.pinch_origin.is_none() && distance < PINCH_START_DISTANCE {
            self.pinch_origin = Some(thumb);
        } else if self.pinch_origin.is_some() && distance > PINCH_END_DISTANCE {
            self.pinch_origin = None;
            out.push(InputEvent::Axis {
                device,
                x: 0.0,
                y: 0.0,
            });
        }

        // The renderer reads a pinch drag as a horizontal thumbstick: x and z of the offset.
        if let Some(origin) = self.pinch_origin {
            let offset = thumb - origin;
            out.push(InputEvent::Axis {
                device,
                x: offset.x,
                y: offset.z,
            });
        }
    }
}

/// Sends every transmittable joint of one hand, wrist first, plus detected gestures.
pub struct TrackedHand<S> {
    device: Device,
    source: S,
    gestures: GestureDetector,
}

impl<S: HandSource> TrackedHand<S> {
    pub fn new(device: Device, source: S) -> Self {
        Self {
            device,
            source,
            gestures: GestureDetector::default(),
        }
    }
}

impl<S: HandSource> PoseProducer for TrackedHand<S> {
    fn sample(&mut self, out: &mut Vec<InputEvent>) {
        let Some(frame) = self.source.frame() else {
            return;
        };

        for joint in HandJoint::all() {
            let pose = frame.pose(joint);
            if pose.is_finite() {
                out.push(InputEvent::HandPose {
                    device: self.device,
                    joint,
                    pose,
                });
            }
        }

        self.gestures.update(self.device, &frame, out);
    }
}

/// Runs the producers at a fixed rate while active.
pub struct PoseScheduler {
    period: Duration,
    producers: Vec<Box<dyn PoseProducer>>,
    ticker: Option<Interval>,
}

impl PoseScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            producers: vec![],
            ticker: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn add(&mut self, producer: impl PoseProducer + 'static) {
        self.producers.push(Box::new(producer));
    }

    pub fn is_active(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn resume(&mut self) {
        if self.ticker.is_none() {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            self.ticker = Some(ticker);
        }
    }

    pub fn pause(&mut self) {
        self.ticker = None;
    }

    /// One sampling pass. Events with non-finite values are dropped.
    pub fn sample(&mut self) -> Vec<InputEvent> {
        let mut out = vec![];
        for producer in &mut self.producers {
            producer.sample(&mut out);
        }
        let before = out.len();
        out.retain(InputEvent::is_finite);
        if out.len() != before {
            debug!("Dropped {} non-finite pose events", before - out.len());
        }
        out
    }

    /// Waits for the next tick and samples. Pending forever while paused.
    pub async fn tick(&mut self) -> Vec<InputEvent> {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
        self.sample()
    }
}
