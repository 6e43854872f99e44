//! Input domain: tracked device poses, controller buttons and axes, display size, hand tracking.
//!
//! | Subtype              | Bytes | Layout after `[domain, subtype]`                       |
//! |----------------------|-------|--------------------------------------------------------|
//! | PosRot               | 59    | device@2, 7×f32 @3,11,..,51 (pos xyz, quat xyzw)       |
//! | Button               | 6     | device@2, button@3, pressed@4, touched@5               |
//! | Axis (2 axes)        | 19    | device@2, f32 x@3, f32 y@11                            |
//! | Axis (4 axes)        | 39    | device@2, 4×(changed u8, f32) @3/4,12/13,21/22,30/31    |
//! | Display              | 10    | u32 width@2, u32 height@6                              |
//! | EnterVR / ExitVR     | 2     | -                                                      |
//! | HandTrackingPosRot   | 60    | device@2, joint@3, 7×f32 @4,12,..,52                   |
//! | HandTrackingBoolEvent| 59    | device@2, gesture@3, state@4, zero padding             |
//!
//! Both axis layouts share subtype 2 and are told apart by length.

use super::{expect_len, ByteReader, ByteWriter, DecodeError, Domain};

const POS_ROT: u8 = 0;
const BUTTON: u8 = 1;
const AXIS: u8 = 2;
const DISPLAY: u8 = 3;
const ENTER_VR: u8 = 4;
const EXIT_VR: u8 = 5;
const HAND_POS_ROT: u8 = 6;
const HAND_BOOL_EVENT: u8 = 7;

const POS_ROT_LEN: usize = 59;
const BUTTON_LEN: usize = 6;
const AXIS2_LEN: usize = 19;
const AXIS4_LEN: usize = 39;
const DISPLAY_LEN: usize = 10;
const BARE_LEN: usize = 2;
const HAND_POS_ROT_LEN: usize = 60;
const HAND_BOOL_EVENT_LEN: usize = 59;

/// Float fields are spaced 8 bytes apart; the upper 4 bytes of each slot stay zero.
const FLOAT_STRIDE: usize = 8;
const AXIS4_OFFSETS: [usize; 4] = [3, 12, 21, 30];

/// Index of the hand wrist on the wire.
pub const WRIST_INDEX: u8 = 20;

/// Tracked device the event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Device {
    Head = 0,
    Left = 1,
    Right = 2,
}

impl TryFrom<u8> for Device {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Device::Head),
            1 => Ok(Device::Left),
            2 => Ok(Device::Right),
            other => Err(DecodeError::UnknownDevice(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ButtonId {
    Trigger = 0,
    Grip = 1,
}

impl TryFrom<u8> for ButtonId {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ButtonId::Trigger),
            1 => Ok(ButtonId::Grip),
            other => Err(DecodeError::UnknownButton(other)),
        }
    }
}

/// Controller button edge as reported by the headset runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonTransition {
    Down,
    Up,
    TouchEnd,
}

impl ButtonTransition {
    /// `(pressed, touched)` for this edge.
    pub fn state(self) -> (bool, bool) {
        match self {
            ButtonTransition::Down => (true, true),
            ButtonTransition::Up => (false, true),
            ButtonTransition::TouchEnd => (false, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandGesture {
    Grip = 0,
    Pinch = 1,
}

impl TryFrom<u8> for HandGesture {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HandGesture::Grip),
            1 => Ok(HandGesture::Pinch),
            other => Err(DecodeError::UnknownGesture(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Finger {
    Thumb = 0,
    Index = 1,
    Middle = 2,
    Ring = 3,
    Little = 4,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Little,
    ];

    /// Joints that have a wire index. The thumb has metacarpal..tip (0..=3); the other fingers
    /// send proximal..tip (1..=4) because their metacarpal would alias the previous finger's tip.
    pub fn joints(self) -> std::ops::RangeInclusive<u8> {
        match self {
            Finger::Thumb => 0..=3,
            _ => 1..=4,
        }
    }
}

/// A hand joint addressable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandJoint {
    Wrist,
    Digit { finger: Finger, joint: u8 },
}

impl HandJoint {
    pub fn digit(finger: Finger, joint: u8) -> Option<Self> {
        finger
            .joints()
            .contains(&joint)
            .then_some(HandJoint::Digit { finger, joint })
    }

    pub fn wire_index(self) -> u8 {
        match self {
            HandJoint::Wrist => WRIST_INDEX,
            HandJoint::Digit {
                finger: Finger::Thumb,
                joint,
            } => joint,
            HandJoint::Digit { finger, joint } => 3 + (finger as u8 - 1) * 4 + joint,
        }
    }

    pub fn from_wire_index(index: u8) -> Option<Self> {
        match index {
            0..=3 => Some(HandJoint::Digit {
                finger: Finger::Thumb,
                joint: index,
            }),
            4..=19 => {
                let finger = Finger::ALL[usize::from((index - 4) / 4) + 1];
                Some(HandJoint::Digit {
                    finger,
                    joint: (index - 4) % 4 + 1,
                })
            }
            WRIST_INDEX => Some(HandJoint::Wrist),
            _ => None,
        }
    }

    /// Every transmittable joint in send order: wrist first, then thumb to little finger.
    pub fn all() -> impl Iterator<Item = HandJoint> {
        std::iter::once(HandJoint::Wrist).chain(
            Finger::ALL
                .into_iter()
                .flat_map(|finger| finger.joints().map(move |joint| HandJoint::Digit { finger, joint })),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).length()
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

impl Quat {
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }
}

/// Position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.orientation.is_finite()
    }

    fn components(&self) -> [f32; 7] {
        let Pose {
            position: p,
            orientation: q,
        } = self;
        [p.x, p.y, p.z, q.x, q.y, q.z, q.w]
    }

    fn write(&self, w: &mut ByteWriter, base: usize) {
        for (i, value) in self.components().into_iter().enumerate() {
            w.f32(base + i * FLOAT_STRIDE, value);
        }
    }

    fn read(r: &ByteReader<'_>, base: usize) -> Result<Self, DecodeError> {
        let f = |i: usize| r.f32(base + i * FLOAT_STRIDE);
        Ok(Pose {
            position: Vec3::new(f(0)?, f(1)?, f(2)?),
            orientation: Quat {
                x: f(3)?,
                y: f(4)?,
                z: f(5)?,
                w: f(6)?,
            },
        })
    }
}

/// One axis of the four-axis (trackpad + joystick) layout.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisChannel {
    pub changed: bool,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PosRot {
        device: Device,
        pose: Pose,
    },
    Button {
        device: Device,
        button: ButtonId,
        pressed: bool,
        touched: bool,
    },
    /// Thumbstick or pinch offset.
    Axis {
        device: Device,
        x: f32,
        y: f32,
    },
    /// Trackpad x/y then joystick x/y.
    Axes {
        device: Device,
        channels: [AxisChannel; 4],
    },
    Display {
        width: u32,
        height: u32,
    },
    EnterVr,
    ExitVr,
    HandPose {
        device: Device,
        joint: HandJoint,
        pose: Pose,
    },
    HandGesture {
        device: Device,
        gesture: HandGesture,
        active: bool,
    },
}

impl InputEvent {
    pub fn button(device: Device, button: ButtonId, transition: ButtonTransition) -> Self {
        let (pressed, touched) = transition.state();
        InputEvent::Button {
            device,
            button,
            pressed,
            touched,
        }
    }

    /// Messages sent when the headset enters immersive mode, in wire order.
    pub fn enter_vr(width: u32, height: u32) -> [InputEvent; 2] {
        [InputEvent::EnterVr, InputEvent::Display { width, height }]
    }

    /// False when any float field is NaN or infinite. Such events are never put on the wire.
    pub fn is_finite(&self) -> bool {
        match self {
            InputEvent::PosRot { pose, .. } | InputEvent::HandPose { pose, .. } => pose.is_finite(),
            InputEvent::Axis { x, y, .. } => x.is_finite() && y.is_finite(),
            InputEvent::Axes { channels, .. } => channels.iter().all(|c| c.value.is_finite()),
            _ => true,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            InputEvent::PosRot { device, pose } => {
                let mut w = ByteWriter::new(POS_ROT_LEN, Domain::Input, POS_ROT);
                w.u8(2, *device as u8);
                pose.write(&mut w, 3);
                w.finish()
            }
            InputEvent::Button {
                device,
                button,
                pressed,
                touched,
            } => {
                let mut w = ByteWriter::new(BUTTON_LEN, Domain::Input, BUTTON);
                w.u8(2, *device as u8)
                    .u8(3, *button as u8)
                    .bool(4, *pressed)
                    .bool(5, *touched);
                w.finish()
            }
            InputEvent::Axis { device, x, y } => {
                let mut w = ByteWriter::new(AXIS2_LEN, Domain::Input, AXIS);
                w.u8(2, *device as u8).f32(3, *x).f32(3 + FLOAT_STRIDE, *y);
                w.finish()
            }
            InputEvent::Axes { device, channels } => {
                let mut w = ByteWriter::new(AXIS4_LEN, Domain::Input, AXIS);
                w.u8(2, *device as u8);
                for (offset, channel) in AXIS4_OFFSETS.iter().zip(channels) {
                    w.bool(*offset, channel.changed).f32(offset + 1, channel.value);
                }
                w.finish()
            }
            InputEvent::Display { width, height } => {
                let mut w = ByteWriter::new(DISPLAY_LEN, Domain::Input, DISPLAY);
                w.u32(2, *width).u32(6, *height);
                w.finish()
            }
            InputEvent::EnterVr => ByteWriter::new(BARE_LEN, Domain::Input, ENTER_VR).finish(),
            InputEvent::ExitVr => ByteWriter::new(BARE_LEN, Domain::Input, EXIT_VR).finish(),
            InputEvent::HandPose {
                device,
                joint,
                pose,
            } => {
                let mut w = ByteWriter::new(HAND_POS_ROT_LEN, Domain::Input, HAND_POS_ROT);
                w.u8(2, *device as u8).u8(3, joint.wire_index());
                pose.write(&mut w, 4);
                w.finish()
            }
            InputEvent::HandGesture {
                device,
                gesture,
                active,
            } => {
                let mut w = ByteWriter::new(HAND_BOOL_EVENT_LEN, Domain::Input, HAND_BOOL_EVENT);
                w.u8(2, *device as u8)
                    .u8(3, *gesture as u8)
                    .bool(4, *active);
                w.finish()
            }
        }
    }

    /// Decodes a full message, domain tag included.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = ByteReader::new(bytes);
        if Domain::try_from(r.u8(0)?)? != Domain::Input {
            return Err(DecodeError::UnknownDomain(bytes[0]));
        }
        let subtype = r.u8(1)?;
        let device = || Device::try_from(r.u8(2)?);

        match subtype {
            POS_ROT => {
                expect_len("PosRot", bytes, POS_ROT_LEN)?;
                Ok(InputEvent::PosRot {
                    device: device()?,
                    pose: Pose::read(&r, 3)?,
                })
            }
            BUTTON => {
                expect_len("Button", bytes, BUTTON_LEN)?;
                Ok(InputEvent::Button {
                    device: device()?,
                    button: ButtonId::try_from(r.u8(3)?)?,
                    pressed: r.bool(4)?,
                    touched: r.bool(5)?,
                })
            }
            AXIS if bytes.len() == AXIS2_LEN => Ok(InputEvent::Axis {
                device: device()?,
                x: r.f32(3)?,
                y: r.f32(3 + FLOAT_STRIDE)?,
            }),
            AXIS => {
                expect_len("Axis", bytes, AXIS4_LEN)?;
                let mut channels = [AxisChannel::default(); 4];
                for (channel, offset) in channels.iter_mut().zip(AXIS4_OFFSETS) {
                    *channel = AxisChannel {
                        changed: r.bool(offset)?,
                        value: r.f32(offset + 1)?,
                    };
                }
                Ok(InputEvent::Axes {
                    device: device()?,
                    channels,
                })
            }
            DISPLAY => {
                expect_len("Display", bytes, DISPLAY_LEN)?;
                Ok(InputEvent::Display {
                    width: r.u32(2)?,
                    height: r.u32(6)?,
                })
            }
            ENTER_VR => {
                expect_len("EnterVR", bytes, BARE_LEN)?;
                Ok(InputEvent::EnterVr)
            }
            EXIT_VR => {
                expect_len("ExitVR", bytes, BARE_LEN)?;
                Ok(InputEvent::ExitVr)
            }
            HAND_POS_ROT => {
                expect_len("HandTrackingPosRot", bytes, HAND_POS_ROT_LEN)?;
                let index = r.u8(3)?;
                Ok(InputEvent::HandPose {
                    device: device()?,
                    joint: HandJoint::from_wire_index(index).ok_or(DecodeError::UnknownJoint(index))?,
                    pose: Pose::read(&r, 4)?,
                })
            }
            HAND_BOOL_EVENT => {
                expect_len("HandTrackingBoolEvent", bytes, HAND_BOOL_EVENT_LEN)?;
                Ok(InputEvent::HandGesture {
                    device: device()?,
                    gesture: HandGesture::try_from(r.u8(3)?)?,
                    active: r.bool(4)?,
                })
            }
            subtype => Err(DecodeError::UnknownSubtype {
                domain: Domain::Input,
                subtype,
            }),
        }
    }
}
