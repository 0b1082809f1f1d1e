//! Binary input-event protocol
//!
//! Viewers send keyboard, mouse, touch and gamepad input over the data channel
//! as compact frames: one identifier byte followed by a fixed-width payload.
//! Multi-byte fields are little-endian, with one exception: `KeyPress` carries
//! its char code in the host's native byte order. Viewer applications in the
//! wild were built against that behavior, so it is kept as is.
//!
//! Decoding never fails hard. Short frames and unknown identifiers come back as
//! [`InputEvent::Error`] and [`InputEvent::Unknown`] so the caller can log them
//! and carry on.

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("Empty data")]
    Empty,
    #[error("Failed to unpack data: {detail}")]
    Unpack { event_id: u8, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButton {
    pub button: u8,
    pub x: u16,
    pub y: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Touch {
    pub num_touches: u8,
    pub x: u16,
    pub y: u16,
    pub idx: u8,
    pub force: u8,
    pub valid: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GamepadButton {
    pub controller_id: u8,
    pub button: u8,
    pub is_repeat: u8,
}

/// A decoded input event.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    IFrameRequest,
    RequestQualityControl,
    KeyDown {
        keycode: u8,
        is_repeat: u8,
    },
    KeyUp {
        keycode: u8,
    },
    KeyPress {
        charcode: u16,
    },
    MouseEnter,
    MouseLeave,
    MouseDown(MouseButton),
    MouseUp(MouseButton),
    MouseMove {
        x: u16,
        y: u16,
        delta_x: i16,
        delta_y: i16,
    },
    MouseWheel {
        delta: i16,
        x: u16,
        y: u16,
    },
    TouchStart(Touch),
    TouchEnd(Touch),
    TouchMove(Touch),
    GamepadButtonPressed(GamepadButton),
    GamepadButtonReleased(GamepadButton),
    GamepadAnalog {
        controller_id: u8,
        button: u8,
        analog_value: f64,
    },
    GamepadDisconnected {
        controller_id: u8,
    },
    /// An identifier this protocol version does not define.
    Unknown {
        event_id: u8,
    },
    Error(DecodeFailure),
}

/// The result of decoding one frame, with the raw bytes kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub event: InputEvent,
    /// The whole frame, identifier included, as lower-case hex.
    pub raw_hex: String,
}

mod id {
    pub const IFRAME_REQUEST: u8 = 0;
    pub const REQUEST_QUALITY_CONTROL: u8 = 1;
    pub const KEY_DOWN: u8 = 60;
    pub const KEY_UP: u8 = 61;
    pub const KEY_PRESS: u8 = 62;
    pub const MOUSE_ENTER: u8 = 70;
    pub const MOUSE_LEAVE: u8 = 71;
    pub const MOUSE_DOWN: u8 = 72;
    pub const MOUSE_UP: u8 = 73;
    pub const MOUSE_MOVE: u8 = 74;
    pub const MOUSE_WHEEL: u8 = 75;
    pub const TOUCH_START: u8 = 80;
    pub const TOUCH_END: u8 = 81;
    pub const TOUCH_MOVE: u8 = 82;
    pub const GAMEPAD_BUTTON_PRESSED: u8 = 90;
    pub const GAMEPAD_BUTTON_RELEASED: u8 = 91;
    pub const GAMEPAD_ANALOG: u8 = 92;
    pub const GAMEPAD_DISCONNECTED: u8 = 94;
}

/// Fixed payload length for a known identifier, excluding the identifier byte.
fn payload_len(event_id: u8) -> Option<usize> {
    let len = match event_id {
        id::IFRAME_REQUEST | id::REQUEST_QUALITY_CONTROL => 0,
        id::KEY_DOWN => 2,
        id::KEY_UP => 1,
        id::KEY_PRESS => 2,
        id::MOUSE_ENTER | id::MOUSE_LEAVE => 0,
        id::MOUSE_DOWN | id::MOUSE_UP => 5,
        id::MOUSE_MOVE => 8,
        id::MOUSE_WHEEL => 6,
        id::TOUCH_START | id::TOUCH_END | id::TOUCH_MOVE => 8,
        id::GAMEPAD_BUTTON_PRESSED | id::GAMEPAD_BUTTON_RELEASED => 3,
        id::GAMEPAD_ANALOG => 10,
        id::GAMEPAD_DISCONNECTED => 1,
        _ => return None,
    };
    Some(len)
}

impl InputEvent {
    /// The wire identifier, if this event has a wire form.
    pub fn event_id(&self) -> Option<u8> {
        let event_id = match self {
            InputEvent::IFrameRequest => id::IFRAME_REQUEST,
            InputEvent::RequestQualityControl => id::REQUEST_QUALITY_CONTROL,
            InputEvent::KeyDown { .. } => id::KEY_DOWN,
            InputEvent::KeyUp { .. } => id::KEY_UP,
            InputEvent::KeyPress { .. } => id::KEY_PRESS,
            InputEvent::MouseEnter => id::MOUSE_ENTER,
            InputEvent::MouseLeave => id::MOUSE_LEAVE,
            InputEvent::MouseDown(_) => id::MOUSE_DOWN,
            InputEvent::MouseUp(_) => id::MOUSE_UP,
            InputEvent::MouseMove { .. } => id::MOUSE_MOVE,
            InputEvent::MouseWheel { .. } => id::MOUSE_WHEEL,
            InputEvent::TouchStart(_) => id::TOUCH_START,
            InputEvent::TouchEnd(_) => id::TOUCH_END,
            InputEvent::TouchMove(_) => id::TOUCH_MOVE,
            InputEvent::GamepadButtonPressed(_) => id::GAMEPAD_BUTTON_PRESSED,
            InputEvent::GamepadButtonReleased(_) => id::GAMEPAD_BUTTON_RELEASED,
            InputEvent::GamepadAnalog { .. } => id::GAMEPAD_ANALOG,
            InputEvent::GamepadDisconnected { .. } => id::GAMEPAD_DISCONNECTED,
            InputEvent::Unknown { event_id } => *event_id,
            InputEvent::Error(DecodeFailure::Unpack { event_id, .. }) => *event_id,
            InputEvent::Error(DecodeFailure::Empty) => return None,
        };
        Some(event_id)
    }

    /// The protocol name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            InputEvent::IFrameRequest => "IFrameRequest",
            InputEvent::RequestQualityControl => "RequestQualityControl",
            InputEvent::KeyDown { .. } => "KeyDown",
            InputEvent::KeyUp { .. } => "KeyUp",
            InputEvent::KeyPress { .. } => "KeyPress",
            InputEvent::MouseEnter => "MouseEnter",
            InputEvent::MouseLeave => "MouseLeave",
            InputEvent::MouseDown(_) => "MouseDown",
            InputEvent::MouseUp(_) => "MouseUp",
            InputEvent::MouseMove { .. } => "MouseMove",
            InputEvent::MouseWheel { .. } => "MouseWheel",
            InputEvent::TouchStart(_) => "TouchStart",
            InputEvent::TouchEnd(_) => "TouchEnd",
            InputEvent::TouchMove(_) => "TouchMove",
            InputEvent::GamepadButtonPressed(_) => "GamepadButtonPressed",
            InputEvent::GamepadButtonReleased(_) => "GamepadButtonReleased",
            InputEvent::GamepadAnalog { .. } => "GamepadAnalog",
            InputEvent::GamepadDisconnected { .. } => "GamepadDisconnected",
            InputEvent::Unknown { .. } => "Unknown",
            InputEvent::Error(_) => "Error",
        }
    }
}

/// Decodes one data-channel frame.
pub fn decode(frame: &[u8]) -> DecodedFrame {
    DecodedFrame {
        event: decode_event(frame),
        raw_hex: hex::encode(frame),
    }
}

fn decode_event(frame: &[u8]) -> InputEvent {
    let Some((&event_id, mut payload)) = frame.split_first() else {
        return InputEvent::Error(DecodeFailure::Empty);
    };

    let Some(needed) = payload_len(event_id) else {
        return InputEvent::Unknown { event_id };
    };

    if payload.len() < needed {
        return InputEvent::Error(DecodeFailure::Unpack {
            event_id,
            detail: format!(
                "unpack requires a buffer of {needed} bytes, got {}",
                payload.len()
            ),
        });
    }

    // The length check above guarantees every read below is in bounds.
    let buf = &mut payload;
    match event_id {
        id::IFRAME_REQUEST => InputEvent::IFrameRequest,
        id::REQUEST_QUALITY_CONTROL => InputEvent::RequestQualityControl,
        id::KEY_DOWN => InputEvent::KeyDown {
            keycode: buf.get_u8(),
            is_repeat: buf.get_u8(),
        },
        id::KEY_UP => InputEvent::KeyUp {
            keycode: buf.get_u8(),
        },
        id::KEY_PRESS => InputEvent::KeyPress {
            charcode: buf.get_u16_ne(),
        },
        id::MOUSE_ENTER => InputEvent::MouseEnter,
        id::MOUSE_LEAVE => InputEvent::MouseLeave,
        id::MOUSE_DOWN => InputEvent::MouseDown(mouse_button(buf)),
        id::MOUSE_UP => InputEvent::MouseUp(mouse_button(buf)),
        id::MOUSE_MOVE => InputEvent::MouseMove {
            x: buf.get_u16_le(),
            y: buf.get_u16_le(),
            delta_x: buf.get_i16_le(),
            delta_y: buf.get_i16_le(),
        },
        id::MOUSE_WHEEL => InputEvent::MouseWheel {
            delta: buf.get_i16_le(),
            x: buf.get_u16_le(),
            y: buf.get_u16_le(),
        },
        id::TOUCH_START => InputEvent::TouchStart(touch(buf)),
        id::TOUCH_END => InputEvent::TouchEnd(touch(buf)),
        id::TOUCH_MOVE => InputEvent::TouchMove(touch(buf)),
        id::GAMEPAD_BUTTON_PRESSED => InputEvent::GamepadButtonPressed(gamepad_button(buf)),
        id::GAMEPAD_BUTTON_RELEASED => InputEvent::GamepadButtonReleased(gamepad_button(buf)),
        id::GAMEPAD_ANALOG => InputEvent::GamepadAnalog {
            controller_id: buf.get_u8(),
            button: buf.get_u8(),
            analog_value: buf.get_f64_le(),
        },
        id::GAMEPAD_DISCONNECTED => InputEvent::GamepadDisconnected {
            controller_id: buf.get_u8(),
        },
        _ => InputEvent::Unknown { event_id },
    }
}

fn mouse_button(buf: &mut impl Buf) -> MouseButton {
    MouseButton {
        button: buf.get_u8(),
        x: buf.get_u16_le(),
        y: buf.get_u16_le(),
    }
}

fn touch(buf: &mut impl Buf) -> Touch {
    Touch {
        num_touches: buf.get_u8(),
        x: buf.get_u16_le(),
        y: buf.get_u16_le(),
        idx: buf.get_u8(),
        force: buf.get_u8(),
        valid: buf.get_u8(),
    }
}

fn gamepad_button(buf: &mut impl Buf) -> GamepadButton {
    GamepadButton {
        controller_id: buf.get_u8(),
        button: buf.get_u8(),
        is_repeat: buf.get_u8(),
    }
}

/// Encodes an event into its wire frame.
///
/// Returns `None` for [`InputEvent::Error`], which has no wire form.
pub fn encode(event: &InputEvent) -> Option<Vec<u8>> {
    let event_id = match event {
        InputEvent::Error(_) => return None,
        other => other.event_id()?,
    };

    let mut buf = Vec::with_capacity(1 + payload_len(event_id).unwrap_or(0));
    buf.put_u8(event_id);

    match *event {
        InputEvent::IFrameRequest
        | InputEvent::RequestQualityControl
        | InputEvent::MouseEnter
        | InputEvent::MouseLeave
        | InputEvent::Unknown { .. } => {}
        InputEvent::KeyDown { keycode, is_repeat } => {
            buf.put_u8(keycode);
            buf.put_u8(is_repeat);
        }
        InputEvent::KeyUp { keycode } => buf.put_u8(keycode),
        InputEvent::KeyPress { charcode } => buf.put_u16_ne(charcode),
        InputEvent::MouseDown(m) | InputEvent::MouseUp(m) => {
            buf.put_u8(m.button);
            buf.put_u16_le(m.x);
            buf.put_u16_le(m.y);
        }
        InputEvent::MouseMove {
            x,
            y,
            delta_x,
            delta_y,
        } => {
            buf.put_u16_le(x);
            buf.put_u16_le(y);
            buf.put_i16_le(delta_x);
            buf.put_i16_le(delta_y);
        }
        InputEvent::MouseWheel { delta, x, y } => {
            buf.put_i16_le(delta);
            buf.put_u16_le(x);
            buf.put_u16_le(y);
        }
        InputEvent::TouchStart(t) | InputEvent::TouchEnd(t) | InputEvent::TouchMove(t) => {
            buf.put_u8(t.num_touches);
            buf.put_u16_le(t.x);
            buf.put_u16_le(t.y);
            buf.put_u8(t.idx);
            buf.put_u8(t.force);
            buf.put_u8(t.valid);
        }
        InputEvent::GamepadButtonPressed(g) | InputEvent::GamepadButtonReleased(g) => {
            buf.put_u8(g.controller_id);
            buf.put_u8(g.button);
            buf.put_u8(g.is_repeat);
        }
        InputEvent::GamepadAnalog {
            controller_id,
            button,
            analog_value,
        } => {
            buf.put_u8(controller_id);
            buf.put_u8(button);
            buf.put_f64_le(analog_value);
        }
        InputEvent::GamepadDisconnected { controller_id } => buf.put_u8(controller_id),
        InputEvent::Error(_) => return None,
    }

    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_frame_is_an_error() {
        let decoded = decode(&[]);
        assert_eq!(decoded.event, InputEvent::Error(DecodeFailure::Empty));
        assert_eq!(decoded.raw_hex, "");
        assert_eq!(DecodeFailure::Empty.to_string(), "Empty data");
    }

    #[test]
    fn key_down() {
        let decoded = decode(&[60, 65, 0]);
        assert_eq!(
            decoded.event,
            InputEvent::KeyDown {
                keycode: 65,
                is_repeat: 0
            }
        );
        assert_eq!(decoded.raw_hex, "3c4100");
    }

    #[test]
    fn mouse_move_with_negative_delta() {
        let decoded = decode(&[74, 10, 0, 20, 0, 5, 0, 0xFB, 0xFF]);
        assert_eq!(
            decoded.event,
            InputEvent::MouseMove {
                x: 10,
                y: 20,
                delta_x: 5,
                delta_y: -5
            }
        );
    }

    #[test]
    fn truncated_mouse_down_does_not_default_fields() {
        let decoded = decode(&[72, 1, 0]);
        match decoded.event {
            InputEvent::Error(DecodeFailure::Unpack { event_id, ref detail }) => {
                assert_eq!(event_id, 72);
                assert!(detail.contains("5 bytes"));
            }
            other => panic!("expected unpack failure, got {other:?}"),
        }
    }

    #[test]
    fn unpack_failure_message() {
        let InputEvent::Error(failure) = decode(&[92, 0, 1, 0]).event else {
            panic!("expected an error");
        };
        assert!(failure.to_string().starts_with("Failed to unpack data"));
    }

    #[test]
    fn unknown_identifier_keeps_raw_bytes() {
        let decoded = decode(&[200, 0xde, 0xad]);
        assert_eq!(decoded.event, InputEvent::Unknown { event_id: 200 });
        assert_eq!(decoded.raw_hex, "c8dead");
    }

    #[test]
    fn key_press_uses_native_byte_order() {
        let mut frame = vec![62];
        frame.extend_from_slice(&0x0102u16.to_ne_bytes());
        assert_eq!(
            decode(&frame).event,
            InputEvent::KeyPress { charcode: 0x0102 }
        );
    }

    #[test]
    fn touch_and_gamepad_layouts() {
        let frame = [80, 1, 0x10, 0x00, 0x20, 0x00, 3, 128, 1];
        assert_eq!(
            decode(&frame).event,
            InputEvent::TouchStart(Touch {
                num_touches: 1,
                x: 16,
                y: 32,
                idx: 3,
                force: 128,
                valid: 1
            })
        );

        let mut frame = vec![92, 2, 7];
        frame.extend_from_slice(&0.5f64.to_le_bytes());
        assert_eq!(
            decode(&frame).event,
            InputEvent::GamepadAnalog {
                controller_id: 2,
                button: 7,
                analog_value: 0.5
            }
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        assert_eq!(decode(&[61, 13, 99, 99]).event, InputEvent::KeyUp { keycode: 13 });
    }

    #[test]
    fn error_has_no_wire_form() {
        assert_eq!(encode(&InputEvent::Error(DecodeFailure::Empty)), None);
        assert_eq!(encode(&InputEvent::Unknown { event_id: 200 }), Some(vec![200]));
    }

    fn any_event() -> impl Strategy<Value = InputEvent> {
        let mouse = (any::<u8>(), any::<u16>(), any::<u16>())
            .prop_map(|(button, x, y)| MouseButton { button, x, y });
        let touch = any::<(u8, u16, u16, u8, u8, u8)>().prop_map(
            |(num_touches, x, y, idx, force, valid)| Touch {
                num_touches,
                x,
                y,
                idx,
                force,
                valid,
            },
        );
        let pad = any::<(u8, u8, u8)>().prop_map(|(controller_id, button, is_repeat)| {
            GamepadButton {
                controller_id,
                button,
                is_repeat,
            }
        });

        prop_oneof![
            Just(InputEvent::IFrameRequest),
            Just(InputEvent::RequestQualityControl),
            any::<(u8, u8)>().prop_map(|(keycode, is_repeat)| InputEvent::KeyDown {
                keycode,
                is_repeat
            }),
            any::<u8>().prop_map(|keycode| InputEvent::KeyUp { keycode }),
            any::<u16>().prop_map(|charcode| InputEvent::KeyPress { charcode }),
            Just(InputEvent::MouseEnter),
            Just(InputEvent::MouseLeave),
            mouse.clone().prop_map(InputEvent::MouseDown),
            mouse.prop_map(InputEvent::MouseUp),
            any::<(u16, u16, i16, i16)>().prop_map(|(x, y, delta_x, delta_y)| {
                InputEvent::MouseMove {
                    x,
                    y,
                    delta_x,
                    delta_y,
                }
            }),
            any::<(i16, u16, u16)>()
                .prop_map(|(delta, x, y)| InputEvent::MouseWheel { delta, x, y }),
            touch.clone().prop_map(InputEvent::TouchStart),
            touch.clone().prop_map(InputEvent::TouchEnd),
            touch.prop_map(InputEvent::TouchMove),
            pad.clone().prop_map(InputEvent::GamepadButtonPressed),
            pad.prop_map(InputEvent::GamepadButtonReleased),
            (any::<u8>(), any::<u8>(), -1.0e9f64..1.0e9).prop_map(
                |(controller_id, button, analog_value)| InputEvent::GamepadAnalog {
                    controller_id,
                    button,
                    analog_value
                }
            ),
            any::<u8>().prop_map(|controller_id| InputEvent::GamepadDisconnected {
                controller_id
            }),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(event in any_event()) {
            let frame = encode(&event).unwrap();
            prop_assert_eq!(decode(&frame).event, event);
        }

        #[test]
        fn decode_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..16)) {
            let decoded = decode(&frame);
            prop_assert_eq!(decoded.raw_hex, hex::encode(&frame));
        }
    }
}
