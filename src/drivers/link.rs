//! Framed wire codec shared by the app link (Bluetooth UART) and the
//! motor-board link.
//!
//! Frame layout: `[Sync] [Len] [Type] [Payload...] [CRC]`, little-endian
//! payloads. `Len` counts Type + Payload + CRC; the CRC covers Type and
//! Payload. A frame that fails any check is dropped silently and the
//! parser resynchronizes on the next sync byte.

use crate::config::{RobotConfig, TELEMETRY_ANGLE_SCALE};
use crate::control::pid::{ChannelId, PidGains, N_CHANNELS};
use crate::state::{BoardStatus, DirectControl, MotorCommand, StatusSnapshot, TuningUpdate};

pub const LINK_SYNC: u8 = 0xAB;

// Inbound (app -> robot)
pub const FRAME_DIRECT_CONTROL: u8 = 0x01;
pub const FRAME_TUNING: u8 = 0x02;
pub const FRAME_COMMAND: u8 = 0x03;
// Outbound (robot -> app)
pub const FRAME_STATUS: u8 = 0x10;
pub const FRAME_CONFIG: u8 = 0x11;
// Motor-board link
pub const FRAME_MOTOR_COMMAND: u8 = 0x20;
pub const FRAME_BOARD_STATUS: u8 = 0x21;

/// Joystick axes travel as milli-units, compass as centi-degrees.
const AXIS_SCALE: f32 = 1000.0;
const COMPASS_SCALE: f32 = 100.0;
const TEMP_SCALE: f32 = 10.0;

const MAX_FRAME: usize = 64;

/// A decoded inbound frame.
#[derive(Debug, Clone, Copy)]
pub enum LinkFrame {
    Direct(DirectControl),
    Tuning(TuningUpdate),
    /// Raw operator command code; interpretation is the comms manager's
    /// job so unknown codes can be logged there.
    Command(u8),
    Board(BoardStatus),
}

pub struct LinkParser {
    buffer: heapless::Vec<u8, MAX_FRAME>,
}

impl LinkParser {
    pub const fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
        }
    }

    pub fn push_byte(&mut self, b: u8) -> Option<LinkFrame> {
        if self.buffer.is_empty() {
            if b == LINK_SYNC {
                let _ = self.buffer.push(b);
            }
            return None;
        }

        if self.buffer.len() == 1 {
            // Length byte: Type + Payload + CRC, so at least 2.
            if b < 2 || b as usize > MAX_FRAME - 2 {
                self.buffer.clear();
                if b == LINK_SYNC {
                    let _ = self.buffer.push(b);
                }
                return None;
            }
            let _ = self.buffer.push(b);
            return None;
        }

        let total = 2 + self.buffer[1] as usize;
        if self.buffer.len() < total {
            let _ = self.buffer.push(b);
        }
        if self.buffer.len() < total {
            return None;
        }

        let frame = self.buffer.as_slice();
        let decoded = if crc8(&frame[2..total - 1]) == frame[total - 1] {
            decode_frame(frame[2], &frame[3..total - 1])
        } else {
            None
        };
        self.buffer.clear();
        decoded
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Option<LinkFrame> {
        let mut last = None;
        for &b in data {
            if let Some(frame) = self.push_byte(b) {
                last = Some(frame);
            }
        }
        last
    }
}

fn decode_frame(frame_type: u8, payload: &[u8]) -> Option<LinkFrame> {
    match (frame_type, payload.len()) {
        (FRAME_DIRECT_CONTROL, 6) => Some(LinkFrame::Direct(DirectControl {
            axis_x: (read_i16(payload, 0) as f32 / AXIS_SCALE).clamp(-1.0, 1.0),
            axis_y: (read_i16(payload, 2) as f32 / AXIS_SCALE).clamp(-1.0, 1.0),
            compass_yaw: read_i16(payload, 4) as f32 / COMPASS_SCALE,
        })),
        (FRAME_TUNING, 21) => Some(LinkFrame::Tuning(TuningUpdate {
            channel: ChannelId::from_u8(payload[0])?,
            kp: read_f32(payload, 1),
            ki: read_f32(payload, 5),
            kd: read_f32(payload, 9),
            center_angle: read_f32(payload, 13),
            safety_limit_deg: read_f32(payload, 17),
        })),
        (FRAME_COMMAND, 1) => Some(LinkFrame::Command(payload[0])),
        (FRAME_BOARD_STATUS, 18) => Some(LinkFrame::Board(BoardStatus {
            battery_mv: read_u16(payload, 0),
            board_temp_c: read_i16(payload, 2) as f32 / TEMP_SCALE,
            speed_l: read_i16(payload, 4) as f32,
            speed_r: read_i16(payload, 6) as f32,
            position_l_steps: read_i32(payload, 8),
            position_r_steps: read_i32(payload, 12),
            distance_cm: read_u16(payload, 16),
        })),
        _ => None,
    }
}

// ── Frame builders ────────────────────────────────────────────────────────────

/// Serialize one frame into `buf`; returns the bytes written, 0 if the
/// buffer is too small.
pub fn build_frame(buf: &mut [u8], frame_type: u8, payload: &[u8]) -> usize {
    let len = 2 + payload.len();
    if buf.len() < len + 2 {
        return 0;
    }
    buf[0] = LINK_SYNC;
    buf[1] = len as u8;
    buf[2] = frame_type;
    buf[3..3 + payload.len()].copy_from_slice(payload);
    buf[3 + payload.len()] = crc8(&buf[2..3 + payload.len()]);
    2 + len
}

pub fn encode_status(buf: &mut [u8], snap: &StatusSnapshot) -> usize {
    let mut p = [0u8; 21];
    write_i16(&mut p, 0, (snap.pitch * TELEMETRY_ANGLE_SCALE) as i16);
    write_i16(&mut p, 2, (snap.roll * TELEMETRY_ANGLE_SCALE) as i16);
    write_i16(&mut p, 4, (snap.yaw * TELEMETRY_ANGLE_SCALE) as i16);
    write_i16(&mut p, 6, (snap.set_point * TELEMETRY_ANGLE_SCALE) as i16);
    write_i16(&mut p, 8, (snap.center_angle * TELEMETRY_ANGLE_SCALE) as i16);
    p[10..12].copy_from_slice(&snap.battery_mv.to_le_bytes());
    write_i16(&mut p, 12, (snap.board_temp_c * TEMP_SCALE) as i16);
    write_i16(&mut p, 14, snap.speed_l as i16);
    write_i16(&mut p, 16, snap.speed_r as i16);
    p[18..20].copy_from_slice(&snap.distance_cm.to_le_bytes());
    p[20] = snap.status;
    build_frame(buf, FRAME_STATUS, &p)
}

pub fn encode_config(buf: &mut [u8], cfg: &RobotConfig) -> usize {
    let mut p = [0u8; 8 + N_CHANNELS * 12];
    p[0..4].copy_from_slice(&cfg.center_angle.to_le_bytes());
    p[4..8].copy_from_slice(&cfg.safety_limit_deg.to_le_bytes());
    for (i, g) in cfg.pid.iter().enumerate() {
        let at = 8 + i * 12;
        p[at..at + 4].copy_from_slice(&g.kp.to_le_bytes());
        p[at + 4..at + 8].copy_from_slice(&g.ki.to_le_bytes());
        p[at + 8..at + 12].copy_from_slice(&g.kd.to_le_bytes());
    }
    build_frame(buf, FRAME_CONFIG, &p)
}

pub fn encode_motor_command(buf: &mut [u8], cmd: &MotorCommand) -> usize {
    let mut p = [0u8; 5];
    write_i16(&mut p, 0, cmd.left as i16);
    write_i16(&mut p, 2, cmd.right as i16);
    p[4] = cmd.enabled as u8;
    build_frame(buf, FRAME_MOTOR_COMMAND, &p)
}

/// CRC-8, polynomial 0x31, as used by both link endpoints.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &b in data {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn read_i16(p: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([p[at], p[at + 1]])
}

fn read_u16(p: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([p[at], p[at + 1]])
}

fn read_i32(p: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]])
}

fn read_f32(p: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]])
}

fn write_i16(p: &mut [u8], at: usize, v: i16) {
    p[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning_payload() -> [u8; 21] {
        let mut p = [0u8; 21];
        p[0] = 0; // Angle
        p[1..5].copy_from_slice(&0.6f32.to_le_bytes());
        p[5..9].copy_from_slice(&0.1f32.to_le_bytes());
        p[9..13].copy_from_slice(&1.0f32.to_le_bytes());
        p[13..17].copy_from_slice(&2.5f32.to_le_bytes());
        p[17..21].copy_from_slice(&45.0f32.to_le_bytes());
        p
    }

    #[test]
    fn parses_a_tuning_frame_with_garbage_prefix() {
        let mut frame = [0u8; 64];
        let n = build_frame(&mut frame, FRAME_TUNING, &tuning_payload());

        let mut parser = LinkParser::new();
        assert!(parser.push_bytes(&[0x00, 0x7F, 0xFE]).is_none());
        match parser.push_bytes(&frame[..n]) {
            Some(LinkFrame::Tuning(t)) => {
                assert_eq!(t.channel, ChannelId::Angle);
                assert_eq!(t.kp, 0.6);
                assert_eq!(t.center_angle, 2.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn frame_survives_byte_at_a_time_delivery() {
        let mut frame = [0u8; 16];
        let n = build_frame(&mut frame, FRAME_COMMAND, &[0x02]);

        let mut parser = LinkParser::new();
        let mut decoded = None;
        for &b in &frame[..n] {
            if let Some(f) = parser.push_byte(b) {
                decoded = Some(f);
            }
        }
        assert!(matches!(decoded, Some(LinkFrame::Command(0x02))));
    }

    #[test]
    fn corrupt_crc_drops_the_frame() {
        let mut frame = [0u8; 64];
        let n = build_frame(&mut frame, FRAME_TUNING, &tuning_payload());
        frame[n - 1] ^= 0xA5;

        let mut parser = LinkParser::new();
        assert!(parser.push_bytes(&frame[..n]).is_none());

        // The parser recovers on the next good frame.
        let n = build_frame(&mut frame, FRAME_COMMAND, &[0x01]);
        assert!(matches!(
            parser.push_bytes(&frame[..n]),
            Some(LinkFrame::Command(0x01))
        ));
    }

    #[test]
    fn unknown_channel_in_tuning_is_dropped() {
        let mut p = tuning_payload();
        p[0] = 9;
        let mut frame = [0u8; 64];
        let n = build_frame(&mut frame, FRAME_TUNING, &p);
        let mut parser = LinkParser::new();
        assert!(parser.push_bytes(&frame[..n]).is_none());
    }

    #[test]
    fn direct_control_axes_are_scaled_and_clamped() {
        let mut p = [0u8; 6];
        p[0..2].copy_from_slice(&500i16.to_le_bytes());
        p[2..4].copy_from_slice(&(-2000i16).to_le_bytes());
        p[4..6].copy_from_slice(&9000i16.to_le_bytes());
        let mut frame = [0u8; 16];
        let n = build_frame(&mut frame, FRAME_DIRECT_CONTROL, &p);

        let mut parser = LinkParser::new();
        match parser.push_bytes(&frame[..n]) {
            Some(LinkFrame::Direct(d)) => {
                assert_eq!(d.axis_x, 0.5);
                assert_eq!(d.axis_y, -1.0); // clamped
                assert_eq!(d.compass_yaw, 90.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn board_status_positions_are_raw_steps() {
        let mut p = [0u8; 18];
        p[0..2].copy_from_slice(&7400u16.to_le_bytes());
        p[2..4].copy_from_slice(&312i16.to_le_bytes()); // 31.2 C
        p[8..12].copy_from_slice(&20000i32.to_le_bytes());
        p[12..16].copy_from_slice(&19000i32.to_le_bytes());
        p[16..18].copy_from_slice(&150u16.to_le_bytes());
        let mut frame = [0u8; 32];
        let n = build_frame(&mut frame, FRAME_BOARD_STATUS, &p);

        let mut parser = LinkParser::new();
        match parser.push_bytes(&frame[..n]) {
            Some(LinkFrame::Board(b)) => {
                assert_eq!(b.battery_mv, 7400);
                assert_eq!(b.board_temp_c, 31.2);
                assert_eq!(b.position_l_steps, 20000);
                assert_eq!(b.distance_cm, 150);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn motor_command_encodes_clamped_integers() {
        let cmd = MotorCommand {
            left: -734.0,
            right: 1000.0,
            enabled: true,
        };
        let mut frame = [0u8; 16];
        let n = encode_motor_command(&mut frame, &cmd);
        assert_eq!(n, 2 + 2 + 5);
        assert_eq!(frame[0], LINK_SYNC);
        assert_eq!(frame[2], FRAME_MOTOR_COMMAND);
        assert_eq!(i16::from_le_bytes([frame[3], frame[4]]), -734);
        assert_eq!(i16::from_le_bytes([frame[5], frame[6]]), 1000);
        assert_eq!(frame[7], 1);
    }
}
