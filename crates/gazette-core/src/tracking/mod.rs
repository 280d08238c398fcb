//! Open/click tracking - signed tracking links and the signals they carry

mod recorder;
mod token;

pub use recorder::{TrackingQuery, TrackingRecorder, UnsubscribeResult};
pub use token::{TrackingCodec, TrackingToken};

/// 1x1 transparent GIF served by the open pixel
pub const TRANSPARENT_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];
