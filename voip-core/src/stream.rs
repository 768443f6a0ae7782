//! Stream data model (spec §3 "Stream").

use crate::reassembler::Reassembler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Audio,
    Video,
}

impl StreamType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(StreamType::Audio),
            2 => Some(StreamType::Video),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            StreamType::Audio => 1,
            StreamType::Video => 2,
        }
    }
}

pub struct Stream {
    pub id: u8,
    pub stream_type: StreamType,
    pub codec: u32,
    pub enabled: bool,
    pub paused: bool,
    pub extra_ec: bool,
    pub frame_duration_ms: u16,
    pub resolution: Option<(u16, u16)>,
    /// Only video streams reassemble fragmented frames; audio frames arrive
    /// whole (spec §4.4, §9 "Video" redesign note: received but discarded
    /// if no reassembler is present rather than causing a fault).
    pub reassembler: Option<Reassembler>,
}

impl Stream {
    pub fn new_audio(id: u8, codec: u32, frame_duration_ms: u16) -> Self {
        Stream {
            id,
            stream_type: StreamType::Audio,
            codec,
            enabled: true,
            paused: false,
            extra_ec: false,
            frame_duration_ms,
            resolution: None,
            reassembler: None,
        }
    }

    pub fn new_video(id: u8, codec: u32, resolution: (u16, u16)) -> Self {
        Stream {
            id,
            stream_type: StreamType::Video,
            codec,
            enabled: true,
            paused: false,
            extra_ec: false,
            frame_duration_ms: 0,
            resolution: Some(resolution),
            reassembler: Some(Reassembler::new()),
        }
    }
}
