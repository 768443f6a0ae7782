//! Wire packet type constants and body grammar (spec §6 "External
//! Interfaces"). Grounded on `PrivateDefines.h`'s `PKT_*` constants for the
//! type byte values, and on the teacher's `net::frame` deserialize-from-slice
//! style — `byteorder` over a `Read`, building the struct field by field
//! rather than the teacher's `mem::uninitialized` shortcut, which isn't
//! something to carry forward into new code.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub const PROTOCOL_MAGIC: u32 = 0x5056_7247;
pub const PROTOCOL_VERSION: u32 = 9;
pub const MIN_PROTOCOL_VERSION: u32 = 3;

/// Below this negotiated version the framer speaks the long TL-container
/// dialect instead of the short header (spec §4.1, §9 "Legacy protocol
/// versions"); `MIN_PROTOCOL_VERSION` is 3, so versions 3..8 all land here.
pub const LONG_HEADER_MAX_VERSION: u32 = 8;

/// TL constructor IDs for the long dialect's outer container, named for the
/// connection phase they're used in (`PrivateDefines.h`'s
/// `TLID_DECRYPTED_AUDIO_BLOCK` / `TLID_SIMPLE_AUDIO_BLOCK`).
pub const TLID_DECRYPTED_AUDIO_BLOCK: u32 = 0xDBF9_48C1;
pub const TLID_SIMPLE_AUDIO_BLOCK: u32 = 0xCC0D_0E76;

pub const PFLAG_HAS_DATA: u32 = 1;
pub const PFLAG_HAS_EXTRA: u32 = 2;
pub const PFLAG_HAS_CALL_ID: u32 = 4;
pub const PFLAG_HAS_PROTO: u32 = 8;
pub const PFLAG_HAS_SEQ: u32 = 16;
pub const PFLAG_HAS_RECENT_RECV: u32 = 32;

pub const PKT_INIT: u8 = 1;
pub const PKT_INIT_ACK: u8 = 2;
pub const PKT_STREAM_STATE: u8 = 3;
pub const PKT_STREAM_DATA: u8 = 4;
pub const PKT_UPDATE_STREAMS: u8 = 5;
pub const PKT_PING: u8 = 6;
pub const PKT_PONG: u8 = 7;
pub const PKT_STREAM_DATA_X2: u8 = 8;
pub const PKT_STREAM_DATA_X3: u8 = 9;
pub const PKT_LAN_ENDPOINT: u8 = 10;
pub const PKT_NETWORK_CHANGED: u8 = 11;
pub const PKT_SWITCH_PREF_RELAY: u8 = 12;
pub const PKT_SWITCH_TO_P2P: u8 = 13;
pub const PKT_NOP: u8 = 14;
pub const PKT_STREAM_EC: u8 = 17;

pub const INIT_FLAG_DATA_SAVING_ENABLED: u32 = 1;
pub const INIT_FLAG_GROUP_CALLS_SUPPORTED: u32 = 2;
pub const INIT_FLAG_VIDEO_RECV_SUPPORTED: u32 = 4;
pub const INIT_FLAG_VIDEO_SEND_SUPPORTED: u32 = 8;

pub const STREAM_DATA_FLAG_LEN16: u8 = 0x40;
pub const STREAM_DATA_EXTRA_KEYFRAME: u16 = 0x8000;
pub const STREAM_DATA_EXTRA_FRAGMENTED: u16 = 0x4000;
pub const STREAM_DATA_EXTRA_FEC: u16 = 0x2000;
const STREAM_DATA_LENGTH_MASK: u16 = 0x1FFF;

pub const FEC_SCHEME_XOR: u8 = 1;

#[derive(Debug, Clone)]
pub struct InitBody {
    pub proto_ver: u32,
    pub min_proto_ver: u32,
    pub flags: u32,
    pub audio_codecs: Vec<u32>,
    pub video_decoders: Vec<u32>,
    pub max_video_res: u8,
}

impl InitBody {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.proto_ver)?;
        w.write_u32::<LittleEndian>(self.min_proto_ver)?;
        w.write_u32::<LittleEndian>(self.flags)?;
        w.write_u8(self.audio_codecs.len() as u8)?;
        for codec in &self.audio_codecs {
            w.write_u32::<LittleEndian>(*codec)?;
        }
        w.write_u8(self.video_decoders.len() as u8)?;
        for codec in &self.video_decoders {
            w.write_u32::<LittleEndian>(*codec)?;
        }
        w.write_u8(self.max_video_res)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let proto_ver = r.read_u32::<LittleEndian>()?;
        let min_proto_ver = r.read_u32::<LittleEndian>()?;
        let flags = r.read_u32::<LittleEndian>()?;
        let audio_count = r.read_u8()?;
        let mut audio_codecs = Vec::with_capacity(audio_count as usize);
        for _ in 0..audio_count {
            audio_codecs.push(r.read_u32::<LittleEndian>()?);
        }
        let video_count = r.read_u8()?;
        let mut video_decoders = Vec::with_capacity(video_count as usize);
        for _ in 0..video_count {
            video_decoders.push(r.read_u32::<LittleEndian>()?);
        }
        let max_video_res = r.read_u8()?;
        Ok(InitBody { proto_ver, min_proto_ver, flags, audio_codecs, video_decoders, max_video_res })
    }
}

#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub stream_id: u8,
    pub stream_type: u8,
    pub codec: u32,
    pub frame_duration_ms: u16,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct InitAckBody {
    pub proto_ver: u32,
    pub min_proto_ver: u32,
    pub streams: Vec<StreamDescriptor>,
}

impl InitAckBody {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.proto_ver)?;
        w.write_u32::<LittleEndian>(self.min_proto_ver)?;
        w.write_u8(self.streams.len() as u8)?;
        for s in &self.streams {
            w.write_u8(s.stream_id)?;
            w.write_u8(s.stream_type)?;
            w.write_u32::<LittleEndian>(s.codec)?;
            w.write_u16::<LittleEndian>(s.frame_duration_ms)?;
            w.write_u8(s.enabled as u8)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let proto_ver = r.read_u32::<LittleEndian>()?;
        let min_proto_ver = r.read_u32::<LittleEndian>()?;
        let count = r.read_u8()?;
        let mut streams = Vec::with_capacity(count as usize);
        for _ in 0..count {
            streams.push(StreamDescriptor {
                stream_id: r.read_u8()?,
                stream_type: r.read_u8()?,
                codec: r.read_u32::<LittleEndian>()?,
                frame_duration_ms: r.read_u16::<LittleEndian>()?,
                enabled: r.read_u8()? != 0,
            });
        }
        Ok(InitAckBody { proto_ver, min_proto_ver, streams })
    }
}

/// One stream-data sub-packet. `PKT_STREAM_DATA_X2`/`X3` bundle 2 or 3 of
/// these back to back in a single datagram; the framer reads as many as the
/// outer type says to expect.
#[derive(Debug, Clone)]
pub struct StreamDataSubPacket {
    pub stream_id: u8,
    pub pts: u32,
    pub fragment: Option<(u8, u8)>,
    pub keyframe: bool,
    pub extra_fec: bool,
    pub payload: Vec<u8>,
}

impl StreamDataSubPacket {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let fragmented = self.fragment.is_some();
        let mut length_and_flags = self.payload.len() as u16 & STREAM_DATA_LENGTH_MASK;
        if self.keyframe {
            length_and_flags |= STREAM_DATA_EXTRA_KEYFRAME;
        }
        if fragmented {
            length_and_flags |= STREAM_DATA_EXTRA_FRAGMENTED;
        }
        if self.extra_fec {
            length_and_flags |= STREAM_DATA_EXTRA_FEC;
        }

        let use_len16 = self.payload.len() > 0xFF;
        let stream_id_and_flags = if use_len16 { self.stream_id | STREAM_DATA_FLAG_LEN16 } else { self.stream_id };
        w.write_u8(stream_id_and_flags)?;
        if use_len16 {
            w.write_u16::<LittleEndian>(length_and_flags)?;
        } else {
            w.write_u8(length_and_flags as u8)?;
        }
        w.write_u32::<LittleEndian>(self.pts)?;
        if let Some((index, count)) = self.fragment {
            w.write_u8(index)?;
            w.write_u8(count)?;
        }
        w.write_all(&self.payload)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let stream_id_and_flags = r.read_u8()?;
        let use_len16 = stream_id_and_flags & STREAM_DATA_FLAG_LEN16 != 0;
        let stream_id = stream_id_and_flags & !STREAM_DATA_FLAG_LEN16;
        let length_and_flags = if use_len16 { r.read_u16::<LittleEndian>()? } else { r.read_u8()? as u16 };
        let length = (length_and_flags & STREAM_DATA_LENGTH_MASK) as usize;
        let keyframe = length_and_flags & STREAM_DATA_EXTRA_KEYFRAME != 0;
        let fragmented = length_and_flags & STREAM_DATA_EXTRA_FRAGMENTED != 0;
        let extra_fec = length_and_flags & STREAM_DATA_EXTRA_FEC != 0;
        let pts = r.read_u32::<LittleEndian>()?;
        let fragment = if fragmented {
            let index = r.read_u8()?;
            let count = r.read_u8()?;
            Some((index, count))
        } else {
            None
        };
        let mut payload = vec![0u8; length];
        r.read_exact(&mut payload)?;
        Ok(StreamDataSubPacket { stream_id, pts, fragment, keyframe, extra_fec, payload })
    }
}

#[derive(Debug, Clone)]
pub struct StreamEcBody {
    pub stream_id: u8,
    pub frame_seq: u8,
    pub scheme: u8,
    pub prev_frame_count: u8,
    pub fec_payload: Vec<u8>,
}

impl StreamEcBody {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.stream_id)?;
        w.write_u8(self.frame_seq)?;
        w.write_u8(self.scheme)?;
        w.write_u8(self.prev_frame_count)?;
        w.write_u16::<LittleEndian>(self.fec_payload.len() as u16)?;
        w.write_all(&self.fec_payload)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let stream_id = r.read_u8()?;
        let frame_seq = r.read_u8()?;
        let scheme = r.read_u8()?;
        let prev_frame_count = r.read_u8()?;
        let length = r.read_u16::<LittleEndian>()? as usize;
        let mut fec_payload = vec![0u8; length];
        r.read_exact(&mut fec_payload)?;
        Ok(StreamEcBody { stream_id, frame_seq, scheme, prev_frame_count, fec_payload })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PongBody {
    pub ping_seq: u32,
}

impl PongBody {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.ping_seq)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(PongBody { ping_seq: r.read_u32::<LittleEndian>()? })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LanEndpointBody {
    pub addr: u32,
    pub port: u32,
}

impl LanEndpointBody {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.addr)?;
        w.write_u32::<LittleEndian>(self.port)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(LanEndpointBody { addr: r.read_u32::<LittleEndian>()?, port: r.read_u32::<LittleEndian>()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn init_body_round_trips() {
        let body = InitBody {
            proto_ver: PROTOCOL_VERSION,
            min_proto_ver: MIN_PROTOCOL_VERSION,
            flags: INIT_FLAG_VIDEO_RECV_SUPPORTED,
            audio_codecs: vec![0x4f505553],
            video_decoders: vec![],
            max_video_res: 0,
        };
        let mut buf = Vec::new();
        body.write_to(&mut buf).unwrap();
        let parsed = InitBody::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.proto_ver, PROTOCOL_VERSION);
        assert_eq!(parsed.audio_codecs, vec![0x4f505553]);
        assert_eq!(parsed.flags, INIT_FLAG_VIDEO_RECV_SUPPORTED);
    }

    #[test]
    fn init_ack_body_round_trips_multiple_streams() {
        let body = InitAckBody {
            proto_ver: PROTOCOL_VERSION,
            min_proto_ver: MIN_PROTOCOL_VERSION,
            streams: vec![
                StreamDescriptor { stream_id: 0, stream_type: 1, codec: 1, frame_duration_ms: 60, enabled: true },
                StreamDescriptor { stream_id: 1, stream_type: 2, codec: 2, frame_duration_ms: 0, enabled: false },
            ],
        };
        let mut buf = Vec::new();
        body.write_to(&mut buf).unwrap();
        let parsed = InitAckBody::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.streams.len(), 2);
        assert!(parsed.streams[0].enabled);
        assert!(!parsed.streams[1].enabled);
    }

    #[test]
    fn stream_data_sub_packet_round_trips_fragmented_keyframe() {
        let pkt = StreamDataSubPacket {
            stream_id: 5,
            pts: 123_456,
            fragment: Some((2, 4)),
            keyframe: true,
            extra_fec: false,
            payload: vec![9; 40],
        };
        let mut buf = Vec::new();
        pkt.write_to(&mut buf).unwrap();
        let parsed = StreamDataSubPacket::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.stream_id, 5);
        assert_eq!(parsed.fragment, Some((2, 4)));
        assert!(parsed.keyframe);
        assert_eq!(parsed.payload, vec![9; 40]);
    }

    #[test]
    fn stream_data_sub_packet_uses_len16_for_large_payloads() {
        let pkt = StreamDataSubPacket {
            stream_id: 1,
            pts: 1,
            fragment: None,
            keyframe: false,
            extra_fec: true,
            payload: vec![1; 600],
        };
        let mut buf = Vec::new();
        pkt.write_to(&mut buf).unwrap();
        assert_eq!(buf[0] & STREAM_DATA_FLAG_LEN16, STREAM_DATA_FLAG_LEN16);
        let parsed = StreamDataSubPacket::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.payload.len(), 600);
        assert!(parsed.extra_fec);
    }

    #[test]
    fn stream_ec_body_round_trips() {
        let body = StreamEcBody { stream_id: 2, frame_seq: 9, scheme: FEC_SCHEME_XOR, prev_frame_count: 1, fec_payload: vec![1, 2, 3, 4] };
        let mut buf = Vec::new();
        body.write_to(&mut buf).unwrap();
        let parsed = StreamEcBody::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.fec_payload, vec![1, 2, 3, 4]);
        assert_eq!(parsed.scheme, FEC_SCHEME_XOR);
    }

    #[test]
    fn pong_and_lan_endpoint_round_trip() {
        let mut buf = Vec::new();
        PongBody { ping_seq: 77 }.write_to(&mut buf).unwrap();
        assert_eq!(PongBody::read_from(&mut Cursor::new(&buf)).unwrap().ping_seq, 77);

        let mut buf = Vec::new();
        LanEndpointBody { addr: 0x7f000001, port: 5004 }.write_to(&mut buf).unwrap();
        let parsed = LanEndpointBody::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.addr, 0x7f000001);
        assert_eq!(parsed.port, 5004);
    }
}
