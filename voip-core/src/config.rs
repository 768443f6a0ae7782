//! Typed configuration, replacing the source library's
//! `GetString`/`GetInt`/`GetBoolean` lookups with a single immutable
//! snapshot taken at controller construction (spec §9 redesign flag).

/// Controls when audio is allowed to use the cellular data path at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSavingMode {
    Never,
    Mobile,
    Always,
}

/// Options the caller sets once, before `Controller::new`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub init_timeout: f64,
    pub recv_timeout: f64,
    pub reconnecting_timeout: f64,
    pub established_delay_if_no_stream_data: f64,

    pub data_saving: DataSavingMode,

    pub enable_aec: bool,
    pub enable_ns: bool,
    pub enable_agc: bool,
    pub enable_volume_control: bool,
    pub enable_call_upgrade: bool,
    pub enable_video_send: bool,
    pub enable_video_receive: bool,

    pub use_udp: bool,
    pub use_tcp: bool,

    pub max_unsent_stream_packets: usize,

    pub min_audio_bitrate: u32,
    pub max_audio_bitrate: u32,
    pub audio_bitrate_step_incr: u32,
    pub audio_bitrate_step_decr: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            init_timeout: 30.0,
            recv_timeout: 10.0,
            reconnecting_timeout: 2.0,
            established_delay_if_no_stream_data: 1.5,

            data_saving: DataSavingMode::Never,

            enable_aec: true,
            enable_ns: true,
            enable_agc: true,
            enable_volume_control: false,
            enable_call_upgrade: false,
            enable_video_send: false,
            enable_video_receive: false,

            use_udp: true,
            use_tcp: true,

            max_unsent_stream_packets: 2,

            min_audio_bitrate: 8_000,
            max_audio_bitrate: 32_000,
            audio_bitrate_step_incr: 4_000,
            audio_bitrate_step_decr: 6_000,
        }
    }
}

/// Server-tunable thresholds, distributed to clients out-of-band in the
/// original; held here as a plain struct injected at construction rather
/// than looked up from mutable global state (spec §9 redesign flag).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerConfig {
    pub relay_switch_threshold: f64,
    pub p2p_to_relay_switch_threshold: f64,
    pub relay_to_p2p_switch_threshold: f64,
    pub reconnecting_state_timeout: f64,
    pub rate_min_rtt: f64,
    pub rate_min_send_loss: f64,
    pub packet_loss_for_extra_ec: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            relay_switch_threshold: 0.8,
            p2p_to_relay_switch_threshold: 0.6,
            relay_to_p2p_switch_threshold: 0.8,
            reconnecting_state_timeout: 2.0,
            rate_min_rtt: 0.6,
            rate_min_send_loss: 0.2,
            packet_loss_for_extra_ec: 0.02,
        }
    }
}
