//! Power-aware encoder profile clamping
//!
//! Read once at session start: on battery power the requested profile is
//! throttled to 30 fps / 8 Mbps to preserve battery life. Resolution is
//! never altered. On AC or when the power source is unknown the profile
//! passes through unchanged (desktop machines without a battery are not
//! penalised).

use log::info;

use crate::pipeline::types::EncoderProfile;

const BATTERY_MAX_FPS: u32 = 30;
const BATTERY_MAX_BITRATE_BPS: u32 = 8_000_000;

/// Host power source as reported by the shell's probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Ac,
    Battery,
    Unknown,
}

/// Shell-provided power probe; environment probing itself lives outside
/// the pipeline core.
pub trait PowerProbe: Send + Sync {
    fn power_state(&self) -> PowerState;
}

/// Probe for hosts without battery reporting; never throttles.
#[derive(Debug, Default)]
pub struct AssumeAc;

impl PowerProbe for AssumeAc {
    fn power_state(&self) -> PowerState {
        PowerState::Unknown
    }
}

/// Clamp the requested profile for the current power state.
pub fn clamp_for_power(requested: EncoderProfile, state: PowerState) -> EncoderProfile {
    match state {
        PowerState::Ac | PowerState::Unknown => {
            info!(
                "PowerMode: AC/unknown, using requested profile: {} fps / {} bps",
                requested.fps, requested.bitrate_bps
            );
            requested
        }
        PowerState::Battery => {
            let throttled = EncoderProfile {
                fps: requested.fps.min(BATTERY_MAX_FPS),
                bitrate_bps: requested.bitrate_bps.min(BATTERY_MAX_BITRATE_BPS),
                ..requested
            };
            info!(
                "PowerMode: battery, throttling to {} fps / {} bps (requested: {} fps / {} bps)",
                throttled.fps, throttled.bitrate_bps, requested.fps, requested.bitrate_bps
            );
            throttled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(fps: u32, bitrate: u32) -> EncoderProfile {
        EncoderProfile {
            fps,
            bitrate_bps: bitrate,
            ..EncoderProfile::default()
        }
    }

    #[test]
    fn test_ac_passes_through() {
        let p = clamp_for_power(profile(60, 16_000_000), PowerState::Ac);
        assert_eq!(p.fps, 60);
        assert_eq!(p.bitrate_bps, 16_000_000);
    }

    #[test]
    fn test_unknown_passes_through() {
        let p = clamp_for_power(profile(60, 16_000_000), PowerState::Unknown);
        assert_eq!(p.fps, 60);
        assert_eq!(p.bitrate_bps, 16_000_000);
    }

    #[test]
    fn test_battery_clamps_fps_and_bitrate() {
        let p = clamp_for_power(profile(60, 16_000_000), PowerState::Battery);
        assert_eq!(p.fps, 30);
        assert_eq!(p.bitrate_bps, 8_000_000);
        // Resolution is never clamped.
        assert_eq!((p.width, p.height), (1920, 1080));
    }

    #[test]
    fn test_battery_keeps_modest_profiles() {
        let p = clamp_for_power(profile(30, 4_000_000), PowerState::Battery);
        assert_eq!(p.fps, 30);
        assert_eq!(p.bitrate_bps, 4_000_000);
    }
}
