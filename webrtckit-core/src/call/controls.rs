use serde::Serialize;

/// Media toggles and connection counters rendered alongside a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallControlsState {
    pub is_camera_enabled: bool,
    pub is_microphone_enabled: bool,
    pub is_speaker_enabled: bool,
    pub is_local_video_visible: bool,
    pub is_remote_video_visible: bool,
    /// Seconds since the call became active.
    pub connection_duration: u64,
    pub local_ice_candidates: u32,
    pub remote_ice_candidates: u32,
}

impl Default for CallControlsState {
    fn default() -> Self {
        Self {
            is_camera_enabled: true,
            is_microphone_enabled: true,
            is_speaker_enabled: false,
            is_local_video_visible: true,
            is_remote_video_visible: false,
            connection_duration: 0,
            local_ice_candidates: 0,
            remote_ice_candidates: 0,
        }
    }
}

impl CallControlsState {
    /// Formats the duration as `MM:SS`, or `H:MM:SS` past the hour.
    pub fn formatted_duration(&self) -> String {
        let secs = self.connection_duration;
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if h > 0 {
            format!("{h}:{m:02}:{s:02}")
        } else {
            format!("{m:02}:{s:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = CallControlsState::default();
        assert!(c.is_camera_enabled);
        assert!(c.is_microphone_enabled);
        assert!(!c.is_speaker_enabled);
        assert!(c.is_local_video_visible);
        assert!(!c.is_remote_video_visible);
        assert_eq!(c.connection_duration, 0);
        assert_eq!(c.local_ice_candidates, 0);
        assert_eq!(c.remote_ice_candidates, 0);
    }

    #[test]
    fn test_formatted_duration() {
        let mut c = CallControlsState::default();
        assert_eq!(c.formatted_duration(), "00:00");
        c.connection_duration = 75;
        assert_eq!(c.formatted_duration(), "01:15");
        c.connection_duration = 3723;
        assert_eq!(c.formatted_duration(), "1:02:03");
    }
}
