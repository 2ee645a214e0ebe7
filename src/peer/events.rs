use tokio::sync::broadcast;
use webrtckit_core::engine::{MediaKind, PeerConnectionState};
use webrtckit_core::signaling::IceCandidate;

const CHANNEL_CAPACITY: usize = 100;

macro_rules! define_peer_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// One broadcast channel per kind of peer connection event.
        #[derive(Debug)]
        pub struct PeerEventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl PeerEventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_peer_event_bus! {
    (local_candidate, IceCandidate),
    (ice_gathering_complete, ()),
    (connection_state, PeerConnectionState),
    (remote_track, MediaKind),
}

impl Default for PeerEventBus {
    fn default() -> Self {
        Self::new()
    }
}
