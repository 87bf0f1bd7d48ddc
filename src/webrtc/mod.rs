//! WebRTC publishing
//!
//! # Architecture
//!
//! ```text
//! PublishableStream ──► RtcPeerSession ──► SenderPump (audio) ──► RTP sender
//!                            │          └─► SenderPump (video) ──► RTP sender
//!                            │                    └─ VideoEncoder
//!                            └─ offer ──► WhipClient ──► ingest ──► answer
//! ```

pub mod encoder;
pub mod ice;
pub mod peer;
pub mod sender;
pub mod signaling;
pub mod whip;

pub use encoder::{
    default_encoder_factory, EncodedVideo, UnavailableEncoderFactory, VideoEncoder,
    VideoEncoderFactory,
};
pub use ice::IceServer;
pub use peer::{PeerConnector, PeerSession, PeerSettings, PublishableStream, RtcPeerConnector};
pub use signaling::{ConnectionState, SdpAnswer, SdpOffer};
pub use whip::{IngestClient, IngestEndpoint, WhipClient, WhipResource};
