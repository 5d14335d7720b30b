//! # pulse-realtime
//!
//! The live half of the Pulse inbox client: the websocket connection
//! supervisor, the inbound event dispatcher, the REST client used for
//! authoritative refetches, and the audio alert emitter.
//!
//! Layering:
//!
//! - [`supervisor::ConnectionSupervisor`] owns the socket lifecycle and
//!   hands raw frames to a [`supervisor::FrameSink`]
//! - [`dispatcher::EventDispatcher`] is that sink in production, routing
//!   events into the projection, ledger, and alert
//! - [`api::HttpApi`] backs the dispatcher's debounced refetch and the
//!   startup conversation load

#![deny(unsafe_code)]

pub mod alert;
pub mod api;
pub mod dispatcher;
pub mod errors;
pub mod frames;
pub mod supervisor;
pub mod transport;

pub use alert::{AlertSink, AudioAlert, NullPlayback, Playback};
pub use api::{ConversationsApi, HttpApi, MessagesApi};
pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use errors::{ApiError, RealtimeError, Result};
pub use supervisor::{
    ConnectionSupervisor, Credentials, FrameDisposition, FrameSink, LoggingSessionGate,
    SessionGate, SupervisorConfig,
};
pub use transport::{Transport, WsTransport};
