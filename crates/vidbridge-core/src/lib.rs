//! Vidbridge Core - Video playback plugin runtime
//!
//! This crate provides the host-facing side of a video playback plugin:
//! session bookkeeping, command routing, per-session event streams and the
//! attach/detach lifecycle. Decoding and rendering belong to a
//! [`MediaEngine`]; a headless clock-driven engine is included.

pub mod command;
pub mod compat;
pub mod config;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod options;
pub mod probe;
pub mod registry;
pub mod router;
pub mod service;
pub mod session;
pub mod source;
pub mod surface;


/// Identifier of a session and of the surface it renders into.
pub type TextureId = i64;


pub use command::{ Command, CommandError, CreateRequest, Response };
pub use config::PluginConfig;
pub use engine::{ EngineError, EngineEvent, MediaEngine, NativePlayer };
pub use engine::clock::{ ClockConfig, ClockEngine };
pub use events::{ BufferedRange, ChannelTransport, EventStream, EventTransport, SessionEvent };
pub use lifecycle::{ EngineEmbedding, HostBinding, HostContext, LegacyEmbedding, LifecycleCoordinator, LifecycleState };
pub use probe::{ ContainerProbe, MediaProbe };
pub use service::{ PluginHandle, PluginService };
pub use session::PlaybackSession;
pub use source::{ BundledAssets, SourceDescriptor };
pub use surface::SequentialSurfaces;
