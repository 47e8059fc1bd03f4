//! Native media engine boundary
//!
//! The engine decodes and renders; this crate only drives it. Engines report
//! back through an [`EngineNotifier`], which enqueues onto the command queue
//! instead of calling into the session, so a removed session's late events
//! are dropped on the command thread.

pub mod clock;
#[cfg( test )]
pub( crate ) mod fake;

use std::sync::Arc;
use std::sync::atomic::{ AtomicU64, Ordering };

use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::BufferedRange;
use crate::options::GlobalOptions;
use crate::source::SourceDescriptor;
use crate::TextureId;


/// Errors raised while allocating a native player.
#[derive( Debug, Error )]
pub enum EngineError {
    #[error( "No async runtime available to drive the player" )]
    NoRuntime,

    #[error( "Engine unavailable: {0}" )]
    Unavailable( String ),
}


/// Notifications from a native player.
#[derive( Debug, Clone, PartialEq )]
pub enum EngineEvent {
    /// Preparation finished; media dimensions are known.
    Prepared { duration_ms: i64, width: u32, height: u32 },
    BufferingStart,
    BufferingEnd,
    /// More media was buffered. Sessions rate-limit what they forward.
    BufferingProgress,
    /// Playback reached the end of the stream.
    Ended,
    /// The source could not be opened or playback failed.
    Failed { description: String },
}


/// An engine notification tagged with the session it belongs to.
#[derive( Debug, Clone, PartialEq )]
pub struct EngineMessage {
    pub texture_id: TextureId,
    /// Distinguishes sessions that reuse a recycled texture id.
    pub serial: u64,
    pub event: EngineEvent,
}


/// Callback handle given to a native player.
#[derive( Debug, Clone )]
pub struct EngineNotifier {
    texture_id: TextureId,
    serial: u64,
    tx: mpsc::UnboundedSender<EngineMessage>,
}


impl EngineNotifier {
    /// Enqueues `event`. Returns false once the command queue is gone.
    pub fn notify( &self, event: EngineEvent ) -> bool {
        self.tx
            .send( EngineMessage { texture_id: self.texture_id, serial: self.serial, event } )
            .is_ok()
    }


    pub fn texture_id( &self ) -> TextureId {
        self.texture_id
    }


    pub fn serial( &self ) -> u64 {
        self.serial
    }
}


/// Sending side of the engine message queue.
#[derive( Debug, Clone )]
pub struct EngineQueue {
    tx: mpsc::UnboundedSender<EngineMessage>,
    next_serial: Arc<AtomicU64>,
}


impl EngineQueue {
    /// Creates the queue and its single consumer.
    pub fn new() -> ( Self, mpsc::UnboundedReceiver<EngineMessage> ) {
        let ( tx, rx ) = mpsc::unbounded_channel();
        ( Self { tx, next_serial: Arc::new( AtomicU64::new( 1 ) ) }, rx )
    }


    /// Creates a notifier with a fresh serial for a new session.
    pub fn notifier( &self, texture_id: TextureId ) -> EngineNotifier {
        EngineNotifier {
            texture_id,
            serial: self.next_serial.fetch_add( 1, Ordering::Relaxed ),
            tx: self.tx.clone(),
        }
    }
}


/// One native player instance.
///
/// Calls come from the command thread only. Implementations must not block
/// on preparation.
pub trait NativePlayer: Send {
    fn play( &mut self );
    fn pause( &mut self );
    fn seek_to( &mut self, position_ms: i64 );
    fn set_looping( &mut self, looping: bool );
    fn set_volume( &mut self, volume: f64 );
    fn set_speed( &mut self, speed: f64 );

    /// Current position in milliseconds.
    fn position( &self ) -> i64;

    /// Currently buffered spans.
    fn buffered( &self ) -> Vec<BufferedRange>;

    /// Frees the native resources. Called exactly once.
    fn release( &mut self );
}


/// Factory for native players.
pub trait MediaEngine: Send + Sync {
    /// Allocates a player for `source` and starts preparing it in the
    /// background. Must return without waiting for preparation.
    fn create_player(
        &self,
        source: &SourceDescriptor,
        options: GlobalOptions,
        notifier: EngineNotifier,
    ) -> Result<Box<dyn NativePlayer>, EngineError>;
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_notifier_tags_messages() {
        let ( queue, mut rx ) = EngineQueue::new();
        let first = queue.notifier( 4 );
        let second = queue.notifier( 4 );
        assert_ne!( first.serial(), second.serial() );

        assert!( first.notify( EngineEvent::Ended ) );
        let message = rx.try_recv().unwrap();
        assert_eq!( message.texture_id, 4 );
        assert_eq!( message.serial, first.serial() );
        assert_eq!( message.event, EngineEvent::Ended );
    }


    #[test]
    fn test_notify_after_queue_dropped() {
        let ( queue, rx ) = EngineQueue::new();
        let notifier = queue.notifier( 1 );
        drop( rx );
        assert!( !notifier.notify( EngineEvent::BufferingStart ) );
    }
}
