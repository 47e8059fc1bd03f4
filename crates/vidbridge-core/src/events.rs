//! Session event streams
//!
//! Each session owns one [`EventSink`] bound to its identifier. The host
//! side receives the matching [`EventStream`] from the transport. Events are
//! delivered in order, at most one listener per session, and nothing follows
//! an `Error`.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };

use dashmap::DashMap;
use serde::{ Deserialize, Serialize };
use tokio::sync::mpsc;

use crate::TextureId;


/// A buffered span of media, in milliseconds.
///
/// Serialized as a `[start, end]` pair.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( from = "[i64; 2]", into = "[i64; 2]" )]
pub struct BufferedRange {
    pub start: i64,
    pub end: i64,
}


impl From<[i64; 2]> for BufferedRange {
    fn from( [ start, end ]: [i64; 2] ) -> Self {
        Self { start, end }
    }
}


impl From<BufferedRange> for [i64; 2] {
    fn from( range: BufferedRange ) -> Self {
        [ range.start, range.end ]
    }
}


/// Status events pushed to the host for one session.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( tag = "event", rename_all = "camelCase" )]
pub enum SessionEvent {
    /// First successful preparation. Sent exactly once.
    Initialized { duration: i64, width: u32, height: u32 },
    /// Natural end of stream while not looping.
    Completed,
    BufferingUpdate { values: Vec<BufferedRange> },
    BufferingStart,
    BufferingEnd,
    /// Terminal: the stream carries nothing after this.
    Error { description: String },
}


impl SessionEvent {
    /// Returns true if no further events may follow this one.
    pub fn is_terminal( &self ) -> bool {
        matches!( self, SessionEvent::Error { .. } )
    }
}


/// Per-session outbound emitter.
///
/// Owned exclusively by its session and closed together with it.
#[derive( Debug )]
pub struct EventSink {
    texture_id: TextureId,
    tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    terminated: bool,

    /// Slot holding the receiver until the host listens, with the
    /// generation that identifies this sink's entry.
    unclaimed: Option<( PendingStreams, u64 )>,
}


impl EventSink {
    /// Creates a sink feeding `tx`.
    pub fn new( texture_id: TextureId, tx: mpsc::UnboundedSender<SessionEvent> ) -> Self {
        Self { texture_id, tx: Some( tx ), terminated: false, unclaimed: None }
    }


    /// Creates a sink with no listener; everything emitted is dropped.
    pub fn disconnected( texture_id: TextureId ) -> Self {
        Self { texture_id, tx: None, terminated: false, unclaimed: None }
    }


    /// Ties the sink to a receiver parked in `pending`, dropped on close
    /// if the host never listened.
    fn with_unclaimed( mut self, pending: PendingStreams, generation: u64 ) -> Self {
        self.unclaimed = Some( ( pending, generation ) );
        self
    }


    /// Emits an event. Returns false if it was dropped.
    pub fn emit( &mut self, event: SessionEvent ) -> bool {
        if self.terminated {
            tracing::debug!( "Session {}: dropping {:?} after terminal error", self.texture_id, event );
            return false;
        }
        if event.is_terminal() {
            self.terminated = true;
        }

        let Some( tx ) = self.tx.as_ref() else {
            return false;
        };
        if tx.send( event ).is_err() {
            tracing::debug!( "Session {}: event listener is gone", self.texture_id );
            return false;
        }
        true
    }


    /// Returns true once an `Error` has been emitted.
    pub fn is_terminated( &self ) -> bool {
        self.terminated
    }


    pub fn texture_id( &self ) -> TextureId {
        self.texture_id
    }


    /// Closes the channel; the listener sees end-of-stream after draining.
    /// A receiver nobody claimed is discarded with its buffered events.
    pub fn close( self ) {
        drop( self );
    }
}


impl Drop for EventSink {
    fn drop( &mut self ) {
        self.tx.take();

        let Some( ( pending, generation ) ) = self.unclaimed.take() else {
            return;
        };
        let removed = pending.remove_if( &self.texture_id, |_, stream| stream.generation == generation );
        if removed.is_some() {
            tracing::debug!( "Session {}: closed before anyone listened", self.texture_id );
        }
    }
}


/// Host-side receiving end of one session's events.
#[derive( Debug )]
pub struct EventStream {
    texture_id: TextureId,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}


impl EventStream {
    pub fn texture_id( &self ) -> TextureId {
        self.texture_id
    }


    /// Waits for the next event. `None` once the session is gone and drained.
    pub async fn next( &mut self ) -> Option<SessionEvent> {
        self.rx.recv().await
    }


    /// Returns the next event if one is already queued.
    pub fn try_next( &mut self ) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}


/// Channel factory the host provides at attach time.
pub trait EventTransport: Send + Sync {
    /// Opens the event channel for a newly allocated surface.
    fn open( &self, texture_id: TextureId ) -> EventSink;

    /// Tears the transport down. Sinks opened afterwards are disconnected.
    fn shutdown( &self );
}


/// Receiver waiting for [`ChannelTransport::listen`].
#[derive( Debug )]
struct PendingStream {
    generation: u64,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}


type PendingStreams = Arc<DashMap<TextureId, PendingStream>>;


/// In-process transport backed by unbounded channels.
///
/// Events emitted before the host starts listening are buffered until the
/// host listens or the sink closes.
#[derive( Debug, Default )]
pub struct ChannelTransport {
    pending: PendingStreams,
    generation: AtomicU64,
    closed: AtomicBool,
}


impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }


    /// Takes the stream for `texture_id`. A session has at most one
    /// listener, so the second call returns `None`.
    pub fn listen( &self, texture_id: TextureId ) -> Option<EventStream> {
        self.pending
            .remove( &texture_id )
            .map( |( texture_id, stream )| EventStream { texture_id, rx: stream.rx } )
    }


    /// Number of streams opened but not yet listened to.
    pub fn pending_count( &self ) -> usize {
        self.pending.len()
    }


    /// Returns true after [`EventTransport::shutdown`].
    pub fn is_closed( &self ) -> bool {
        self.closed.load( Ordering::Acquire )
    }
}


impl EventTransport for ChannelTransport {
    fn open( &self, texture_id: TextureId ) -> EventSink {
        if self.is_closed() {
            tracing::warn!( "Event channel {} requested after transport shutdown", texture_id );
            return EventSink::disconnected( texture_id );
        }

        let ( tx, rx ) = mpsc::unbounded_channel();
        let generation = self.generation.fetch_add( 1, Ordering::Relaxed );
        if self.pending.insert( texture_id, PendingStream { generation, rx } ).is_some() {
            tracing::warn!( "Event channel {} reopened, previous listener dropped", texture_id );
        }
        EventSink::new( texture_id, tx ).with_unclaimed( self.pending.clone(), generation )
    }


    fn shutdown( &self ) {
        self.closed.store( true, Ordering::Release );
        self.pending.clear();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_events_in_order() {
        let transport = ChannelTransport::new();
        let mut sink = transport.open( 7 );
        let mut stream = transport.listen( 7 ).unwrap();

        assert!( sink.emit( SessionEvent::BufferingStart ) );
        assert!( sink.emit( SessionEvent::BufferingEnd ) );

        assert_eq!( stream.try_next(), Some( SessionEvent::BufferingStart ) );
        assert_eq!( stream.try_next(), Some( SessionEvent::BufferingEnd ) );
        assert_eq!( stream.try_next(), None );
    }


    #[test]
    fn test_single_listener() {
        let transport = ChannelTransport::new();
        let _sink = transport.open( 1 );
        assert!( transport.listen( 1 ).is_some() );
        assert!( transport.listen( 1 ).is_none() );
    }


    #[test]
    fn test_error_is_terminal() {
        let transport = ChannelTransport::new();
        let mut sink = transport.open( 3 );
        let mut stream = transport.listen( 3 ).unwrap();

        assert!( sink.emit( SessionEvent::Error { description: "boom".into() } ) );
        assert!( sink.is_terminated() );
        assert!( !sink.emit( SessionEvent::Completed ) );

        assert!( matches!( stream.try_next(), Some( SessionEvent::Error { .. } ) ) );
        assert_eq!( stream.try_next(), None );
    }


    #[tokio::test]
    async fn test_close_ends_stream() {
        let transport = ChannelTransport::new();
        let mut sink = transport.open( 2 );
        let mut stream = transport.listen( 2 ).unwrap();

        sink.emit( SessionEvent::Completed );
        sink.close();

        assert_eq!( stream.next().await, Some( SessionEvent::Completed ) );
        assert_eq!( stream.next().await, None );
    }


    #[test]
    fn test_closing_unlistened_sinks_frees_streams() {
        let transport = ChannelTransport::new();
        for id in 0..1000 {
            let mut sink = transport.open( id );
            sink.emit( SessionEvent::Completed );
            sink.close();
        }
        assert_eq!( transport.pending_count(), 0 );

        // A dropped session releases its stream the same way.
        drop( transport.open( 5 ) );
        assert!( transport.listen( 5 ).is_none() );
    }


    #[test]
    fn test_stale_sink_keeps_reopened_stream() {
        let transport = ChannelTransport::new();
        let stale = transport.open( 4 );
        let mut fresh = transport.open( 4 );
        stale.close();

        assert_eq!( transport.pending_count(), 1 );
        fresh.emit( SessionEvent::BufferingStart );
        let mut stream = transport.listen( 4 ).unwrap();
        assert_eq!( stream.try_next(), Some( SessionEvent::BufferingStart ) );
    }


    #[test]
    fn test_listened_stream_drains_after_close() {
        let transport = ChannelTransport::new();
        let mut sink = transport.open( 9 );
        let mut stream = transport.listen( 9 ).unwrap();

        sink.emit( SessionEvent::BufferingEnd );
        sink.close();

        assert_eq!( transport.pending_count(), 0 );
        assert_eq!( stream.try_next(), Some( SessionEvent::BufferingEnd ) );
        assert_eq!( stream.try_next(), None );
    }


    #[test]
    fn test_shutdown_disconnects_new_sinks() {
        let transport = ChannelTransport::new();
        let _early = transport.open( 1 );
        transport.shutdown();

        assert!( transport.listen( 1 ).is_none() );
        let mut late = transport.open( 2 );
        assert!( !late.emit( SessionEvent::Completed ) );
    }


    #[test]
    fn test_wire_format() {
        let event = SessionEvent::BufferingUpdate {
            values: vec![ BufferedRange { start: 0, end: 1500 } ],
        };
        let json = serde_json::to_value( &event ).unwrap();
        assert_eq!( json, serde_json::json!( { "event": "bufferingUpdate", "values": [ [ 0, 1500 ] ] } ) );

        let init = serde_json::to_value( SessionEvent::Initialized { duration: 10, width: 4, height: 3 } ).unwrap();
        assert_eq!( init[ "event" ], "initialized" );
    }
}
