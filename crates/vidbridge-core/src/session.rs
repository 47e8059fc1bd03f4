//! Playback sessions
//!
//! A session owns one native player, one surface and one event sink. They
//! are created together in [`PlaybackSession::create`] and released
//! together by [`PlaybackSession::dispose`], which consumes the session.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::engine::{ EngineError, EngineEvent, EngineNotifier, MediaEngine, NativePlayer };
use crate::events::{ EventSink, SessionEvent };
use crate::options::{ GlobalOptions, SessionOptions };
use crate::source::SourceDescriptor;
use crate::surface::SurfaceHandle;
use crate::TextureId;


/// Errors raised by session operations.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( transparent )]
    Engine( #[from] EngineError ),
}


/// Where the native player is in its preparation.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Preparation {
    Preparing,
    Ready { duration_ms: i64 },
    Failed,
}


/// One active playback bound to one surface.
pub struct PlaybackSession {
    texture_id: TextureId,
    serial: u64,
    player: Box<dyn NativePlayer>,
    surface: Box<dyn SurfaceHandle>,
    events: EventSink,
    source: SourceDescriptor,
    options: SessionOptions,
    preparation: Preparation,
    /// Host asked to play; applied once preparation completes
    play_requested: bool,
    buffering_interval: Duration,
    last_buffering_update: Option<Instant>,
}


impl PlaybackSession {
    /// Creates the native player for `source` and starts preparing it.
    ///
    /// On failure the surface and sink are released before returning, so
    /// nothing outlives a session that never existed.
    pub fn create(
        engine: &dyn MediaEngine,
        mut surface: Box<dyn SurfaceHandle>,
        events: EventSink,
        source: SourceDescriptor,
        global: GlobalOptions,
        notifier: EngineNotifier,
        buffering_interval: Duration,
    ) -> Result<Self, SessionError> {
        let texture_id = surface.id();
        let serial = notifier.serial();

        let player = match engine.create_player( &source, global, notifier ) {
            Ok( player ) => player,
            Err( e ) => {
                tracing::warn!( "Session {}: player allocation failed: {}", texture_id, e );
                surface.release();
                events.close();
                return Err( e.into() );
            }
        };

        tracing::info!( "Session {}: created for {}", texture_id, source.uri() );

        Ok( Self {
            texture_id,
            serial,
            player,
            surface,
            events,
            source,
            options: SessionOptions::default(),
            preparation: Preparation::Preparing,
            play_requested: false,
            buffering_interval,
            last_buffering_update: None,
        })
    }


    pub fn texture_id( &self ) -> TextureId {
        self.texture_id
    }


    /// Serial of the notifier this session's player reports through.
    pub fn serial( &self ) -> u64 {
        self.serial
    }


    pub fn source( &self ) -> &SourceDescriptor {
        &self.source
    }


    pub fn options( &self ) -> SessionOptions {
        self.options
    }


    pub fn preparation( &self ) -> Preparation {
        self.preparation
    }


    /// Duration once prepared.
    pub fn duration( &self ) -> Option<i64> {
        match self.preparation {
            Preparation::Ready { duration_ms } => Some( duration_ms ),
            _ => None,
        }
    }


    /// Whether the host last asked for playback, prepared or not.
    pub fn is_playing( &self ) -> bool {
        self.play_requested
    }


    /// Starts playback, or defers it until preparation completes.
    pub fn play( &mut self ) {
        self.play_requested = true;
        match self.preparation {
            Preparation::Ready { .. } => self.player.play(),
            Preparation::Preparing => {
                tracing::debug!( "Session {}: play deferred until prepared", self.texture_id );
            }
            Preparation::Failed => {
                tracing::debug!( "Session {}: play ignored after failure", self.texture_id );
            }
        }
    }


    pub fn pause( &mut self ) {
        self.play_requested = false;
        if let Preparation::Ready { .. } = self.preparation {
            self.player.pause();
        }
    }


    /// Seeks, clamping into `[0, duration]`. Returns the effective target.
    pub fn seek_to( &mut self, position_ms: i64 ) -> i64 {
        let target = self.clamp_position( position_ms );
        self.player.seek_to( target );
        target
    }


    pub fn set_looping( &mut self, looping: bool ) {
        self.options.looping = looping;
        self.player.set_looping( looping );
    }


    /// Sets the volume, clamped into `[0, 1]`. Returns the effective value.
    pub fn set_volume( &mut self, volume: f64 ) -> Result<f64, SessionError> {
        let volume = SessionOptions::clamp_volume( volume )
            .ok_or_else( || SessionError::InvalidArgument( "volume must be a number".into() ) )?;
        self.options.volume = volume;
        self.player.set_volume( volume );
        Ok( volume )
    }


    pub fn set_playback_speed( &mut self, speed: f64 ) -> Result<(), SessionError> {
        if !SessionOptions::is_valid_speed( speed ) {
            return Err( SessionError::InvalidArgument(
                format!( "playback speed must be positive, got {}", speed )
            ));
        }
        self.options.speed = speed;
        self.player.set_speed( speed );
        Ok(())
    }


    /// Returns the current position and pushes a buffering update.
    pub fn position( &mut self ) -> i64 {
        let position = self.clamp_position( self.player.position() );
        self.send_buffering_update();
        position
    }


    /// Emits the currently buffered ranges.
    pub fn send_buffering_update( &mut self ) {
        let values = self.player.buffered();
        self.events.emit( SessionEvent::BufferingUpdate { values } );
        self.last_buffering_update = Some( Instant::now() );
    }


    /// Applies a notification from this session's native player.
    pub fn handle_engine_event( &mut self, event: EngineEvent ) {
        match event {
            EngineEvent::Prepared { duration_ms, width, height } => {
                if self.preparation != Preparation::Preparing {
                    tracing::debug!( "Session {}: ignoring repeated prepare", self.texture_id );
                    return;
                }
                self.preparation = Preparation::Ready { duration_ms };
                tracing::info!(
                    "Session {}: initialized ({} ms, {}x{})",
                    self.texture_id,
                    duration_ms,
                    width,
                    height
                );
                self.events.emit( SessionEvent::Initialized { duration: duration_ms, width, height } );

                if self.play_requested {
                    self.player.play();
                }
            }
            EngineEvent::BufferingStart => {
                self.events.emit( SessionEvent::BufferingStart );
            }
            EngineEvent::BufferingEnd => {
                self.events.emit( SessionEvent::BufferingEnd );
            }
            EngineEvent::BufferingProgress => {
                let due = self.last_buffering_update
                    .map( |at| at.elapsed() >= self.buffering_interval )
                    .unwrap_or( true );
                if due {
                    self.send_buffering_update();
                }
            }
            EngineEvent::Ended => {
                if !self.options.looping {
                    self.play_requested = false;
                    self.events.emit( SessionEvent::Completed );
                }
            }
            EngineEvent::Failed { description } => {
                tracing::warn!( "Session {}: source unavailable: {}", self.texture_id, description );
                self.preparation = Preparation::Failed;
                self.play_requested = false;
                self.events.emit( SessionEvent::Error { description } );
            }
        }
    }


    /// Releases the player, the surface and the event sink, in that order.
    pub fn dispose( self ) {
        let Self { texture_id, mut player, mut surface, events, .. } = self;
        player.release();
        surface.release();
        events.close();
        tracing::info!( "Session {}: disposed", texture_id );
    }


    fn clamp_position( &self, position_ms: i64 ) -> i64 {
        match self.preparation {
            Preparation::Ready { duration_ms } => position_ms.clamp( 0, duration_ms.max( 0 ) ),
            _ => position_ms.max( 0 ),
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::engine::fake::{ prepared, Call, FakeEngine };
    use crate::engine::EngineQueue;
    use crate::events::{ ChannelTransport, EventStream, EventTransport };
    use crate::surface::{ SequentialSurfaces, SurfaceRegistry };


    struct Fixture {
        engine: FakeEngine,
        surfaces: SequentialSurfaces,
        transport: ChannelTransport,
        queue: EngineQueue,
    }


    impl Fixture {
        fn new() -> Self {
            let ( queue, _rx ) = EngineQueue::new();
            Self {
                engine: FakeEngine::new(),
                surfaces: SequentialSurfaces::new(),
                transport: ChannelTransport::new(),
                queue,
            }
        }


        fn session( &self ) -> ( PlaybackSession, EventStream ) {
            let surface = self.surfaces.create_surface();
            let id = surface.id();
            let sink = self.transport.open( id );
            let session = PlaybackSession::create(
                &self.engine,
                surface,
                sink,
                SourceDescriptor::Asset { lookup_key: "assets/video.mp4".into() },
                GlobalOptions::default(),
                self.queue.notifier( id ),
                Duration::from_millis( 250 ),
            ).unwrap();
            ( session, self.transport.listen( id ).unwrap() )
        }
    }


    #[test]
    fn test_play_is_deferred_until_prepared() {
        let fx = Fixture::new();
        let ( mut session, mut events ) = fx.session();

        session.play();
        assert_eq!( fx.engine.count( |c| matches!( c, Call::Play( _ ) ) ), 0 );

        session.handle_engine_event( prepared( 5_000 ) );
        assert_eq!( fx.engine.count( |c| matches!( c, Call::Play( _ ) ) ), 1 );
        assert_eq!(
            events.try_next(),
            Some( SessionEvent::Initialized { duration: 5_000, width: 640, height: 360 } )
        );
    }


    #[test]
    fn test_initialized_exactly_once() {
        let fx = Fixture::new();
        let ( mut session, mut events ) = fx.session();

        session.handle_engine_event( prepared( 1_000 ) );
        session.handle_engine_event( prepared( 1_000 ) );

        assert!( matches!( events.try_next(), Some( SessionEvent::Initialized { .. } ) ) );
        assert_eq!( events.try_next(), None );
    }


    #[test]
    fn test_pause_before_prepare_cancels_deferred_play() {
        let fx = Fixture::new();
        let ( mut session, _events ) = fx.session();

        session.play();
        session.pause();
        session.handle_engine_event( prepared( 1_000 ) );
        assert_eq!( fx.engine.count( |c| matches!( c, Call::Play( _ ) ) ), 0 );
    }


    #[test]
    fn test_seek_clamps_into_duration() {
        let fx = Fixture::new();
        let ( mut session, _events ) = fx.session();
        session.handle_engine_event( prepared( 3_000 ) );

        assert_eq!( session.seek_to( -50 ), 0 );
        assert_eq!( session.seek_to( 9_999 ), 3_000 );
        assert_eq!( session.seek_to( 1_200 ), 1_200 );
        assert!( fx.engine.calls().contains( &Call::Seek( 1, 3_000 ) ) );
    }


    #[test]
    fn test_volume_clamped_and_read_back() {
        let fx = Fixture::new();
        let ( mut session, _events ) = fx.session();

        assert_eq!( session.set_volume( 1.7 ).unwrap(), 1.0 );
        assert_eq!( session.options().volume, 1.0 );
        assert_eq!( session.set_volume( -0.2 ).unwrap(), 0.0 );
        assert_eq!( session.options().volume, 0.0 );
        assert!( fx.engine.calls().contains( &Call::Volume( 1, 0.0 ) ) );
        assert!( matches!( session.set_volume( f64::NAN ), Err( SessionError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_non_positive_speed_rejected() {
        let fx = Fixture::new();
        let ( mut session, _events ) = fx.session();

        assert!( session.set_playback_speed( 0.0 ).is_err() );
        assert!( session.set_playback_speed( -2.0 ).is_err() );
        assert_eq!( session.options().speed, 1.0 );
        session.set_playback_speed( 1.5 ).unwrap();
        assert_eq!( session.options().speed, 1.5 );
    }


    #[test]
    fn test_position_emits_buffering_update() {
        let fx = Fixture::new();
        let ( mut session, mut events ) = fx.session();
        session.handle_engine_event( prepared( 2_000 ) );
        events.try_next();

        fx.engine.set_position( 5_000 );
        assert_eq!( session.position(), 2_000 );
        assert!( matches!( events.try_next(), Some( SessionEvent::BufferingUpdate { .. } ) ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_buffering_progress_is_rate_limited() {
        let fx = Fixture::new();
        let ( mut session, mut events ) = fx.session();

        session.handle_engine_event( EngineEvent::BufferingProgress );
        session.handle_engine_event( EngineEvent::BufferingProgress );
        assert!( matches!( events.try_next(), Some( SessionEvent::BufferingUpdate { .. } ) ) );
        assert_eq!( events.try_next(), None );

        tokio::time::advance( Duration::from_millis( 300 ) ).await;
        session.handle_engine_event( EngineEvent::BufferingProgress );
        assert!( matches!( events.try_next(), Some( SessionEvent::BufferingUpdate { .. } ) ) );
    }


    #[test]
    fn test_completed_only_when_not_looping() {
        let fx = Fixture::new();
        let ( mut session, mut events ) = fx.session();
        session.handle_engine_event( prepared( 1_000 ) );
        events.try_next();

        session.set_looping( true );
        session.handle_engine_event( EngineEvent::Ended );
        assert_eq!( events.try_next(), None );

        session.set_looping( false );
        session.handle_engine_event( EngineEvent::Ended );
        assert_eq!( events.try_next(), Some( SessionEvent::Completed ) );
    }


    #[test]
    fn test_loop_boundary_keeps_play_intent() {
        let fx = Fixture::new();
        let ( mut session, _events ) = fx.session();
        session.set_looping( true );
        session.play();
        session.handle_engine_event( prepared( 1_000 ) );

        session.handle_engine_event( EngineEvent::Ended );
        assert!( session.is_playing() );

        session.set_looping( false );
        session.handle_engine_event( EngineEvent::Ended );
        assert!( !session.is_playing() );
    }


    #[test]
    fn test_error_is_terminal() {
        let fx = Fixture::new();
        let ( mut session, mut events ) = fx.session();

        session.handle_engine_event( EngineEvent::Failed { description: "404".into() } );
        session.handle_engine_event( prepared( 1_000 ) );
        session.handle_engine_event( EngineEvent::BufferingStart );

        assert_eq!( events.try_next(), Some( SessionEvent::Error { description: "404".into() } ) );
        assert_eq!( events.try_next(), None );
        assert_eq!( session.preparation(), Preparation::Failed );
    }


    #[tokio::test]
    async fn test_dispose_releases_everything() {
        let fx = Fixture::new();
        let ( session, mut events ) = fx.session();

        session.dispose();
        assert_eq!( fx.engine.count( |c| matches!( c, Call::Release( 1 ) ) ), 1 );
        assert_eq!( fx.surfaces.live_count(), 0 );
        assert_eq!( events.next().await, None );
    }


    #[test]
    fn test_failed_allocation_releases_siblings() {
        let fx = Fixture::new();
        fx.engine.fail_next();

        let surface = fx.surfaces.create_surface();
        let sink = fx.transport.open( surface.id() );
        let result = PlaybackSession::create(
            &fx.engine,
            surface,
            sink,
            SourceDescriptor::Asset { lookup_key: "x".into() },
            GlobalOptions::default(),
            fx.queue.notifier( 1 ),
            Duration::ZERO,
        );

        assert!( matches!( result, Err( SessionError::Engine( _ ) ) ) );
        assert_eq!( fx.surfaces.live_count(), 0 );
    }
}
