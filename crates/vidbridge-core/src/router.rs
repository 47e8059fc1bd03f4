//! Command router
//!
//! Maps host commands onto sessions. Owns the registry, the process-wide
//! options and every collaborator a new session needs. Engine notifications
//! come back through [`CommandRouter::deliver`] on the same thread, so a
//! session that is no longer registered never sees them.

use std::sync::Arc;

use crate::command::{ Command, CommandError, CreateRequest, Response };
use crate::config::PluginConfig;
use crate::engine::{ EngineMessage, EngineQueue, MediaEngine };
use crate::events::EventTransport;
use crate::options::GlobalOptions;
use crate::registry::SessionRegistry;
use crate::session::PlaybackSession;
use crate::source::{ AssetResolver, SourceLocator };
use crate::surface::SurfaceRegistry;
use crate::TextureId;


pub struct CommandRouter {
    registry: SessionRegistry,
    engine: Arc<dyn MediaEngine>,
    surfaces: Arc<dyn SurfaceRegistry>,
    locator: SourceLocator,
    transport: Arc<dyn EventTransport>,
    options: GlobalOptions,
    queue: EngineQueue,
    config: PluginConfig,
}


impl CommandRouter {
    /// Creates a router with an empty registry and default global options.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        surfaces: Arc<dyn SurfaceRegistry>,
        assets: Arc<dyn AssetResolver>,
        transport: Arc<dyn EventTransport>,
        queue: EngineQueue,
        config: PluginConfig,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            engine,
            surfaces,
            locator: SourceLocator::new( assets ),
            transport,
            options: GlobalOptions::default(),
            queue,
            config,
        }
    }


    pub fn global_options( &self ) -> GlobalOptions {
        self.options
    }


    pub fn session_count( &self ) -> usize {
        self.registry.len()
    }


    pub fn contains( &self, texture_id: TextureId ) -> bool {
        self.registry.contains( texture_id )
    }


    /// Executes a host command.
    pub fn handle( &mut self, command: Command ) -> Result<Response, CommandError> {
        tracing::debug!( "Command: {:?}", command );

        match command {
            Command::Create( request ) => {
                let texture_id = self.create( request )?;
                Ok( Response::Created { texture_id } )
            }
            Command::Dispose { texture_id } => {
                self.dispose( texture_id )?;
                Ok( Response::Ack )
            }
            Command::SetLooping { texture_id, is_looping } => {
                self.registry.lookup( texture_id )?.set_looping( is_looping );
                Ok( Response::Ack )
            }
            Command::SetVolume { texture_id, volume } => {
                self.registry.lookup( texture_id )?.set_volume( volume )?;
                Ok( Response::Ack )
            }
            Command::SetPlaybackSpeed { texture_id, speed } => {
                self.registry.lookup( texture_id )?.set_playback_speed( speed )?;
                Ok( Response::Ack )
            }
            Command::Play { texture_id } => {
                self.registry.lookup( texture_id )?.play();
                Ok( Response::Ack )
            }
            Command::Pause { texture_id } => {
                self.registry.lookup( texture_id )?.pause();
                Ok( Response::Ack )
            }
            Command::Position { texture_id } => {
                let position = self.registry.lookup( texture_id )?.position();
                Ok( Response::Position { position } )
            }
            Command::SeekTo { texture_id, position } => {
                self.registry.lookup( texture_id )?.seek_to( position );
                Ok( Response::Ack )
            }
            Command::SetMixWithOthers { mix_with_others } => {
                self.options.mix_with_others = mix_with_others;
                tracing::info!( "Mix with others: {}", mix_with_others );
                Ok( Response::Ack )
            }
        }
    }


    /// Routes an engine notification to its session.
    ///
    /// Returns false if the session is gone or the message came from an
    /// earlier session that used the same id.
    pub fn deliver( &mut self, message: EngineMessage ) -> bool {
        let EngineMessage { texture_id, serial, event } = message;
        match self.registry.lookup( texture_id ) {
            Ok( session ) if session.serial() == serial => {
                session.handle_engine_event( event );
                true
            }
            Ok( _ ) => {
                tracing::debug!( "Session {}: dropping stale {:?} (serial {})", texture_id, event, serial );
                false
            }
            Err( _ ) => {
                tracing::debug!( "Session {}: dropping {:?} for removed session", texture_id, event );
                false
            }
        }
    }


    /// Disposes every session. Returns how many were disposed.
    pub fn dispose_all( &mut self ) -> usize {
        let sessions = self.registry.drain();
        let count = sessions.len();
        for session in sessions {
            session.dispose();
        }
        if count > 0 {
            tracing::info!( "Disposed {} sessions", count );
        }
        count
    }


    fn create( &mut self, request: CreateRequest ) -> Result<TextureId, CommandError> {
        let reference = request.into_reference()?;
        let source = self.locator.locate( reference );

        let surface = self.surfaces.create_surface();
        let texture_id = surface.id();
        let events = self.transport.open( texture_id );

        let session = PlaybackSession::create(
            self.engine.as_ref(),
            surface,
            events,
            source,
            self.options,
            self.queue.notifier( texture_id ),
            self.config.buffering_update_interval(),
        )?;

        match self.registry.register( session ) {
            Ok( texture_id ) => Ok( texture_id ),
            Err(( e, session )) => {
                session.dispose();
                Err( e.into() )
            }
        }
    }


    fn dispose( &mut self, texture_id: TextureId ) -> Result<(), CommandError> {
        let session = self.registry.remove( texture_id )?;
        session.dispose();
        Ok(())
    }
}


#[cfg( test )]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::fake::{ prepared, Call, FakeEngine };
    use crate::engine::EngineEvent;
    use crate::events::{ ChannelTransport, SessionEvent };
    use crate::source::{ BundledAssets, SourceDescriptor };
    use crate::surface::SequentialSurfaces;


    struct Fixture {
        engine: FakeEngine,
        surfaces: Arc<SequentialSurfaces>,
        transport: Arc<ChannelTransport>,
        router: CommandRouter,
        rx: mpsc::UnboundedReceiver<EngineMessage>,
    }


    impl Fixture {
        fn new() -> Self {
            let engine = FakeEngine::new();
            let surfaces = Arc::new( SequentialSurfaces::new() );
            let transport = Arc::new( ChannelTransport::new() );
            let ( queue, rx ) = EngineQueue::new();
            let router = CommandRouter::new(
                Arc::new( engine.clone() ),
                surfaces.clone(),
                Arc::new( BundledAssets::default() ),
                transport.clone(),
                queue,
                PluginConfig::default(),
            );
            Self { engine, surfaces, transport, router, rx }
        }


        fn create( &mut self, asset: &str ) -> TextureId {
            match self.router.handle( Command::Create( CreateRequest::asset( asset ) ) ).unwrap() {
                Response::Created { texture_id } => texture_id,
                other => panic!( "unexpected response {:?}", other ),
            }
        }


        /// Delivers everything the engine has queued so far.
        fn pump( &mut self ) -> usize {
            let mut delivered = 0;
            while let Ok( message ) = self.rx.try_recv() {
                if self.router.deliver( message ) {
                    delivered += 1;
                }
            }
            delivered
        }
    }


    #[test]
    fn test_create_returns_distinct_ids() {
        let mut fx = Fixture::new();
        let first = fx.create( "video.mp4" );
        let second = fx.create( "video.mp4" );

        assert_eq!( first, 1 );
        assert_ne!( first, second );
        assert_eq!( fx.router.session_count(), 2 );
    }


    #[test]
    fn test_create_resolves_asset_key() {
        let mut fx = Fixture::new();
        fx.create( "video.mp4" );

        let created = fx.engine.calls().into_iter().find_map( |c| match c {
            Call::Create { source, .. } => Some( source ),
            _ => None,
        });
        assert_eq!( created, Some( SourceDescriptor::Asset { lookup_key: "assets/video.mp4".into() } ) );
    }


    #[test]
    fn test_commands_after_dispose_fail() {
        let mut fx = Fixture::new();
        let id = fx.create( "video.mp4" );

        assert_eq!( fx.router.handle( Command::Dispose { texture_id: id } ).unwrap(), Response::Ack );
        assert!( !fx.router.contains( id ) );

        let result = fx.router.handle( Command::Pause { texture_id: id } );
        assert!( matches!( result, Err( CommandError::SessionNotFound( i ) ) if i == id ) );

        let result = fx.router.handle( Command::Dispose { texture_id: id } );
        assert!( matches!( result, Err( CommandError::SessionNotFound( _ ) ) ) );
        assert_eq!( fx.engine.count( |c| matches!( c, Call::Release( _ ) ) ), 1 );
    }


    #[test]
    fn test_unknown_id_is_not_found() {
        let mut fx = Fixture::new();
        let result = fx.router.handle( Command::SeekTo { texture_id: 42, position: 0 } );
        assert_eq!( result.unwrap_err().code(), "sessionNotFound" );
    }


    #[tokio::test]
    async fn test_no_events_after_dispose() {
        let mut fx = Fixture::new();
        let id = fx.create( "video.mp4" );
        let mut events = fx.transport.listen( id ).unwrap();
        let notifier = fx.engine.notifier( id );

        fx.router.handle( Command::Dispose { texture_id: id } ).unwrap();
        notifier.notify( prepared( 1_000 ) );

        assert_eq!( fx.pump(), 0 );
        assert_eq!( events.next().await, None );
    }


    #[test]
    fn test_stale_serial_dropped() {
        let mut fx = Fixture::new();
        let id = fx.create( "video.mp4" );
        let serial = fx.engine.notifier( id ).serial();

        let stale = EngineMessage { texture_id: id, serial: serial + 100, event: EngineEvent::Ended };
        assert!( !fx.router.deliver( stale ) );

        let current = EngineMessage { texture_id: id, serial, event: prepared( 1_000 ) };
        assert!( fx.router.deliver( current ) );
    }


    #[test]
    fn test_events_reach_listener() {
        let mut fx = Fixture::new();
        let id = fx.create( "video.mp4" );
        let mut events = fx.transport.listen( id ).unwrap();

        fx.engine.emit( id, prepared( 4_000 ) );
        fx.engine.emit( id, EngineEvent::Ended );
        assert_eq!( fx.pump(), 2 );

        assert!( matches!( events.try_next(), Some( SessionEvent::Initialized { duration: 4_000, .. } ) ) );
        assert_eq!( events.try_next(), Some( SessionEvent::Completed ) );
    }


    #[test]
    fn test_dispose_all() {
        for n in [ 0, 1, 3 ] {
            let mut fx = Fixture::new();
            for _ in 0..n {
                fx.create( "video.mp4" );
            }

            assert_eq!( fx.router.dispose_all(), n );
            assert_eq!( fx.router.session_count(), 0 );
            assert_eq!( fx.engine.count( |c| matches!( c, Call::Release( _ ) ) ), n );
            assert_eq!( fx.surfaces.released_count(), n );
            assert_eq!( fx.surfaces.live_count(), 0 );
        }
    }


    #[test]
    fn test_mix_with_others_only_affects_later_sessions() {
        let mut fx = Fixture::new();
        fx.create( "a.mp4" );
        fx.router.handle( Command::SetMixWithOthers { mix_with_others: true } ).unwrap();
        fx.create( "b.mp4" );

        let mixes: Vec<bool> = fx.engine.calls().into_iter().filter_map( |c| match c {
            Call::Create { options, .. } => Some( options.mix_with_others ),
            _ => None,
        }).collect();
        assert_eq!( mixes, vec![ false, true ] );
        assert!( fx.router.global_options().mix_with_others );
    }


    #[test]
    fn test_sessions_are_independent() {
        let mut fx = Fixture::new();
        let first = fx.create( "a.mp4" );
        let second = fx.create( "b.mp4" );
        fx.engine.emit( second, prepared( 10_000 ) );
        fx.pump();

        fx.router.handle( Command::Dispose { texture_id: first } ).unwrap();

        fx.router.handle( Command::Play { texture_id: second } ).unwrap();
        fx.router.handle( Command::SetVolume { texture_id: second, volume: 0.25 } ).unwrap();
        fx.router.handle( Command::SeekTo { texture_id: second, position: 20_000 } ).unwrap();
        assert_eq!(
            fx.router.handle( Command::Position { texture_id: second } ).unwrap(),
            Response::Position { position: 0 }
        );

        assert!( fx.engine.calls().contains( &Call::Play( second ) ) );
        assert!( fx.engine.calls().contains( &Call::Seek( second, 10_000 ) ) );
        assert!( fx.surfaces.is_live( second ) );
        assert!( !fx.surfaces.is_live( first ) );
    }


    #[test]
    fn test_invalid_arguments() {
        let mut fx = Fixture::new();
        let id = fx.create( "video.mp4" );

        let result = fx.router.handle( Command::SetPlaybackSpeed { texture_id: id, speed: 0.0 } );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );

        let result = fx.router.handle( Command::Create( CreateRequest::default() ) );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
        assert_eq!( fx.surfaces.live_count(), 1 );
    }


    #[test]
    fn test_failed_create_registers_nothing() {
        let mut fx = Fixture::new();
        fx.engine.fail_next();

        let result = fx.router.handle( Command::Create( CreateRequest::asset( "video.mp4" ) ) );
        assert_eq!( result.unwrap_err().code(), "engineUnavailable" );
        assert_eq!( fx.router.session_count(), 0 );
        assert_eq!( fx.surfaces.live_count(), 0 );
    }
}
