//! Session registry
//!
//! The single source of truth for which identifiers refer to live sessions.

use std::collections::HashMap;

use thiserror::Error;

use crate::session::PlaybackSession;
use crate::TextureId;


/// Errors returned by registry operations.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum RegistryError {
    #[error( "No session with id {0}" )]
    NotFound( TextureId ),

    #[error( "Session id {0} is already registered" )]
    Duplicate( TextureId ),
}


/// Table of live sessions keyed by texture id.
#[derive( Default )]
pub struct SessionRegistry {
    sessions: HashMap<TextureId, PlaybackSession>,
}


impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }


    /// Registers `session` under its own texture id.
    ///
    /// On a duplicate id the session is handed back untouched so the caller
    /// can dispose it.
    pub fn register( &mut self, session: PlaybackSession ) -> Result<TextureId, ( RegistryError, PlaybackSession )> {
        let id = session.texture_id();
        if self.sessions.contains_key( &id ) {
            return Err(( RegistryError::Duplicate( id ), session ));
        }
        self.sessions.insert( id, session );
        Ok( id )
    }


    /// Looks up a live session.
    pub fn lookup( &mut self, id: TextureId ) -> Result<&mut PlaybackSession, RegistryError> {
        self.sessions.get_mut( &id ).ok_or( RegistryError::NotFound( id ) )
    }


    /// Removes a session, handing ownership to the caller for disposal.
    pub fn remove( &mut self, id: TextureId ) -> Result<PlaybackSession, RegistryError> {
        self.sessions.remove( &id ).ok_or( RegistryError::NotFound( id ) )
    }


    /// Returns true if `id` is registered.
    pub fn contains( &self, id: TextureId ) -> bool {
        self.sessions.contains_key( &id )
    }


    /// Calls `f` on every live session.
    pub fn for_each( &mut self, mut f: impl FnMut( &mut PlaybackSession ) ) {
        for session in self.sessions.values_mut() {
            f( session );
        }
    }


    /// Removes every session, leaving the registry empty.
    pub fn drain( &mut self ) -> Vec<PlaybackSession> {
        self.sessions.drain().map( |( _, session )| session ).collect()
    }


    /// Identifiers of all live sessions, in no particular order.
    pub fn ids( &self ) -> Vec<TextureId> {
        self.sessions.keys().copied().collect()
    }


    pub fn len( &self ) -> usize {
        self.sessions.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.sessions.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::EngineQueue;
    use crate::engine::fake::FakeEngine;
    use crate::events::EventSink;
    use crate::options::GlobalOptions;
    use crate::source::SourceDescriptor;
    use crate::surface::{ SequentialSurfaces, SurfaceHandle, SurfaceRegistry };


    /// Surface with a fixed id, for forcing collisions.
    struct FixedSurface( TextureId );


    impl SurfaceHandle for FixedSurface {
        fn id( &self ) -> TextureId {
            self.0
        }


        fn release( &mut self ) {}
    }


    fn session_with( engine: &FakeEngine, queue: &EngineQueue, surface: Box<dyn SurfaceHandle> ) -> PlaybackSession {
        let id = surface.id();
        PlaybackSession::create(
            engine,
            surface,
            EventSink::disconnected( id ),
            SourceDescriptor::Asset { lookup_key: "a".into() },
            GlobalOptions::default(),
            queue.notifier( id ),
            Duration::ZERO,
        ).unwrap()
    }


    #[test]
    fn test_register_lookup_remove() {
        let engine = FakeEngine::new();
        let ( queue, _rx ) = EngineQueue::new();
        let surfaces = SequentialSurfaces::new();
        let mut registry = SessionRegistry::new();

        let id = registry.register( session_with( &engine, &queue, surfaces.create_surface() ) ).ok().unwrap();
        assert!( registry.lookup( id ).is_ok() );

        let removed = registry.remove( id ).unwrap();
        assert_eq!( removed.texture_id(), id );
        assert_eq!( registry.lookup( id ).err(), Some( RegistryError::NotFound( id ) ) );
        assert_eq!( registry.remove( id ).err(), Some( RegistryError::NotFound( id ) ) );
        removed.dispose();
    }


    #[test]
    fn test_duplicate_rejected() {
        let engine = FakeEngine::new();
        let ( queue, _rx ) = EngineQueue::new();
        let mut registry = SessionRegistry::new();

        registry.register( session_with( &engine, &queue, Box::new( FixedSurface( 5 ) ) ) ).ok().unwrap();
        let result = registry.register( session_with( &engine, &queue, Box::new( FixedSurface( 5 ) ) ) );

        match result {
            Err(( RegistryError::Duplicate( 5 ), rejected )) => rejected.dispose(),
            _ => panic!( "expected duplicate" ),
        }
        assert_eq!( registry.len(), 1 );
    }


    #[test]
    fn test_drain_empties() {
        let engine = FakeEngine::new();
        let ( queue, _rx ) = EngineQueue::new();
        let surfaces = SequentialSurfaces::new();
        let mut registry = SessionRegistry::new();

        for _ in 0..3 {
            registry.register( session_with( &engine, &queue, surfaces.create_surface() ) ).ok().unwrap();
        }
        let mut ids = registry.ids();
        ids.sort();
        assert_eq!( ids, vec![ 1, 2, 3 ] );

        let mut visited = 0;
        registry.for_each( |_| visited += 1 );
        assert_eq!( visited, 3 );

        let drained = registry.drain();
        assert_eq!( drained.len(), 3 );
        assert!( registry.is_empty() );
        drained.into_iter().for_each( PlaybackSession::dispose );
    }
}
