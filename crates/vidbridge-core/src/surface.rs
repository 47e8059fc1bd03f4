//! Renderable surfaces
//!
//! The host owns the surface allocator; its handle ids are the session
//! identifiers this crate routes commands by.

use std::sync::Arc;
use std::sync::atomic::{ AtomicI64, AtomicUsize, Ordering };

use dashmap::DashSet;

use crate::TextureId;


/// A renderable surface the engine draws into.
pub trait SurfaceHandle: Send {
    /// Identifier unique among live surfaces.
    fn id( &self ) -> TextureId;

    /// Returns the surface to the host. Called exactly once.
    fn release( &mut self );
}


/// Host-side surface allocator.
pub trait SurfaceRegistry: Send + Sync {
    fn create_surface( &self ) -> Box<dyn SurfaceHandle>;
}


/// Allocator handing out ids `1, 2, 3, ...`, never recycling them.
#[derive( Debug )]
pub struct SequentialSurfaces {
    next_id: AtomicI64,
    live: Arc<DashSet<TextureId>>,
    released: Arc<AtomicUsize>,
}


impl SequentialSurfaces {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new( 1 ),
            live: Arc::new( DashSet::new() ),
            released: Arc::new( AtomicUsize::new( 0 ) ),
        }
    }


    /// Number of surfaces allocated and not yet released.
    pub fn live_count( &self ) -> usize {
        self.live.len()
    }


    /// Total number of releases so far.
    pub fn released_count( &self ) -> usize {
        self.released.load( Ordering::Acquire )
    }


    /// Returns true if `id` is allocated and not yet released.
    pub fn is_live( &self, id: TextureId ) -> bool {
        self.live.contains( &id )
    }
}


impl Default for SequentialSurfaces {
    fn default() -> Self {
        Self::new()
    }
}


impl SurfaceRegistry for SequentialSurfaces {
    fn create_surface( &self ) -> Box<dyn SurfaceHandle> {
        let id = self.next_id.fetch_add( 1, Ordering::AcqRel );
        self.live.insert( id );
        Box::new( SequentialSurface {
            id,
            live: Arc::clone( &self.live ),
            released: Arc::clone( &self.released ),
            done: false,
        })
    }
}


struct SequentialSurface {
    id: TextureId,
    live: Arc<DashSet<TextureId>>,
    released: Arc<AtomicUsize>,
    done: bool,
}


impl SurfaceHandle for SequentialSurface {
    fn id( &self ) -> TextureId {
        self.id
    }


    fn release( &mut self ) {
        if self.done {
            return;
        }
        self.done = true;
        self.live.remove( &self.id );
        self.released.fetch_add( 1, Ordering::AcqRel );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_ids_are_sequential_and_distinct() {
        let surfaces = SequentialSurfaces::new();
        let a = surfaces.create_surface();
        let b = surfaces.create_surface();
        assert_eq!( a.id(), 1 );
        assert_eq!( b.id(), 2 );
        assert_eq!( surfaces.live_count(), 2 );
    }


    #[test]
    fn test_release_counts_once() {
        let surfaces = SequentialSurfaces::new();
        let mut handle = surfaces.create_surface();
        handle.release();
        handle.release();
        assert_eq!( surfaces.released_count(), 1 );
        assert!( !surfaces.is_live( 1 ) );
    }
}
