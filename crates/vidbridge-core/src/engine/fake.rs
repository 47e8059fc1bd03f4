//! Recording engine for unit tests.

use std::sync::{ Arc, Mutex };

use super::{ EngineError, EngineEvent, EngineNotifier, MediaEngine, NativePlayer };
use crate::events::BufferedRange;
use crate::options::GlobalOptions;
use crate::source::SourceDescriptor;
use crate::TextureId;


/// A call observed on a fake player.
#[derive( Debug, Clone, PartialEq )]
pub enum Call {
    Create { id: TextureId, source: SourceDescriptor, options: GlobalOptions },
    Play( TextureId ),
    Pause( TextureId ),
    Seek( TextureId, i64 ),
    Looping( TextureId, bool ),
    Volume( TextureId, f64 ),
    Speed( TextureId, f64 ),
    Release( TextureId ),
}


#[derive( Default )]
struct Shared {
    calls: Vec<Call>,
    notifiers: Vec<EngineNotifier>,
    fail_next: bool,
    position_ms: i64,
}


/// Engine whose players do nothing but record calls.
#[derive( Clone, Default )]
pub struct FakeEngine {
    shared: Arc<Mutex<Shared>>,
}


impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn calls( &self ) -> Vec<Call> {
        self.shared.lock().unwrap().calls.clone()
    }


    pub fn count( &self, pred: impl Fn( &Call ) -> bool ) -> usize {
        self.shared.lock().unwrap().calls.iter().filter( |c| pred( c ) ).count()
    }


    /// Latest notifier handed out for `id`.
    pub fn notifier( &self, id: TextureId ) -> EngineNotifier {
        self.shared.lock().unwrap()
            .notifiers
            .iter()
            .rev()
            .find( |n| n.texture_id() == id )
            .cloned()
            .unwrap()
    }


    /// Sends `event` as if the player for `id` raised it.
    pub fn emit( &self, id: TextureId, event: EngineEvent ) {
        assert!( self.notifier( id ).notify( event ) );
    }


    /// Makes the next `create_player` fail.
    pub fn fail_next( &self ) {
        self.shared.lock().unwrap().fail_next = true;
    }


    /// Position reported by every fake player.
    pub fn set_position( &self, position_ms: i64 ) {
        self.shared.lock().unwrap().position_ms = position_ms;
    }
}


impl MediaEngine for FakeEngine {
    fn create_player(
        &self,
        source: &SourceDescriptor,
        options: GlobalOptions,
        notifier: EngineNotifier,
    ) -> Result<Box<dyn NativePlayer>, EngineError> {
        let mut shared = self.shared.lock().unwrap();
        if shared.fail_next {
            shared.fail_next = false;
            return Err( EngineError::Unavailable( "fake failure".into() ) );
        }

        let id = notifier.texture_id();
        shared.calls.push( Call::Create { id, source: source.clone(), options } );
        shared.notifiers.push( notifier );
        Ok( Box::new( FakePlayer { id, shared: Arc::clone( &self.shared ) } ) )
    }
}


struct FakePlayer {
    id: TextureId,
    shared: Arc<Mutex<Shared>>,
}


impl FakePlayer {
    fn record( &self, call: Call ) {
        self.shared.lock().unwrap().calls.push( call );
    }
}


impl NativePlayer for FakePlayer {
    fn play( &mut self ) {
        self.record( Call::Play( self.id ) );
    }


    fn pause( &mut self ) {
        self.record( Call::Pause( self.id ) );
    }


    fn seek_to( &mut self, position_ms: i64 ) {
        self.record( Call::Seek( self.id, position_ms ) );
    }


    fn set_looping( &mut self, looping: bool ) {
        self.record( Call::Looping( self.id, looping ) );
    }


    fn set_volume( &mut self, volume: f64 ) {
        self.record( Call::Volume( self.id, volume ) );
    }


    fn set_speed( &mut self, speed: f64 ) {
        self.record( Call::Speed( self.id, speed ) );
    }


    fn position( &self ) -> i64 {
        self.shared.lock().unwrap().position_ms
    }


    fn buffered( &self ) -> Vec<BufferedRange> {
        vec![ BufferedRange { start: 0, end: 1000 } ]
    }


    fn release( &mut self ) {
        self.record( Call::Release( self.id ) );
    }
}


/// Convenience for tests that only need a prepared event.
pub fn prepared( duration_ms: i64 ) -> EngineEvent {
    EngineEvent::Prepared { duration_ms, width: 640, height: 360 }
}
