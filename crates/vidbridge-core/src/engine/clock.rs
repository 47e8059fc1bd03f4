//! Headless clock-driven engine
//!
//! Prepares a source by probing it, then advances a playback clock in real
//! time. Useful wherever a real decoder is unavailable: the stdio host,
//! integration tests, and hosts that only need timing and status events.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicI64, AtomicU64, Ordering };
use std::time::Duration;

use serde::{ Deserialize, Serialize };
use tokio::task::JoinHandle;
use tokio::time::{ Instant, MissedTickBehavior };

use super::{ EngineError, EngineEvent, EngineNotifier, MediaEngine, NativePlayer };
use crate::events::BufferedRange;
use crate::options::GlobalOptions;
use crate::probe::MediaProbe;
use crate::source::SourceDescriptor;


/// Timing knobs for the clock engine.
#[derive( Debug, Clone, Copy, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct ClockConfig {
    /// Clock resolution in milliseconds.
    pub tick_ms: u64,
    /// Simulated preparation time after probing, in milliseconds.
    pub prepare_delay_ms: u64,
    /// Milliseconds of media buffered per millisecond of wall time for
    /// network sources. Local sources are fully buffered once prepared.
    pub network_fill_rate: f64,
}


impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            prepare_delay_ms: 50,
            network_fill_rate: 4.0,
        }
    }
}


/// State shared between a player handle and its clock task.
#[derive( Debug, Default )]
struct ClockState {
    prepared: AtomicBool,
    playing: AtomicBool,
    looping: AtomicBool,
    released: AtomicBool,
    position_ms: AtomicI64,
    duration_ms: AtomicI64,
    buffered_ms: AtomicI64,
    /// Playback rate stored as f64 bits
    speed: AtomicU64,
    /// Volume stored as f64 bits
    volume: AtomicU64,
}


impl ClockState {
    fn new() -> Self {
        let state = Self::default();
        state.speed.store( 1.0_f64.to_bits(), Ordering::Relaxed );
        state.volume.store( 1.0_f64.to_bits(), Ordering::Relaxed );
        state
    }


    fn speed( &self ) -> f64 {
        f64::from_bits( self.speed.load( Ordering::Acquire ) )
    }


    /// Advances the clock by `elapsed_ms` of wall time.
    ///
    /// Returns true if this step reached the end of a non-looping stream.
    fn advance( &self, elapsed_ms: i64 ) -> bool {
        if !self.playing.load( Ordering::Acquire ) {
            return false;
        }

        let duration = self.duration_ms.load( Ordering::Acquire );
        let delta = ( elapsed_ms as f64 * self.speed() ).round() as i64;
        let wraps = self.looping.load( Ordering::Acquire ) && duration > 0;

        let step = |position: i64| {
            let next = position + delta;
            if next < duration {
                next
            } else if wraps {
                next % duration
            } else {
                duration
            }
        };
        // Retry if a seek lands between the load and the exchange.
        let mut previous = self.position_ms.load( Ordering::Acquire );
        while let Err( current ) = self.position_ms.compare_exchange_weak(
            previous, step( previous ), Ordering::AcqRel, Ordering::Acquire
        ) {
            previous = current;
        }
        let reached_end = !wraps && previous + delta >= duration;

        reached_end && self.playing.swap( false, Ordering::AcqRel )
    }


    /// Grows the buffered span. Returns true if it changed.
    fn fill( &self, amount_ms: i64 ) -> bool {
        let duration = self.duration_ms.load( Ordering::Acquire );
        let previous = self.buffered_ms.load( Ordering::Acquire );
        let next = ( previous + amount_ms ).min( duration );
        self.buffered_ms.store( next, Ordering::Release );
        next != previous
    }
}


/// Engine producing [`ClockPlayer`]s.
pub struct ClockEngine {
    probe: Arc<dyn MediaProbe>,
    config: ClockConfig,
}


impl ClockEngine {
    pub fn new( probe: Arc<dyn MediaProbe>, config: ClockConfig ) -> Self {
        Self { probe, config }
    }
}


impl MediaEngine for ClockEngine {
    fn create_player(
        &self,
        source: &SourceDescriptor,
        options: GlobalOptions,
        notifier: EngineNotifier,
    ) -> Result<Box<dyn NativePlayer>, EngineError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err( |_| EngineError::NoRuntime )?;

        tracing::debug!(
            "Clock player {} for {} (mix_with_others={})",
            notifier.texture_id(),
            source.uri(),
            options.mix_with_others
        );

        let state = Arc::new( ClockState::new() );
        let task = runtime.spawn( drive(
            Arc::clone( &self.probe ),
            source.clone(),
            Arc::clone( &state ),
            notifier,
            self.config,
        ));

        Ok( Box::new( ClockPlayer { state, task: Some( task ) } ) )
    }
}


/// Prepares the source, then runs the clock until released.
async fn drive(
    probe: Arc<dyn MediaProbe>,
    source: SourceDescriptor,
    state: Arc<ClockState>,
    notifier: EngineNotifier,
    config: ClockConfig,
) {
    let network = source.is_network();
    let uri = source.uri();

    if network {
        notifier.notify( EngineEvent::BufferingStart );
    }

    let info = match tokio::task::spawn_blocking( move || probe.probe( &source ) ).await {
        Ok( Ok( info ) ) => info,
        Ok( Err( e ) ) => {
            tracing::warn!( "Failed to prepare {}: {}", uri, e );
            notifier.notify( EngineEvent::Failed { description: format!( "{}: {}", uri, e ) } );
            return;
        }
        Err( e ) => {
            tracing::error!( "Probe task for {} failed: {}", uri, e );
            notifier.notify( EngineEvent::Failed { description: format!( "{}: probe aborted", uri ) } );
            return;
        }
    };

    tokio::time::sleep( Duration::from_millis( config.prepare_delay_ms ) ).await;
    if state.released.load( Ordering::Acquire ) {
        return;
    }

    state.duration_ms.store( info.duration_ms, Ordering::Release );
    if !network {
        state.buffered_ms.store( info.duration_ms, Ordering::Release );
    }
    state.prepared.store( true, Ordering::Release );

    if network {
        notifier.notify( EngineEvent::BufferingEnd );
    }
    notifier.notify( EngineEvent::Prepared {
        duration_ms: info.duration_ms,
        width: info.width,
        height: info.height,
    });

    let mut ticker = tokio::time::interval( Duration::from_millis( config.tick_ms.max( 1 ) ) );
    ticker.set_missed_tick_behavior( MissedTickBehavior::Delay );
    let mut last = Instant::now();

    loop {
        ticker.tick().await;
        if state.released.load( Ordering::Acquire ) {
            break;
        }

        let now = Instant::now();
        let elapsed_ms = now.duration_since( last ).as_millis() as i64;
        last = now;

        if network && state.fill( ( elapsed_ms as f64 * config.network_fill_rate ) as i64 ) {
            notifier.notify( EngineEvent::BufferingProgress );
        }

        if state.advance( elapsed_ms ) {
            tracing::debug!( "Clock player {}: end of stream", notifier.texture_id() );
            notifier.notify( EngineEvent::Ended );
        }
    }

    tracing::debug!( "Clock player {}: exiting", notifier.texture_id() );
}


/// Player handle for the clock engine.
pub struct ClockPlayer {
    state: Arc<ClockState>,
    task: Option<JoinHandle<()>>,
}


impl NativePlayer for ClockPlayer {
    fn play( &mut self ) {
        self.state.playing.store( true, Ordering::Release );
    }


    fn pause( &mut self ) {
        self.state.playing.store( false, Ordering::Release );
    }


    fn seek_to( &mut self, position_ms: i64 ) {
        let position = if self.state.prepared.load( Ordering::Acquire ) {
            position_ms.clamp( 0, self.state.duration_ms.load( Ordering::Acquire ) )
        } else {
            position_ms.max( 0 )
        };
        self.state.position_ms.store( position, Ordering::Release );
    }


    fn set_looping( &mut self, looping: bool ) {
        self.state.looping.store( looping, Ordering::Release );
    }


    fn set_volume( &mut self, volume: f64 ) {
        self.state.volume.store( volume.to_bits(), Ordering::Release );
    }


    fn set_speed( &mut self, speed: f64 ) {
        self.state.speed.store( speed.to_bits(), Ordering::Release );
    }


    fn position( &self ) -> i64 {
        self.state.position_ms.load( Ordering::Acquire )
    }


    fn buffered( &self ) -> Vec<BufferedRange> {
        if !self.state.prepared.load( Ordering::Acquire ) {
            return Vec::new();
        }
        vec![ BufferedRange { start: 0, end: self.state.buffered_ms.load( Ordering::Acquire ) } ]
    }


    fn release( &mut self ) {
        self.state.released.store( true, Ordering::Release );
        self.state.playing.store( false, Ordering::Release );
        if let Some( task ) = self.task.take() {
            task.abort();
        }
    }
}


impl Drop for ClockPlayer {
    fn drop( &mut self ) {
        self.release();
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::engine::{ EngineMessage, EngineQueue };
    use crate::probe::{ MediaInfo, ProbeError };


    fn engine( duration_ms: i64 ) -> ClockEngine {
        let probe = move |_: &SourceDescriptor| -> Result<MediaInfo, ProbeError> {
            Ok( MediaInfo { duration_ms, width: 320, height: 240 } )
        };
        ClockEngine::new( Arc::new( probe ), ClockConfig::default() )
    }


    fn asset() -> SourceDescriptor {
        SourceDescriptor::Asset { lookup_key: "assets/clip.mp4".into() }
    }


    async fn next_event( rx: &mut tokio::sync::mpsc::UnboundedReceiver<EngineMessage> ) -> EngineEvent {
        rx.recv().await.unwrap().event
    }


    #[tokio::test( start_paused = true )]
    async fn test_prepares_then_plays_to_end() {
        let ( queue, mut rx ) = EngineQueue::new();
        let mut player = engine( 1_000 )
            .create_player( &asset(), GlobalOptions::default(), queue.notifier( 1 ) )
            .unwrap();

        assert_eq!(
            next_event( &mut rx ).await,
            EngineEvent::Prepared { duration_ms: 1_000, width: 320, height: 240 }
        );
        assert_eq!( player.buffered(), vec![ BufferedRange { start: 0, end: 1_000 } ] );

        player.play();
        assert_eq!( next_event( &mut rx ).await, EngineEvent::Ended );
        assert_eq!( player.position(), 1_000 );
        player.release();
    }


    #[tokio::test( start_paused = true )]
    async fn test_seek_is_clamped_once_prepared() {
        let ( queue, mut rx ) = EngineQueue::new();
        let mut player = engine( 2_000 )
            .create_player( &asset(), GlobalOptions::default(), queue.notifier( 1 ) )
            .unwrap();
        next_event( &mut rx ).await;

        player.seek_to( 5_000 );
        assert_eq!( player.position(), 2_000 );
        player.seek_to( -10 );
        assert_eq!( player.position(), 0 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_network_source_buffers() {
        let ( queue, mut rx ) = EngineQueue::new();
        let source = SourceDescriptor::Network {
            uri: "https://example.com/a.mp4".into(),
            format_hint: None,
            headers: Default::default(),
        };
        let _player = engine( 10_000 )
            .create_player( &source, GlobalOptions::default(), queue.notifier( 9 ) )
            .unwrap();

        assert_eq!( next_event( &mut rx ).await, EngineEvent::BufferingStart );
        assert_eq!( next_event( &mut rx ).await, EngineEvent::BufferingEnd );
        assert!( matches!( next_event( &mut rx ).await, EngineEvent::Prepared { .. } ) );
        assert_eq!( next_event( &mut rx ).await, EngineEvent::BufferingProgress );
    }


    #[tokio::test( start_paused = true )]
    async fn test_probe_failure_reports_failed() {
        let probe = |_: &SourceDescriptor| -> Result<MediaInfo, ProbeError> {
            Err( ProbeError::UnsupportedFormat )
        };
        let engine = ClockEngine::new( Arc::new( probe ), ClockConfig::default() );
        let ( queue, mut rx ) = EngineQueue::new();
        let _player = engine
            .create_player( &asset(), GlobalOptions::default(), queue.notifier( 2 ) )
            .unwrap();

        assert!( matches!( next_event( &mut rx ).await, EngineEvent::Failed { .. } ) );
    }


    #[test]
    fn test_requires_runtime() {
        let ( queue, _rx ) = EngineQueue::new();
        let result = engine( 1 ).create_player( &asset(), GlobalOptions::default(), queue.notifier( 1 ) );
        assert!( matches!( result, Err( EngineError::NoRuntime ) ) );
    }


    #[test]
    fn test_looping_wraps_instead_of_ending() {
        let state = ClockState::new();
        state.duration_ms.store( 1_000, Ordering::Relaxed );
        state.position_ms.store( 900, Ordering::Relaxed );
        state.looping.store( true, Ordering::Relaxed );
        state.playing.store( true, Ordering::Relaxed );

        assert!( !state.advance( 200 ) );
        assert_eq!( state.position_ms.load( Ordering::Relaxed ), 100 );
    }


    #[test]
    fn test_advance_reports_end_once() {
        let state = ClockState::new();
        state.duration_ms.store( 1_000, Ordering::Relaxed );
        state.position_ms.store( 800, Ordering::Relaxed );
        state.playing.store( true, Ordering::Relaxed );

        assert!( !state.advance( 100 ) );
        assert_eq!( state.position_ms.load( Ordering::Relaxed ), 900 );

        assert!( state.advance( 500 ) );
        assert_eq!( state.position_ms.load( Ordering::Relaxed ), 1_000 );
        assert!( !state.playing.load( Ordering::Relaxed ) );

        // Stopped at the end: later ticks report nothing.
        assert!( !state.advance( 100 ) );
    }


    #[test]
    fn test_speed_scales_advance() {
        let state = ClockState::new();
        state.duration_ms.store( 10_000, Ordering::Relaxed );
        state.speed.store( 2.0_f64.to_bits(), Ordering::Relaxed );
        state.playing.store( true, Ordering::Relaxed );

        state.advance( 100 );
        assert_eq!( state.position_ms.load( Ordering::Relaxed ), 200 );
    }
}
