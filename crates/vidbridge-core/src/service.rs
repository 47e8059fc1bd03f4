//! Plugin service
//!
//! Runs the lifecycle coordinator on a single task. Host requests and engine
//! notifications are both queued to it, so every session sees commands and
//! engine events one at a time and in arrival order.

use std::sync::Arc;

use tokio::sync::{ mpsc, oneshot };
use tokio::task::JoinHandle;

use crate::command::{ Command, CommandError, Response };
use crate::config::PluginConfig;
use crate::engine::{ EngineMessage, MediaEngine };
use crate::lifecycle::{ HostBinding, LifecycleCoordinator, LifecycleHooks };


enum Request {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<Response, CommandError>>,
    },
    Attach( HostBinding ),
    Detach,
    Shutdown,
}


/// Cloneable host-side handle to a running [`PluginService`].
#[derive( Clone )]
pub struct PluginHandle {
    tx: mpsc::UnboundedSender<Request>,
}


impl PluginHandle {
    /// Sends a command and waits for its result.
    ///
    /// A stopped service reports [`CommandError::NotAttached`].
    pub async fn call( &self, command: Command ) -> Result<Response, CommandError> {
        let ( reply, rx ) = oneshot::channel();
        self.tx
            .send( Request::Command { command, reply } )
            .map_err( |_| CommandError::NotAttached )?;
        rx.await.map_err( |_| CommandError::NotAttached )?
    }


    /// Queues an attach. Returns false if the service has stopped.
    pub fn attach( &self, binding: HostBinding ) -> bool {
        self.tx.send( Request::Attach( binding ) ).is_ok()
    }


    /// Queues a detach. Returns false if the service has stopped.
    pub fn detach( &self ) -> bool {
        self.tx.send( Request::Detach ).is_ok()
    }


    /// Asks the service to detach and exit.
    pub fn shutdown( &self ) {
        let _ = self.tx.send( Request::Shutdown );
    }


    pub fn is_running( &self ) -> bool {
        !self.tx.is_closed()
    }
}


impl LifecycleHooks for PluginHandle {
    fn attach( &mut self, binding: HostBinding ) {
        PluginHandle::attach( self, binding );
    }


    fn detach( &mut self ) {
        PluginHandle::detach( self );
    }
}


/// The command thread.
pub struct PluginService {
    coordinator: LifecycleCoordinator,
    requests: mpsc::UnboundedReceiver<Request>,
    engine_rx: mpsc::UnboundedReceiver<EngineMessage>,
}


impl PluginService {
    pub fn new( engine: Arc<dyn MediaEngine>, config: PluginConfig ) -> ( Self, PluginHandle ) {
        let ( coordinator, engine_rx ) = LifecycleCoordinator::new( engine, config );
        let ( tx, requests ) = mpsc::unbounded_channel();
        let service = Self { coordinator, requests, engine_rx };
        ( service, PluginHandle { tx } )
    }


    /// Spawns the service on the current runtime.
    pub fn spawn( engine: Arc<dyn MediaEngine>, config: PluginConfig ) -> ( PluginHandle, JoinHandle<()> ) {
        let ( service, handle ) = Self::new( engine, config );
        let task = tokio::spawn( service.run() );
        ( handle, task )
    }


    /// Processes requests until shutdown or until every handle is dropped.
    pub async fn run( mut self ) {
        tracing::info!( "Plugin service started" );

        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some( Request::Command { command, reply } ) => {
                        let result = self.coordinator.handle( command );
                        if let Err( e ) = &result {
                            tracing::debug!( "Command failed: {} ({})", e, e.code() );
                        }
                        let _ = reply.send( result );
                    }
                    Some( Request::Attach( binding ) ) => self.coordinator.attach( binding ),
                    Some( Request::Detach ) => {
                        self.coordinator.detach();
                    }
                    Some( Request::Shutdown ) | None => break,
                },
                Some( message ) = self.engine_rx.recv() => {
                    self.coordinator.deliver( message );
                }
            }
        }

        self.coordinator.detach();
        tracing::info!( "Plugin service stopped" );
    }
}


#[cfg( test )]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::command::CreateRequest;
    use crate::engine::clock::{ ClockConfig, ClockEngine };
    use crate::events::{ ChannelTransport, SessionEvent };
    use crate::probe::{ MediaInfo, ProbeError };
    use crate::source::SourceDescriptor;
    use crate::surface::SequentialSurfaces;


    fn spawn_service() -> ( PluginHandle, JoinHandle<()>, Arc<ChannelTransport> ) {
        let probe = |_: &SourceDescriptor| -> Result<MediaInfo, ProbeError> {
            Ok( MediaInfo { duration_ms: 10_000, width: 0, height: 0 } )
        };
        let engine = ClockEngine::new( Arc::new( probe ), ClockConfig::default() );
        let ( handle, task ) = PluginService::spawn( Arc::new( engine ), PluginConfig::default() );

        let transport = Arc::new( ChannelTransport::new() );
        assert!( handle.attach( HostBinding::new( transport.clone(), Arc::new( SequentialSurfaces::new() ) ) ) );
        ( handle, task, transport )
    }


    async fn create( handle: &PluginHandle, asset: &str ) -> i64 {
        match handle.call( Command::Create( CreateRequest::asset( asset ) ) ).await.unwrap() {
            Response::Created { texture_id } => texture_id,
            other => panic!( "unexpected response {:?}", other ),
        }
    }


    #[tokio::test( start_paused = true )]
    async fn test_asset_playback_scenario() {
        let ( handle, task, transport ) = spawn_service();

        assert_eq!( create( &handle, "video.mp4" ).await, 1 );
        let mut events = transport.listen( 1 ).unwrap();
        assert_eq!( handle.call( Command::Play { texture_id: 1 } ).await.unwrap(), Response::Ack );

        assert_eq!(
            events.next().await,
            Some( SessionEvent::Initialized { duration: 10_000, width: 0, height: 0 } )
        );

        tokio::time::sleep( Duration::from_millis( 1_000 ) ).await;
        let position = match handle.call( Command::Position { texture_id: 1 } ).await.unwrap() {
            Response::Position { position } => position,
            other => panic!( "unexpected response {:?}", other ),
        };
        assert!( ( 0..=10_000 ).contains( &position ) );
        assert!( position > 0 );
        assert!( matches!( events.next().await, Some( SessionEvent::BufferingUpdate { .. } ) ) );

        assert_eq!( handle.call( Command::Dispose { texture_id: 1 } ).await.unwrap(), Response::Ack );
        let result = handle.call( Command::Pause { texture_id: 1 } ).await;
        assert!( matches!( result, Err( CommandError::SessionNotFound( 1 ) ) ) );
        assert_eq!( events.next().await, None );

        handle.shutdown();
        task.await.unwrap();
    }


    #[tokio::test( start_paused = true )]
    async fn test_two_sessions_scenario() {
        let ( handle, task, transport ) = spawn_service();

        let first = create( &handle, "a.mp4" ).await;
        let second = create( &handle, "b.mp4" ).await;
        assert_ne!( first, second );
        let mut second_events = transport.listen( second ).unwrap();

        handle.call( Command::Dispose { texture_id: first } ).await.unwrap();

        assert!( matches!( second_events.next().await, Some( SessionEvent::Initialized { .. } ) ) );
        handle.call( Command::SetLooping { texture_id: second, is_looping: true } ).await.unwrap();
        handle.call( Command::SetVolume { texture_id: second, volume: 3.0 } ).await.unwrap();
        handle.call( Command::SeekTo { texture_id: second, position: 99_000 } ).await.unwrap();
        assert_eq!(
            handle.call( Command::Position { texture_id: second } ).await.unwrap(),
            Response::Position { position: 10_000 }
        );

        handle.shutdown();
        task.await.unwrap();
    }


    #[tokio::test( start_paused = true )]
    async fn test_detach_then_commands_not_attached() {
        let ( handle, task, transport ) = spawn_service();
        create( &handle, "video.mp4" ).await;
        let mut events = transport.listen( 1 ).unwrap();

        assert!( handle.detach() );
        let result = handle.call( Command::Play { texture_id: 1 } ).await;
        assert_eq!( result.unwrap_err().code(), "notAttached" );
        assert_eq!( events.next().await, None );
        assert!( transport.is_closed() );

        handle.shutdown();
        task.await.unwrap();
        assert!( !handle.is_running() );
        assert!( matches!( handle.call( Command::Play { texture_id: 1 } ).await, Err( CommandError::NotAttached ) ) );
    }


    #[tokio::test( start_paused = true )]
    async fn test_unsupported_source_reports_error_event() {
        let engine = ClockEngine::new(
            Arc::new( crate::probe::ContainerProbe::new( "/nonexistent-vidbridge-root" ) ),
            ClockConfig::default(),
        );
        let ( handle, task ) = PluginService::spawn( Arc::new( engine ), PluginConfig::default() );
        let transport = Arc::new( ChannelTransport::new() );
        handle.attach( HostBinding::new( transport.clone(), Arc::new( SequentialSurfaces::new() ) ) );

        let request = CreateRequest::network( "https://example.com/stream.m3u8" ).with_format_hint( "hls" );
        let created = handle.call( Command::Create( request ) ).await.unwrap();
        assert_eq!( created, Response::Created { texture_id: 1 } );

        let mut events = transport.listen( 1 ).unwrap();
        assert_eq!( events.next().await, Some( SessionEvent::BufferingStart ) );
        assert!( matches!( events.next().await, Some( SessionEvent::Error { .. } ) ) );

        handle.shutdown();
        task.await.unwrap();
    }
}
