//! Plugin lifecycle
//!
//! The plugin is either attached to a host engine, with a live router and
//! event transport, or detached with nothing. [`LifecycleCoordinator`] owns
//! that state machine; the two embedding adapters translate the host's
//! callbacks into [`LifecycleHooks`] calls.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::command::{ Command, CommandError, Response };
use crate::compat::{ self, SecureTransportCompat };
use crate::config::PluginConfig;
use crate::engine::{ EngineMessage, EngineQueue, MediaEngine };
use crate::events::EventTransport;
use crate::router::CommandRouter;
use crate::source::{ AssetResolver, BundledAssets };
use crate::surface::SurfaceRegistry;


/// Facts about the host platform reported at attach time.
#[derive( Clone, Default )]
pub struct HostContext {
    /// Platform API level, if the host reports one.
    pub platform_version: Option<u32>,
    pub secure_transport: Option<Arc<dyn SecureTransportCompat>>,
}


/// Everything the host hands over when it attaches the plugin.
#[derive( Clone )]
pub struct HostBinding {
    pub context: HostContext,
    pub transport: Arc<dyn EventTransport>,
    pub surfaces: Arc<dyn SurfaceRegistry>,
    pub assets: Arc<dyn AssetResolver>,
}


impl HostBinding {
    /// Binding with the default asset layout and an empty context.
    pub fn new( transport: Arc<dyn EventTransport>, surfaces: Arc<dyn SurfaceRegistry> ) -> Self {
        Self {
            context: HostContext::default(),
            transport,
            surfaces,
            assets: Arc::new( BundledAssets::default() ),
        }
    }


    pub fn with_context( mut self, context: HostContext ) -> Self {
        self.context = context;
        self
    }


    pub fn with_assets( mut self, assets: Arc<dyn AssetResolver> ) -> Self {
        self.assets = assets;
        self
    }
}


#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum LifecycleState {
    Attached,
    Detached,
}


/// Host-facing attach/detach hooks.
pub trait LifecycleHooks {
    fn attach( &mut self, binding: HostBinding );
    fn detach( &mut self );
}


struct Attachment {
    router: CommandRouter,
    transport: Arc<dyn EventTransport>,
}


/// Owns the attach/detach state machine and the router while attached.
pub struct LifecycleCoordinator {
    engine: Arc<dyn MediaEngine>,
    config: PluginConfig,
    queue: EngineQueue,
    attached: Option<Attachment>,
}


impl LifecycleCoordinator {
    /// Creates a detached coordinator and the receiver for its engine queue.
    ///
    /// The receiver must be drained into [`LifecycleCoordinator::deliver`].
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        config: PluginConfig,
    ) -> ( Self, mpsc::UnboundedReceiver<EngineMessage> ) {
        let ( queue, rx ) = EngineQueue::new();
        let coordinator = Self {
            engine,
            config,
            queue,
            attached: None,
        };
        ( coordinator, rx )
    }


    pub fn state( &self ) -> LifecycleState {
        if self.attached.is_some() {
            LifecycleState::Attached
        } else {
            LifecycleState::Detached
        }
    }


    /// The live router, if attached.
    pub fn router( &self ) -> Option<&CommandRouter> {
        self.attached.as_ref().map( |a| &a.router )
    }


    /// Attaches to a host. An existing attachment is torn down first.
    pub fn attach( &mut self, binding: HostBinding ) {
        if self.attached.is_some() {
            tracing::warn!( "Attach while already attached, detaching first" );
            self.detach();
        }

        let HostBinding { context, transport, surfaces, assets } = binding;
        compat::apply_legacy_tls( context.platform_version, context.secure_transport.as_deref() );

        let router = CommandRouter::new(
            Arc::clone( &self.engine ),
            surfaces,
            assets,
            Arc::clone( &transport ),
            self.queue.clone(),
            self.config,
        );
        self.attached = Some( Attachment { router, transport } );

        tracing::info!( "Attached to host (platform version {:?})", context.platform_version );
    }


    /// Detaches from the host, disposing every session before the
    /// transport goes away. Returns how many sessions were disposed.
    pub fn detach( &mut self ) -> usize {
        let Some( mut attachment ) = self.attached.take() else {
            tracing::debug!( "Detach while already detached" );
            return 0;
        };

        let disposed = attachment.router.dispose_all();
        attachment.transport.shutdown();

        tracing::info!( "Detached from host ({} sessions disposed)", disposed );
        disposed
    }


    /// Executes a host command against the live router.
    pub fn handle( &mut self, command: Command ) -> Result<Response, CommandError> {
        let attachment = self.attached.as_mut().ok_or( CommandError::NotAttached )?;
        attachment.router.handle( command )
    }


    /// Routes an engine notification. Dropped while detached.
    pub fn deliver( &mut self, message: EngineMessage ) -> bool {
        match self.attached.as_mut() {
            Some( attachment ) => attachment.router.deliver( message ),
            None => {
                tracing::debug!( "Dropping {:?} while detached", message.event );
                false
            }
        }
    }
}


impl LifecycleHooks for LifecycleCoordinator {
    fn attach( &mut self, binding: HostBinding ) {
        LifecycleCoordinator::attach( self, binding );
    }


    fn detach( &mut self ) {
        LifecycleCoordinator::detach( self );
    }
}


/// Adapter for hosts that report engine attach and detach.
pub struct EngineEmbedding<H: LifecycleHooks> {
    hooks: H,
}


impl<H: LifecycleHooks> EngineEmbedding<H> {
    pub fn new( hooks: H ) -> Self {
        Self { hooks }
    }


    pub fn on_attached_to_engine( &mut self, binding: HostBinding ) {
        self.hooks.attach( binding );
    }


    pub fn on_detached_from_engine( &mut self ) {
        self.hooks.detach();
    }


    pub fn hooks( &self ) -> &H {
        &self.hooks
    }


    pub fn hooks_mut( &mut self ) -> &mut H {
        &mut self.hooks
    }
}


/// Adapter for hosts that register a single plugin instance up front and
/// only report when their view is destroyed.
pub struct LegacyEmbedding<H: LifecycleHooks> {
    hooks: H,
    registered: bool,
}


impl<H: LifecycleHooks> LegacyEmbedding<H> {
    /// Registers the plugin, attaching immediately.
    pub fn register_with( mut hooks: H, binding: HostBinding ) -> Self {
        hooks.attach( binding );
        Self { hooks, registered: true }
    }


    /// Host view is going away; equivalent to detach.
    ///
    /// Always returns false: the plugin never adopts the view.
    pub fn on_view_destroy( &mut self ) -> bool {
        if self.registered {
            self.registered = false;
            self.hooks.detach();
        }
        false
    }


    pub fn is_registered( &self ) -> bool {
        self.registered
    }


    pub fn hooks( &self ) -> &H {
        &self.hooks
    }


    pub fn hooks_mut( &mut self ) -> &mut H {
        &mut self.hooks
    }
}


#[cfg( test )]
mod tests {
    use std::sync::atomic::{ AtomicUsize, Ordering };

    use super::*;
    use crate::command::CreateRequest;
    use crate::compat::CompatError;
    use crate::engine::fake::{ prepared, Call, FakeEngine };
    use crate::engine::EngineEvent;
    use crate::events::ChannelTransport;
    use crate::surface::SequentialSurfaces;
    use crate::TextureId;


    fn binding() -> ( HostBinding, Arc<ChannelTransport>, Arc<SequentialSurfaces> ) {
        let transport = Arc::new( ChannelTransport::new() );
        let surfaces = Arc::new( SequentialSurfaces::new() );
        ( HostBinding::new( transport.clone(), surfaces.clone() ), transport, surfaces )
    }


    fn create( coordinator: &mut LifecycleCoordinator ) -> TextureId {
        match coordinator.handle( Command::Create( CreateRequest::asset( "video.mp4" ) ) ).unwrap() {
            Response::Created { texture_id } => texture_id,
            other => panic!( "unexpected response {:?}", other ),
        }
    }


    #[test]
    fn test_commands_fail_when_detached() {
        let ( mut coordinator, _rx ) = LifecycleCoordinator::new( Arc::new( FakeEngine::new() ), PluginConfig::default() );
        assert_eq!( coordinator.state(), LifecycleState::Detached );

        let result = coordinator.handle( Command::Play { texture_id: 1 } );
        assert_eq!( result.unwrap_err().code(), "notAttached" );
        assert_eq!( coordinator.detach(), 0 );
    }


    #[test]
    fn test_detach_disposes_then_shuts_down_transport() {
        let engine = FakeEngine::new();
        let ( mut coordinator, _rx ) = LifecycleCoordinator::new( Arc::new( engine.clone() ), PluginConfig::default() );
        let ( binding, transport, surfaces ) = binding();

        coordinator.attach( binding );
        create( &mut coordinator );
        create( &mut coordinator );

        assert_eq!( coordinator.detach(), 2 );
        assert_eq!( coordinator.state(), LifecycleState::Detached );
        assert!( transport.is_closed() );
        assert_eq!( surfaces.live_count(), 0 );
        assert_eq!( engine.count( |c| matches!( c, Call::Release( _ ) ) ), 2 );
    }


    #[test]
    fn test_reattach_resets_options_and_registry() {
        let engine = FakeEngine::new();
        let ( mut coordinator, _rx ) = LifecycleCoordinator::new( Arc::new( engine.clone() ), PluginConfig::default() );

        coordinator.attach( binding().0 );
        coordinator.handle( Command::SetMixWithOthers { mix_with_others: true } ).unwrap();
        create( &mut coordinator );
        coordinator.detach();

        coordinator.attach( binding().0 );
        let router = coordinator.router().unwrap();
        assert!( !router.global_options().mix_with_others );
        assert_eq!( router.session_count(), 0 );
    }


    #[test]
    fn test_recycled_id_ignores_old_session_events() {
        let engine = FakeEngine::new();
        let ( mut coordinator, mut rx ) = LifecycleCoordinator::new( Arc::new( engine.clone() ), PluginConfig::default() );

        coordinator.attach( binding().0 );
        let old_id = create( &mut coordinator );
        let old_notifier = engine.notifier( old_id );
        coordinator.detach();

        coordinator.attach( binding().0 );
        let new_id = create( &mut coordinator );
        assert_eq!( old_id, new_id );

        old_notifier.notify( EngineEvent::Ended );
        engine.emit( new_id, prepared( 1_000 ) );

        let delivered: Vec<bool> = std::iter::from_fn( || rx.try_recv().ok() )
            .map( |message| coordinator.deliver( message ) )
            .collect();
        assert_eq!( delivered, vec![ false, true ] );
    }


    #[test]
    fn test_engine_messages_dropped_while_detached() {
        let engine = FakeEngine::new();
        let ( mut coordinator, mut rx ) = LifecycleCoordinator::new( Arc::new( engine.clone() ), PluginConfig::default() );

        coordinator.attach( binding().0 );
        let id = create( &mut coordinator );
        engine.emit( id, prepared( 1_000 ) );
        coordinator.detach();

        let message = rx.try_recv().unwrap();
        assert!( !coordinator.deliver( message ) );
    }


    #[test]
    fn test_second_attach_detaches_first() {
        let engine = FakeEngine::new();
        let ( mut coordinator, _rx ) = LifecycleCoordinator::new( Arc::new( engine.clone() ), PluginConfig::default() );
        let ( first, first_transport, _ ) = binding();

        coordinator.attach( first );
        create( &mut coordinator );
        coordinator.attach( binding().0 );

        assert!( first_transport.is_closed() );
        assert_eq!( engine.count( |c| matches!( c, Call::Release( _ ) ) ), 1 );
        assert_eq!( coordinator.state(), LifecycleState::Attached );
    }


    struct CountingShim( AtomicUsize );


    impl SecureTransportCompat for CountingShim {
        fn enable_modern_tls( &self ) -> Result<(), CompatError> {
            self.0.fetch_add( 1, Ordering::SeqCst );
            Err( CompatError::UpgradeFailed( "offline".into() ) )
        }
    }


    #[test]
    fn test_legacy_platform_runs_tls_shim() {
        let ( mut coordinator, _rx ) = LifecycleCoordinator::new( Arc::new( FakeEngine::new() ), PluginConfig::default() );
        let shim = Arc::new( CountingShim( AtomicUsize::new( 0 ) ) );
        let context = HostContext {
            platform_version: Some( 19 ),
            secure_transport: Some( shim.clone() ),
        };

        coordinator.attach( binding().0.with_context( context ) );
        assert_eq!( shim.0.load( Ordering::SeqCst ), 1 );
        // A failing shim does not prevent attachment.
        assert_eq!( coordinator.state(), LifecycleState::Attached );
    }


    #[test]
    fn test_engine_embedding() {
        let ( coordinator, _rx ) = LifecycleCoordinator::new( Arc::new( FakeEngine::new() ), PluginConfig::default() );
        let mut embedding = EngineEmbedding::new( coordinator );

        embedding.on_attached_to_engine( binding().0 );
        assert_eq!( create( embedding.hooks_mut() ), 1 );

        embedding.on_detached_from_engine();
        assert_eq!( embedding.hooks().state(), LifecycleState::Detached );
    }


    #[test]
    fn test_legacy_view_destroy_detaches() {
        let engine = FakeEngine::new();
        let ( coordinator, _rx ) = LifecycleCoordinator::new( Arc::new( engine.clone() ), PluginConfig::default() );
        let ( binding, transport, _ ) = binding();

        let mut embedding = LegacyEmbedding::register_with( coordinator, binding );
        assert!( embedding.is_registered() );
        create( embedding.hooks_mut() );

        assert!( !embedding.on_view_destroy() );
        assert!( !embedding.on_view_destroy() );
        assert_eq!( embedding.hooks().state(), LifecycleState::Detached );
        assert!( transport.is_closed() );
        assert_eq!( engine.count( |c| matches!( c, Call::Release( _ ) ) ), 1 );
    }
}
