//! Vidbridge CLI - stdio host harness for the video player plugin

mod cli;
mod input;
mod protocol;
mod settings;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, AsyncWriteExt, BufReader };
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cli::Args;
use input::Input;
use protocol::{ EventLine, Reply };
use settings::Settings;

use vidbridge_core::{
    command,
    lifecycle::HostContext,
    BundledAssets, ChannelTransport, ClockEngine, ContainerProbe, EventStream, HostBinding,
    PluginHandle, PluginService, Response, SequentialSurfaces,
};


/// Host side of the plugin: the current attachment's transport.
struct Host {
    handle: PluginHandle,
    settings: Settings,
    transport: Option<Arc<ChannelTransport>>,
    out: mpsc::UnboundedSender<String>,
}


impl Host {
    fn attach( &mut self ) {
        let transport = Arc::new( ChannelTransport::new() );
        let binding = HostBinding::new( transport.clone(), Arc::new( SequentialSurfaces::new() ) )
            .with_assets( Arc::new( BundledAssets::new( self.settings.asset_prefix.clone() ) ) )
            .with_context( HostContext {
                platform_version: self.settings.platform_version,
                secure_transport: None,
            });

        if self.handle.attach( binding ) {
            self.transport = Some( transport );
        }
    }


    fn detach( &mut self ) {
        self.handle.detach();
        self.transport = None;
    }


    async fn call( &mut self, command: vidbridge_core::Command ) {
        let result = self.handle.call( command ).await;

        if let Ok( Response::Created { texture_id } ) = &result {
            match self.transport.as_ref().and_then( |t| t.listen( *texture_id ) ) {
                Some( stream ) => {
                    tokio::spawn( forward_events( stream, self.out.clone() ) );
                }
                None => tracing::warn!( "No event stream for session {}", texture_id ),
            }
        }

        self.emit( &Reply::from( result ) );
    }


    fn emit<T: serde::Serialize>( &self, value: &T ) {
        let _ = self.out.send( protocol::to_line( value ) );
    }
}


/// Copies one session's events to stdout until the stream closes.
async fn forward_events( mut stream: EventStream, out: mpsc::UnboundedSender<String> ) {
    let texture_id = stream.texture_id();
    while let Some( event ) = stream.next().await {
        let line = protocol::to_line( &EventLine { texture_id, event } );
        if out.send( line ).is_err() {
            break;
        }
    }
    tracing::debug!( "Event stream {} closed", texture_id );
}


/// Writes output lines to stdout in the order they were queued.
async fn write_lines( mut rx: mpsc::UnboundedReceiver<String> ) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some( mut line ) = rx.recv().await {
        line.push( '\n' );
        stdout.write_all( line.as_bytes() ).await?;
        stdout.flush().await?;
    }
    Ok(())
}


fn init_logging( verbose: u8 ) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( level ) )
        )
        .with_writer( std::io::stderr )
        .init();
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging( args.verbose );

    let mut settings = Settings::load( args.config.as_deref() );
    if let Some( assets ) = args.assets {
        settings.asset_root = assets;
    }
    if let Some( version ) = args.platform_version {
        settings.platform_version = Some( version );
    }

    if args.save_settings {
        match settings.save( args.config.as_deref() ) {
            Some( path ) => eprintln!( "Settings written to {}", path.display() ),
            None => anyhow::bail!( "Failed to write settings" ),
        }
        return Ok(());
    }

    let probe = ContainerProbe::new( &settings.asset_root );
    let engine = ClockEngine::new( Arc::new( probe ), settings.clock );
    let ( handle, service ) = PluginService::spawn( Arc::new( engine ), settings.plugin );

    let ( out, out_rx ) = mpsc::unbounded_channel();
    let writer = tokio::spawn( write_lines( out_rx ) );

    let mut host = Host { handle: handle.clone(), settings, transport: None, out };
    host.attach();
    tracing::info!( "Ready; reading commands from stdin" );

    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    while let Some( line ) = lines.next_line().await? {
        match input::parse_line( &line ) {
            Ok( Input::Empty ) => {}
            Ok( Input::Quit ) => break,
            Ok( Input::Help ) => eprintln!( "{}\n{}", input::harness_help(), command::help_text() ),
            Ok( Input::Attach ) => host.attach(),
            Ok( Input::Detach ) => host.detach(),
            Ok( Input::Command( command ) ) => host.call( command ).await,
            Err( e ) => host.emit( &Reply::from( Err::<Response, _>( e ) ) ),
        }
    }

    handle.shutdown();
    service.await?;

    drop( host );
    writer.await??;
    Ok(())
}
