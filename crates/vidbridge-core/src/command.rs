//! Host commands
//!
//! The request/response surface the host drives the plugin through. Commands
//! arrive either as JSON messages tagged by `method` or as short text lines
//! parsed by [`Command::parse`].

use std::collections::HashMap;

use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::engine::EngineError;
use crate::registry::RegistryError;
use crate::session::SessionError;
use crate::source::MediaReference;
use crate::TextureId;


/// Errors that can occur during command parsing or execution.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),

    #[error( "No session with id {0}" )]
    SessionNotFound( TextureId ),

    #[error( "Session id {0} is already registered" )]
    DuplicateSession( TextureId ),

    #[error( "Plugin is not attached to a host engine" )]
    NotAttached,

    #[error( transparent )]
    Engine( #[from] EngineError ),
}


impl CommandError {
    /// Stable error code reported to the host.
    pub fn code( &self ) -> &'static str {
        match self {
            CommandError::Unknown( _ ) => "unknownCommand",
            CommandError::InvalidArgument( _ ) => "invalidArgument",
            CommandError::MissingArgument( _ ) => "missingArgument",
            CommandError::SessionNotFound( _ ) => "sessionNotFound",
            CommandError::DuplicateSession( _ ) => "duplicateSession",
            CommandError::NotAttached => "notAttached",
            CommandError::Engine( _ ) => "engineUnavailable",
        }
    }
}


impl From<RegistryError> for CommandError {
    fn from( e: RegistryError ) -> Self {
        match e {
            RegistryError::NotFound( id ) => CommandError::SessionNotFound( id ),
            RegistryError::Duplicate( id ) => CommandError::DuplicateSession( id ),
        }
    }
}


impl From<SessionError> for CommandError {
    fn from( e: SessionError ) -> Self {
        match e {
            SessionError::InvalidArgument( message ) => CommandError::InvalidArgument( message ),
            SessionError::Engine( e ) => CommandError::Engine( e ),
        }
    }
}


/// Arguments of the `create` command.
///
/// Exactly one of `asset` and `uri` is expected; `asset` wins if both are set.
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "camelCase" )]
pub struct CreateRequest {
    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub asset: Option<String>,
    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub package_name: Option<String>,
    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub uri: Option<String>,
    #[serde( default, skip_serializing_if = "Option::is_none" )]
    pub format_hint: Option<String>,
    #[serde( default, skip_serializing_if = "HashMap::is_empty" )]
    pub http_headers: HashMap<String, String>,
}


impl CreateRequest {
    /// Request for a bundled asset.
    pub fn asset( name: impl Into<String> ) -> Self {
        Self { asset: Some( name.into() ), ..Self::default() }
    }


    /// Request for a URI.
    pub fn network( uri: impl Into<String> ) -> Self {
        Self { uri: Some( uri.into() ), ..Self::default() }
    }


    pub fn with_package( mut self, package: impl Into<String> ) -> Self {
        self.package_name = Some( package.into() );
        self
    }


    pub fn with_format_hint( mut self, hint: impl Into<String> ) -> Self {
        self.format_hint = Some( hint.into() );
        self
    }


    pub fn with_header( mut self, name: impl Into<String>, value: impl Into<String> ) -> Self {
        self.http_headers.insert( name.into(), value.into() );
        self
    }


    /// Converts the request into a media reference.
    pub fn into_reference( self ) -> Result<MediaReference, CommandError> {
        match ( self.asset, self.uri ) {
            ( Some( name ), _ ) => Ok( MediaReference::Asset { name, package: self.package_name } ),
            ( None, Some( uri ) ) => Ok( MediaReference::Network {
                uri,
                format_hint: self.format_hint,
                headers: self.http_headers,
            }),
            ( None, None ) => Err( CommandError::MissingArgument( "asset or uri".into() ) ),
        }
    }
}


/// Host command.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase" )]
pub enum Command {
    Create( CreateRequest ),
    Dispose { texture_id: TextureId },
    SetLooping { texture_id: TextureId, is_looping: bool },
    SetVolume { texture_id: TextureId, volume: f64 },
    SetPlaybackSpeed { texture_id: TextureId, speed: f64 },
    Play { texture_id: TextureId },
    Pause { texture_id: TextureId },
    Position { texture_id: TextureId },
    SeekTo { texture_id: TextureId, position: i64 },
    SetMixWithOthers { mix_with_others: bool },
}


/// Successful command result.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( untagged )]
pub enum Response {
    Created {
        #[serde( rename = "textureId" )]
        texture_id: TextureId,
    },
    Position {
        position: i64,
    },
    Ack,
}


impl Command {
    /// Parses a text command such as `play 1` or `seek 1 1:30`.
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args: Vec<&str> = parts.collect();

        match cmd.as_str() {
            "create" | "open" => parse_create( &args ),
            "dispose" | "close" => Ok( Command::Dispose { texture_id: texture_id( &args )? } ),
            "play" | "p" => Ok( Command::Play { texture_id: texture_id( &args )? } ),
            "pause" | "pa" => Ok( Command::Pause { texture_id: texture_id( &args )? } ),
            "position" | "pos" => Ok( Command::Position { texture_id: texture_id( &args )? } ),
            "seek" | "sk" => {
                let texture_id = texture_id( &args )?;
                let time = args.get( 1 )
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                Ok( Command::SeekTo { texture_id, position: parse_time_ms( time )? } )
            }
            "volume" | "vol" => {
                let texture_id = texture_id( &args )?;
                Ok( Command::SetVolume { texture_id, volume: number( &args, 1, "volume" )? } )
            }
            "speed" => {
                let texture_id = texture_id( &args )?;
                Ok( Command::SetPlaybackSpeed { texture_id, speed: number( &args, 1, "speed" )? } )
            }
            "loop" | "looping" => {
                let texture_id = texture_id( &args )?;
                let value = args.get( 1 )
                    .ok_or_else( || CommandError::MissingArgument( "on/off".into() ) )?;
                Ok( Command::SetLooping { texture_id, is_looping: parse_switch( value )? } )
            }
            "mix" => {
                let value = args.first()
                    .ok_or_else( || CommandError::MissingArgument( "on/off".into() ) )?;
                Ok( Command::SetMixWithOthers { mix_with_others: parse_switch( value )? } )
            }

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// The session this command addresses, if any.
    pub fn texture_id( &self ) -> Option<TextureId> {
        match self {
            Command::Create( _ ) | Command::SetMixWithOthers { .. } => None,
            Command::Dispose { texture_id }
            | Command::SetLooping { texture_id, .. }
            | Command::SetVolume { texture_id, .. }
            | Command::SetPlaybackSpeed { texture_id, .. }
            | Command::Play { texture_id }
            | Command::Pause { texture_id }
            | Command::Position { texture_id }
            | Command::SeekTo { texture_id, .. } => Some( *texture_id ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Create( _ ) => "Create a playback session",
            Command::Dispose { .. } => "Dispose a session",
            Command::SetLooping { .. } => "Toggle looping",
            Command::SetVolume { .. } => "Set volume (0.0-1.0)",
            Command::SetPlaybackSpeed { .. } => "Set playback speed",
            Command::Play { .. } => "Start playback",
            Command::Pause { .. } => "Pause playback",
            Command::Position { .. } => "Query position",
            Command::SeekTo { .. } => "Seek to position",
            Command::SetMixWithOthers { .. } => "Mix audio with other apps",
        }
    }
}


fn parse_create( args: &[&str] ) -> Result<Command, CommandError> {
    let kind = args.first()
        .ok_or_else( || CommandError::MissingArgument( "asset or uri".into() ) )?;
    let target = args.get( 1 )
        .ok_or_else( || CommandError::MissingArgument( format!( "{} reference", kind ) ) )?;

    let request = match kind.to_lowercase().as_str() {
        "asset" => {
            let request = CreateRequest::asset( *target );
            match args.get( 2 ) {
                Some( package ) => request.with_package( *package ),
                None => request,
            }
        }
        "uri" | "url" => {
            let request = CreateRequest::network( *target );
            match args.get( 2 ) {
                Some( hint ) => request.with_format_hint( *hint ),
                None => request,
            }
        }
        other => {
            return Err( CommandError::InvalidArgument(
                format!( "Invalid source kind: '{}'. Use 'asset' or 'uri'", other )
            ));
        }
    };

    Ok( Command::Create( request ) )
}


fn texture_id( args: &[&str] ) -> Result<TextureId, CommandError> {
    let raw = args.first()
        .ok_or_else( || CommandError::MissingArgument( "texture id".into() ) )?;
    raw.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid texture id: {}", raw ) ) )
}


fn number( args: &[&str], index: usize, name: &str ) -> Result<f64, CommandError> {
    let raw = args.get( index )
        .ok_or_else( || CommandError::MissingArgument( name.to_string() ) )?;
    raw.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid {}: {}", name, raw ) ) )
}


fn parse_switch( s: &str ) -> Result<bool, CommandError> {
    match s.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok( true ),
        "off" | "false" | "no" | "0" => Ok( false ),
        _ => Err( CommandError::InvalidArgument(
            format!( "Invalid switch: '{}'. Use 'on' or 'off'", s )
        )),
    }
}


/// Parses a time string like "1:30", "90", "12.5" or "1500ms" into milliseconds.
///
/// @param s - Time string in format "MM:SS", seconds, or milliseconds with `ms`
///
/// @returns Milliseconds or error; negative values pass through for clamping
fn parse_time_ms( s: &str ) -> Result<i64, CommandError> {
    let s = s.trim();

    if let Some( ms ) = s.strip_suffix( "ms" ) {
        return ms.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid milliseconds: {}", ms ) ) );
    }

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: i64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: f64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        minutes
            .checked_mul( 60_000 )
            .and_then( |ms| ms.checked_add( ( seconds * 1000.0 ).round() as i64 ) )
            .ok_or_else( || CommandError::InvalidArgument( format!( "Time out of range: {}", s ) ) )
    } else {
        let seconds: f64 = s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        Ok( ( seconds * 1000.0 ).round() as i64 )
    }
}


/// Returns help text listing all available text commands.
pub fn help_text() -> &'static str {
    r#"Session Commands:
  create asset <name> [package]   Create a session for a bundled asset
  create uri <uri> [hint]         Create a session for a URI (hint: ss/hls/dash/other)
  dispose <id>                    Dispose a session

Playback Commands:
  play <id>                       Start playback
  pause <id>                      Pause playback
  seek <id> <time>                Seek (e.g., 1:30, 90, 1500ms)
  position <id>                   Query position
  volume <id> <0.0-1.0>           Set volume
  speed <id> <rate>               Set playback speed
  loop <id> on|off                Toggle looping

Global Commands:
  mix on|off                      Mix audio with other apps"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_create_asset() {
        let cmd = Command::parse( "create asset video.mp4" ).unwrap();
        assert_eq!( cmd, Command::Create( CreateRequest::asset( "video.mp4" ) ) );
    }


    #[test]
    fn test_parse_create_package_asset() {
        let cmd = Command::parse( "open asset intro.mp4 intro_kit" ).unwrap();
        assert_eq!( cmd, Command::Create( CreateRequest::asset( "intro.mp4" ).with_package( "intro_kit" ) ) );
    }


    #[test]
    fn test_parse_create_uri_with_hint() {
        let cmd = Command::parse( "create uri https://example.com/a.m3u8 hls" ).unwrap();
        assert_eq!(
            cmd,
            Command::Create( CreateRequest::network( "https://example.com/a.m3u8" ).with_format_hint( "hls" ) )
        );
    }


    #[test]
    fn test_parse_seek() {
        let cmd = Command::parse( "seek 2 1:30" ).unwrap();
        assert_eq!( cmd, Command::SeekTo { texture_id: 2, position: 90_000 } );
    }


    #[test]
    fn test_parse_seek_forms() {
        assert_eq!( parse_time_ms( "45" ).unwrap(), 45_000 );
        assert_eq!( parse_time_ms( "12.5" ).unwrap(), 12_500 );
        assert_eq!( parse_time_ms( "1500ms" ).unwrap(), 1_500 );
        assert_eq!( parse_time_ms( "-3" ).unwrap(), -3_000 );
    }


    #[test]
    fn test_parse_seek_out_of_range() {
        let result = Command::parse( "seek 1 999999999999999:00" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );

        let result = Command::parse( "seek 1 1:9e300" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_switches() {
        assert_eq!( Command::parse( "loop 1 on" ).unwrap(), Command::SetLooping { texture_id: 1, is_looping: true } );
        assert_eq!( Command::parse( "mix off" ).unwrap(), Command::SetMixWithOthers { mix_with_others: false } );
        assert!( matches!( Command::parse( "loop 1 maybe" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "rewind 1" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "play" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "volume 1" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "play one" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_json_commands() {
        let cmd: Command = serde_json::from_str( r#"{"method":"seekTo","textureId":3,"position":1200}"# ).unwrap();
        assert_eq!( cmd, Command::SeekTo { texture_id: 3, position: 1_200 } );

        let cmd: Command = serde_json::from_str(
            r#"{"method":"create","uri":"https://x/y.mpd","formatHint":"dash","httpHeaders":{"A":"b"}}"#
        ).unwrap();
        assert_eq!(
            cmd,
            Command::Create( CreateRequest::network( "https://x/y.mpd" ).with_format_hint( "dash" ).with_header( "A", "b" ) )
        );

        let cmd: Command = serde_json::from_str( r#"{"method":"setMixWithOthers","mixWithOthers":true}"# ).unwrap();
        assert_eq!( cmd, Command::SetMixWithOthers { mix_with_others: true } );
    }


    #[test]
    fn test_response_wire_format() {
        assert_eq!( serde_json::to_string( &Response::Created { texture_id: 1 } ).unwrap(), r#"{"textureId":1}"# );
        assert_eq!( serde_json::to_string( &Response::Position { position: 20 } ).unwrap(), r#"{"position":20}"# );
        assert_eq!( serde_json::to_string( &Response::Ack ).unwrap(), "null" );
    }


    #[test]
    fn test_create_requires_a_source() {
        let result = CreateRequest::default().into_reference();
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_error_codes() {
        assert_eq!( CommandError::from( RegistryError::NotFound( 1 ) ).code(), "sessionNotFound" );
        assert_eq!( CommandError::from( SessionError::InvalidArgument( "x".into() ) ).code(), "invalidArgument" );
    }
}
