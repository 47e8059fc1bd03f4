//! Input line handling for the stdio host.
//!
//! Classifies each line read from stdin as a plugin command, in JSON or
//! text form, or as a harness directive.

use vidbridge_core::{ Command, CommandError };


/// One parsed input line.
#[derive( Debug, Clone, PartialEq )]
pub enum Input {
    /// Blank line or `#` comment.
    Empty,

    /// Forward to the plugin.
    Command( Command ),

    /// Attach the plugin with a fresh transport and surface registry.
    Attach,

    /// Detach the plugin, disposing every session.
    Detach,

    Help,

    Quit,
}


/// Parses one input line.
pub fn parse_line( line: &str ) -> Result<Input, CommandError> {
    let line = line.trim();

    if line.is_empty() || line.starts_with( '#' ) {
        return Ok( Input::Empty );
    }

    if line.starts_with( '{' ) {
        return serde_json::from_str( line )
            .map( Input::Command )
            .map_err( |e| CommandError::InvalidArgument( format!( "Malformed command: {}", e ) ) );
    }

    match line.to_lowercase().as_str() {
        "attach" => Ok( Input::Attach ),
        "detach" => Ok( Input::Detach ),
        "help" | "?" => Ok( Input::Help ),
        "quit" | "exit" | "q" => Ok( Input::Quit ),
        _ => Command::parse( line ).map( Input::Command ),
    }
}


/// Help for harness directives, shown above the plugin command help.
pub fn harness_help() -> &'static str {
    r#"Harness Commands:
  attach                          Attach the plugin (fresh transport)
  detach                          Detach the plugin, disposing all sessions
  help                            Show this help
  quit                            Exit

Commands may also be sent as JSON, e.g. {"method":"play","textureId":1}
"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_directives() {
        assert_eq!( parse_line( "  " ).unwrap(), Input::Empty );
        assert_eq!( parse_line( "# comment" ).unwrap(), Input::Empty );
        assert_eq!( parse_line( "DETACH" ).unwrap(), Input::Detach );
        assert_eq!( parse_line( "q" ).unwrap(), Input::Quit );
    }


    #[test]
    fn test_text_and_json_commands() {
        assert_eq!( parse_line( "play 3" ).unwrap(), Input::Command( Command::Play { texture_id: 3 } ) );
        assert_eq!(
            parse_line( r#"{"method":"setVolume","textureId":2,"volume":0.5}"# ).unwrap(),
            Input::Command( Command::SetVolume { texture_id: 2, volume: 0.5 } )
        );
    }


    #[test]
    fn test_malformed_json() {
        let result = parse_line( r#"{"method":"play"}"# );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }
}
