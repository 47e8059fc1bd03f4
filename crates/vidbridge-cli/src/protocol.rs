//! Output lines written to stdout.

use serde::Serialize;

use vidbridge_core::{ CommandError, Response, SessionEvent, TextureId };


/// Outcome of one command.
#[derive( Debug, Serialize )]
#[serde( rename_all = "camelCase" )]
pub enum Reply {
    Result( Response ),
    Error { code: &'static str, message: String },
}


impl From<Result<Response, CommandError>> for Reply {
    fn from( result: Result<Response, CommandError> ) -> Self {
        match result {
            Ok( response ) => Reply::Result( response ),
            Err( e ) => Reply::Error { code: e.code(), message: e.to_string() },
        }
    }
}


/// One session event, tagged with its session.
#[derive( Debug, Serialize )]
#[serde( rename_all = "camelCase" )]
pub struct EventLine {
    pub texture_id: TextureId,
    #[serde( flatten )]
    pub event: SessionEvent,
}


/// Serializes an output line, falling back to an error line.
pub fn to_line<T: Serialize>( value: &T ) -> String {
    serde_json::to_string( value ).unwrap_or_else( |e| {
        format!( r#"{{"error":{{"code":"internal","message":"{}"}}}}"#, e )
    })
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_reply_lines() {
        let created = Reply::from( Ok::<_, CommandError>( Response::Created { texture_id: 1 } ) );
        assert_eq!( to_line( &created ), r#"{"result":{"textureId":1}}"# );

        let ack = Reply::from( Ok::<_, CommandError>( Response::Ack ) );
        assert_eq!( to_line( &ack ), r#"{"result":null}"# );

        let missing = Reply::from( Err::<Response, _>( CommandError::SessionNotFound( 7 ) ) );
        assert_eq!(
            to_line( &missing ),
            r#"{"error":{"code":"sessionNotFound","message":"No session with id 7"}}"#
        );
    }


    #[test]
    fn test_event_lines() {
        let line = EventLine { texture_id: 2, event: SessionEvent::Completed };
        assert_eq!( to_line( &line ), r#"{"textureId":2,"event":"completed"}"# );

        let line = EventLine {
            texture_id: 1,
            event: SessionEvent::Initialized { duration: 500, width: 0, height: 0 },
        };
        assert_eq!(
            to_line( &line ),
            r#"{"textureId":1,"event":"initialized","duration":500,"width":0,"height":0}"#
        );
    }
}
