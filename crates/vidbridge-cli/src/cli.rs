//! Command-line argument parsing for the vidbridge host harness.

use std::path::PathBuf;

use clap::{ ArgAction, Parser };


/// Vidbridge - drive the video player plugin over stdin/stdout.
///
/// Reads one command per line (JSON or text form), prints one JSON reply per
/// command and one JSON line per session event. Logs go to stderr.
#[derive( Parser, Debug )]
#[command( name = "vidbridge" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Settings file to use instead of the default location.
    #[arg( short, long )]
    pub config: Option<PathBuf>,

    /// Directory bundled assets are resolved against.
    #[arg( short, long )]
    pub assets: Option<PathBuf>,

    /// Platform API level reported to the plugin on attach.
    #[arg( long )]
    pub platform_version: Option<u32>,

    /// Write the effective settings to the settings file and exit.
    #[arg( long )]
    pub save_settings: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg( short, long, action = ArgAction::Count )]
    pub verbose: u8,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_flags() {
        let args = Args::parse_from( [ "vidbridge", "--assets", "/srv/app", "--platform-version", "19", "-vv" ] );
        assert_eq!( args.assets, Some( PathBuf::from( "/srv/app" ) ) );
        assert_eq!( args.platform_version, Some( 19 ) );
        assert_eq!( args.verbose, 2 );
        assert!( !args.save_settings );
    }
}
