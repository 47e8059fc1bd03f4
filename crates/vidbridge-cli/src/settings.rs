//! Harness settings management
//!
//! Persistent settings for the stdio host: where bundled assets live and the
//! plugin and engine tunables.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };

use vidbridge_core::config::PluginConfig;
use vidbridge_core::engine::clock::ClockConfig;
use vidbridge_core::source::BundledAssets;


/// Harness settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Directory bundled asset lookup keys are resolved against
    pub asset_root: PathBuf,

    /// Leading path component of bundled asset lookup keys
    pub asset_prefix: String,

    pub plugin: PluginConfig,

    pub clock: ClockConfig,

    /// Platform API level reported on attach
    pub platform_version: Option<u32>,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from( "." ),
            asset_prefix: BundledAssets::DEFAULT_PREFIX.to_string(),
            plugin: PluginConfig::default(),
            clock: ClockConfig::default(),
            platform_version: None,
        }
    }
}


impl Settings {
    /// Returns the default path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "vidbridge" ).join( "settings.json" ) )
    }


    fn resolve( path: Option<&Path> ) -> Option<PathBuf> {
        path.map( Path::to_path_buf ).or_else( Self::settings_path )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load( path: Option<&Path> ) -> Self {
        let path = match Self::resolve( path ) {
            Some( p ) => p,
            None => return Self::default(),
        };

        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( &path ) {
            Ok( contents ) => Self::parse( &contents ),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Parses settings, falling back to defaults on invalid input.
    pub fn parse( contents: &str ) -> Self {
        serde_json::from_str( contents ).unwrap_or_else( |e| {
            tracing::warn!( "Invalid settings, using defaults: {}", e );
            Self::default()
        })
    }


    /// Saves settings to disk. Returns the path written.
    pub fn save( &self, path: Option<&Path> ) -> Option<PathBuf> {
        let path = Self::resolve( path )?;

        // Create parent directory if needed
        if let Some( parent ) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return None;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( &path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                    return None;
                }
                Some( path )
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
                None
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::parse( r#"{"asset_root":"/srv/app","clock":{"tick_ms":20}}"# );
        assert_eq!( settings.asset_root, PathBuf::from( "/srv/app" ) );
        assert_eq!( settings.asset_prefix, "assets" );
        assert_eq!( settings.clock.tick_ms, 20 );
        assert_eq!( settings.clock.prepare_delay_ms, ClockConfig::default().prepare_delay_ms );
        assert_eq!( settings.plugin, PluginConfig::default() );
    }


    #[test]
    fn test_invalid_file_uses_defaults() {
        assert_eq!( Settings::parse( "not json" ), Settings::default() );
    }


    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load( Some( Path::new( "/nonexistent-vidbridge/settings.json" ) ) );
        assert_eq!( settings, Settings::default() );
    }
}
