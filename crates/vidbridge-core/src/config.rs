//! Plugin configuration

use std::time::Duration;

use serde::{ Deserialize, Serialize };


/// Tunables for the command router.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct PluginConfig {
    /// Minimum spacing of engine-driven buffering updates per session.
    /// Updates triggered by a position query are never throttled.
    pub buffering_update_interval_ms: u64,
}


impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            buffering_update_interval_ms: 250,
        }
    }
}


impl PluginConfig {
    pub fn buffering_update_interval( &self ) -> Duration {
        Duration::from_millis( self.buffering_update_interval_ms )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_fields_use_defaults() {
        let config: PluginConfig = serde_json::from_str( "{}" ).unwrap();
        assert_eq!( config, PluginConfig::default() );
        assert_eq!( config.buffering_update_interval(), Duration::from_millis( 250 ) );
    }
}
