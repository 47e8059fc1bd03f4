//! Legacy platform compatibility
//!
//! Old host platforms ship a secure transport stack that modern media
//! servers refuse. On attach the host may supply a shim that upgrades it.

use thiserror::Error;


/// Highest platform version that still needs the secure transport upgrade.
pub const LEGACY_TLS_MAX_API_LEVEL: u32 = 20;


/// Errors reported by a secure transport shim.
#[derive( Debug, Error )]
pub enum CompatError {
    #[error( "Secure transport provider unavailable: {0}" )]
    ProviderUnavailable( String ),

    #[error( "Secure transport upgrade failed: {0}" )]
    UpgradeFailed( String ),
}


/// Host hook that enables modern TLS on legacy platforms.
pub trait SecureTransportCompat: Send + Sync {
    fn enable_modern_tls( &self ) -> Result<(), CompatError>;
}


/// Returns true if `platform_version` predates modern TLS support.
///
/// Unknown versions are treated as modern.
pub fn needs_legacy_tls( platform_version: Option<u32> ) -> bool {
    matches!( platform_version, Some( v ) if v <= LEGACY_TLS_MAX_API_LEVEL )
}


/// Runs the shim when the platform needs it.
///
/// Failures are logged and otherwise ignored; playback of sources that do
/// not need TLS is unaffected. Returns true if the shim ran and succeeded.
pub fn apply_legacy_tls( platform_version: Option<u32>, shim: Option<&dyn SecureTransportCompat> ) -> bool {
    if !needs_legacy_tls( platform_version ) {
        return false;
    }

    let Some( shim ) = shim else {
        tracing::warn!(
            "Platform version {:?} needs a secure transport upgrade but the host supplied none",
            platform_version
        );
        return false;
    };

    match shim.enable_modern_tls() {
        Ok(()) => {
            tracing::info!( "Secure transport upgraded for platform version {:?}", platform_version );
            true
        }
        Err( e ) => {
            tracing::warn!( "Secure transport upgrade failed, continuing: {}", e );
            false
        }
    }
}


#[cfg( test )]
mod tests {
    use std::sync::atomic::{ AtomicUsize, Ordering };

    use super::*;


    #[derive( Default )]
    struct CountingShim {
        calls: AtomicUsize,
        fail: bool,
    }


    impl SecureTransportCompat for CountingShim {
        fn enable_modern_tls( &self ) -> Result<(), CompatError> {
            self.calls.fetch_add( 1, Ordering::SeqCst );
            if self.fail {
                Err( CompatError::ProviderUnavailable( "no play services".into() ) )
            } else {
                Ok(())
            }
        }
    }


    #[test]
    fn test_version_threshold() {
        assert!( needs_legacy_tls( Some( 16 ) ) );
        assert!( needs_legacy_tls( Some( 20 ) ) );
        assert!( !needs_legacy_tls( Some( 21 ) ) );
        assert!( !needs_legacy_tls( None ) );
    }


    #[test]
    fn test_shim_only_runs_on_legacy() {
        let shim = CountingShim::default();
        assert!( !apply_legacy_tls( Some( 30 ), Some( &shim ) ) );
        assert_eq!( shim.calls.load( Ordering::SeqCst ), 0 );

        assert!( apply_legacy_tls( Some( 19 ), Some( &shim ) ) );
        assert_eq!( shim.calls.load( Ordering::SeqCst ), 1 );
    }


    #[test]
    fn test_failure_is_not_fatal() {
        let shim = CountingShim { fail: true, ..Default::default() };
        assert!( !apply_legacy_tls( Some( 19 ), Some( &shim ) ) );
        assert!( !apply_legacy_tls( Some( 19 ), None ) );
    }
}
