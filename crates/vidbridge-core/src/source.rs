//! Media source resolution
//!
//! Turns the logical reference a host sends with `create` (a bundled asset,
//! optionally owned by a package, or a URI) into an immutable descriptor the
//! engine can open.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{ Deserialize, Serialize };


/// Scheme used for bundled assets in descriptor URIs.
pub const ASSET_SCHEME: &str = "asset:///";


/// Streaming format hint supplied with network sources.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum FormatHint {
    /// Smooth Streaming
    Ss,
    Hls,
    Dash,
    /// Progressive or any other container
    Other,
}


impl FromStr for FormatHint {
    type Err = String;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ss" => Ok( FormatHint::Ss ),
            "hls" => Ok( FormatHint::Hls ),
            "dash" => Ok( FormatHint::Dash ),
            "other" => Ok( FormatHint::Other ),
            other => Err( format!( "Unknown format hint: '{}'", other ) ),
        }
    }
}


/// Resolved description of what to play and how to fetch it.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( tag = "kind", rename_all = "camelCase" )]
pub enum SourceDescriptor {
    Asset {
        lookup_key: String,
    },
    Network {
        uri: String,
        format_hint: Option<FormatHint>,
        headers: HashMap<String, String>,
    },
}


impl SourceDescriptor {
    /// Returns the URI the engine should open.
    pub fn uri( &self ) -> String {
        match self {
            SourceDescriptor::Asset { lookup_key } => format!( "{}{}", ASSET_SCHEME, lookup_key ),
            SourceDescriptor::Network { uri, .. } => uri.clone(),
        }
    }


    /// Returns true for sources fetched over the network.
    pub fn is_network( &self ) -> bool {
        matches!( self, SourceDescriptor::Network { .. } )
    }
}


/// Logical media reference as sent by the host.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum MediaReference {
    Asset {
        name: String,
        package: Option<String>,
    },
    Network {
        uri: String,
        format_hint: Option<String>,
        headers: HashMap<String, String>,
    },
}


/// Maps bundled asset names to storage lookup keys.
pub trait AssetResolver: Send + Sync {
    /// Lookup key for an asset bundled with the application itself.
    fn key_for_asset( &self, asset: &str ) -> String;

    /// Lookup key for an asset bundled by a dependency package.
    fn key_for_asset_and_package( &self, asset: &str, package: &str ) -> String;
}


/// Resolver for assets stored under a single bundle prefix.
///
/// Application assets live at `<prefix>/<asset>`, package assets at
/// `<prefix>/packages/<package>/<asset>`.
#[derive( Debug, Clone )]
pub struct BundledAssets {
    prefix: String,
}


impl BundledAssets {
    /// Default bundle directory name.
    pub const DEFAULT_PREFIX: &'static str = "assets";


    /// Creates a resolver rooted at `prefix`.
    pub fn new( prefix: impl Into<String> ) -> Self {
        let prefix = prefix.into();
        Self { prefix: prefix.trim_end_matches( '/' ).to_string() }
    }


    fn join( &self, path: &str ) -> String {
        let path = path.trim_start_matches( '/' );
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!( "{}/{}", self.prefix, path )
        }
    }
}


impl Default for BundledAssets {
    fn default() -> Self {
        Self::new( Self::DEFAULT_PREFIX )
    }
}


impl AssetResolver for BundledAssets {
    fn key_for_asset( &self, asset: &str ) -> String {
        self.join( asset )
    }


    fn key_for_asset_and_package( &self, asset: &str, package: &str ) -> String {
        self.join( &format!( "packages/{}/{}", package, asset.trim_start_matches( '/' ) ) )
    }
}


/// Resolves media references into source descriptors.
#[derive( Clone )]
pub struct SourceLocator {
    assets: Arc<dyn AssetResolver>,
}


impl SourceLocator {
    pub fn new( assets: Arc<dyn AssetResolver> ) -> Self {
        Self { assets }
    }


    /// Resolves `reference` into exactly one descriptor.
    ///
    /// Never fails: an unusable key surfaces later, when the engine cannot
    /// open the source.
    pub fn locate( &self, reference: MediaReference ) -> SourceDescriptor {
        match reference {
            MediaReference::Asset { name, package: Some( package ) } => SourceDescriptor::Asset {
                lookup_key: self.assets.key_for_asset_and_package( &name, &package ),
            },
            MediaReference::Asset { name, package: None } => SourceDescriptor::Asset {
                lookup_key: self.assets.key_for_asset( &name ),
            },
            MediaReference::Network { uri, format_hint, headers } => {
                let format_hint = format_hint.and_then( |hint| match hint.parse() {
                    Ok( hint ) => Some( hint ),
                    Err( e ) => {
                        tracing::debug!( "{}, letting the engine infer the format", e );
                        None
                    }
                });
                SourceDescriptor::Network { uri, format_hint, headers }
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn locator() -> SourceLocator {
        SourceLocator::new( Arc::new( BundledAssets::default() ) )
    }


    #[test]
    fn test_locate_plain_asset() {
        let source = locator().locate( MediaReference::Asset {
            name: "video.mp4".into(),
            package: None,
        });
        assert_eq!( source, SourceDescriptor::Asset { lookup_key: "assets/video.mp4".into() } );
        assert_eq!( source.uri(), "asset:///assets/video.mp4" );
    }


    #[test]
    fn test_locate_package_asset() {
        let source = locator().locate( MediaReference::Asset {
            name: "clips/intro.mp4".into(),
            package: Some( "intro_kit".into() ),
        });
        assert_eq!(
            source,
            SourceDescriptor::Asset { lookup_key: "assets/packages/intro_kit/clips/intro.mp4".into() }
        );
    }


    #[test]
    fn test_locate_network_keeps_headers_and_hint() {
        let mut headers = HashMap::new();
        headers.insert( "Authorization".to_string(), "Bearer abc".to_string() );

        let source = locator().locate( MediaReference::Network {
            uri: "https://example.com/live.m3u8".into(),
            format_hint: Some( "HLS".into() ),
            headers: headers.clone(),
        });

        assert!( source.is_network() );
        assert_eq!( source, SourceDescriptor::Network {
            uri: "https://example.com/live.m3u8".into(),
            format_hint: Some( FormatHint::Hls ),
            headers,
        });
    }


    #[test]
    fn test_unknown_format_hint_is_dropped() {
        let source = locator().locate( MediaReference::Network {
            uri: "https://example.com/a.webm".into(),
            format_hint: Some( "webm".into() ),
            headers: HashMap::new(),
        });
        assert!( matches!( source, SourceDescriptor::Network { format_hint: None, .. } ) );
    }


    #[test]
    fn test_empty_prefix() {
        let assets = BundledAssets::new( "" );
        assert_eq!( assets.key_for_asset( "/a.mp4" ), "a.mp4" );
    }
}
