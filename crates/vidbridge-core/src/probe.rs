//! Media probing via Symphonia
//!
//! Reads container headers to learn what the clock engine needs before it
//! can report a session as prepared. Nothing is decoded.

use std::fs::File;
use std::path::{ Path, PathBuf };

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::source::SourceDescriptor;


/// What a prepared source looks like.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct MediaInfo {
    pub duration_ms: i64,
    /// Frame size; zero for streams without video.
    pub width: u32,
    pub height: u32,
}


/// Errors that can occur while probing a source.
#[derive( Debug, Error )]
pub enum ProbeError {
    #[error( "Failed to open source: {0}" )]
    Open( #[from] std::io::Error ),

    #[error( "Unsupported scheme: {0}" )]
    UnsupportedScheme( String ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No playable tracks found" )]
    NoTracks,

    #[error( "Duration could not be determined" )]
    UnknownDuration,
}


/// Inspects a source and reports its media info.
pub trait MediaProbe: Send + Sync {
    fn probe( &self, source: &SourceDescriptor ) -> Result<MediaInfo, ProbeError>;
}


impl<F> MediaProbe for F
where
    F: Fn( &SourceDescriptor ) -> Result<MediaInfo, ProbeError> + Send + Sync,
{
    fn probe( &self, source: &SourceDescriptor ) -> Result<MediaInfo, ProbeError> {
        self( source )
    }
}


/// Probe for local containers.
///
/// Asset lookup keys are resolved under `asset_root`. Network sources are
/// accepted only as `file://` URIs or bare paths.
#[derive( Debug, Clone )]
pub struct ContainerProbe {
    asset_root: PathBuf,
}


impl ContainerProbe {
    pub fn new( asset_root: impl Into<PathBuf> ) -> Self {
        Self { asset_root: asset_root.into() }
    }


    /// Maps a descriptor to a local path.
    pub fn resolve_path( &self, source: &SourceDescriptor ) -> Result<PathBuf, ProbeError> {
        match source {
            SourceDescriptor::Asset { lookup_key } => Ok( self.asset_root.join( lookup_key ) ),
            SourceDescriptor::Network { uri, .. } => {
                if let Some( path ) = uri.strip_prefix( "file://" ) {
                    Ok( PathBuf::from( path ) )
                } else if let Some(( scheme, _ )) = uri.split_once( "://" ) {
                    Err( ProbeError::UnsupportedScheme( scheme.to_string() ) )
                } else {
                    Ok( PathBuf::from( uri ) )
                }
            }
        }
    }


    fn probe_path( path: &Path ) -> Result<MediaInfo, ProbeError> {
        let file = File::open( path )?;
        let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions::default() );

        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| ProbeError::UnsupportedFormat )?;

        let tracks = probed.format.tracks();
        if tracks.is_empty() {
            return Err( ProbeError::NoTracks );
        }

        // Longest track wins; containers may carry short auxiliary streams.
        let duration_secs = tracks
            .iter()
            .filter_map( |track| {
                let params = &track.codec_params;
                let frames = params.n_frames?;
                if let Some( time_base ) = params.time_base {
                    let time = time_base.calc_time( frames );
                    Some( time.seconds as f64 + time.frac )
                } else {
                    params.sample_rate.map( |rate| frames as f64 / rate as f64 )
                }
            })
            .fold( None, |longest: Option<f64>, secs| Some( longest.map_or( secs, |l| l.max( secs ) ) ) )
            .ok_or( ProbeError::UnknownDuration )?;

        tracing::info!( "Probed {:?}: {} tracks, {:.3}s", path, tracks.len(), duration_secs );

        Ok( MediaInfo {
            duration_ms: ( duration_secs * 1000.0 ).round() as i64,
            width: 0,
            height: 0,
        })
    }
}


impl MediaProbe for ContainerProbe {
    fn probe( &self, source: &SourceDescriptor ) -> Result<MediaInfo, ProbeError> {
        let path = self.resolve_path( source )?;
        Self::probe_path( &path )
    }
}


#[cfg( test )]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;


    fn network( uri: &str ) -> SourceDescriptor {
        SourceDescriptor::Network { uri: uri.into(), format_hint: None, headers: HashMap::new() }
    }


    /// Silent 16-bit mono PCM WAV.
    fn wav_bytes( sample_rate: u32, samples: u32 ) -> Vec<u8> {
        let data_len = samples * 2;
        let mut bytes = Vec::with_capacity( 44 + data_len as usize );
        bytes.extend_from_slice( b"RIFF" );
        bytes.extend_from_slice( &( 36 + data_len ).to_le_bytes() );
        bytes.extend_from_slice( b"WAVEfmt " );
        bytes.extend_from_slice( &16u32.to_le_bytes() );
        bytes.extend_from_slice( &1u16.to_le_bytes() );
        bytes.extend_from_slice( &1u16.to_le_bytes() );
        bytes.extend_from_slice( &sample_rate.to_le_bytes() );
        bytes.extend_from_slice( &( sample_rate * 2 ).to_le_bytes() );
        bytes.extend_from_slice( &2u16.to_le_bytes() );
        bytes.extend_from_slice( &16u16.to_le_bytes() );
        bytes.extend_from_slice( b"data" );
        bytes.extend_from_slice( &data_len.to_le_bytes() );
        bytes.resize( 44 + data_len as usize, 0 );
        bytes
    }


    #[test]
    fn test_wav_duration() {
        let root = TempDir::new().unwrap();
        std::fs::write( root.path().join( "tone.wav" ), wav_bytes( 8000, 16_000 ) ).unwrap();

        let probe = ContainerProbe::new( root.path() );
        let info = probe.probe( &SourceDescriptor::Asset { lookup_key: "tone.wav".into() } ).unwrap();
        assert_eq!( info, MediaInfo { duration_ms: 2000, width: 0, height: 0 } );

        let uri = format!( "file://{}", root.path().join( "tone.wav" ).display() );
        assert_eq!( probe.probe( &network( &uri ) ).unwrap().duration_ms, 2000 );
    }


    #[test]
    fn test_resolve_asset_under_root() {
        let probe = ContainerProbe::new( "/srv/bundle" );
        let path = probe
            .resolve_path( &SourceDescriptor::Asset { lookup_key: "assets/video.mp4".into() } )
            .unwrap();
        assert_eq!( path, PathBuf::from( "/srv/bundle/assets/video.mp4" ) );
    }


    #[test]
    fn test_resolve_file_uri_and_bare_path() {
        let probe = ContainerProbe::new( "." );
        assert_eq!( probe.resolve_path( &network( "file:///tmp/a.wav" ) ).unwrap(), PathBuf::from( "/tmp/a.wav" ) );
        assert_eq!( probe.resolve_path( &network( "clips/b.wav" ) ).unwrap(), PathBuf::from( "clips/b.wav" ) );
    }


    #[test]
    fn test_remote_scheme_rejected() {
        let probe = ContainerProbe::new( "." );
        let result = probe.probe( &network( "https://example.com/a.mp4" ) );
        assert!( matches!( result, Err( ProbeError::UnsupportedScheme( ref s ) ) if s == "https" ) );
    }


    #[test]
    fn test_missing_file() {
        let probe = ContainerProbe::new( "/nonexistent-vidbridge-root" );
        let result = probe.probe( &SourceDescriptor::Asset { lookup_key: "nope.mp4".into() } );
        assert!( matches!( result, Err( ProbeError::Open( _ ) ) ) );
    }


    #[test]
    fn test_closure_probe() {
        let probe = |_: &SourceDescriptor| -> Result<MediaInfo, ProbeError> {
            Ok( MediaInfo { duration_ms: 5, width: 1, height: 1 } )
        };
        assert_eq!( probe.probe( &network( "x" ) ).unwrap().duration_ms, 5 );
    }
}
