//! Playback options
//!
//! Process-wide options shared by every session created after they are set,
//! and the per-session option set mutated by host commands.

use serde::{ Deserialize, Serialize };


/// Process-wide playback options.
///
/// Sessions capture a copy when they are created, so changing these never
/// affects a native player that already exists.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
#[serde( rename_all = "camelCase" )]
pub struct GlobalOptions {
    /// Allow audio to mix with other applications instead of taking focus.
    pub mix_with_others: bool,
}


/// Mutable options in effect for a single session.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct SessionOptions {
    pub looping: bool,
    /// Volume in `[0.0, 1.0]`.
    pub volume: f64,
    /// Playback rate, always positive.
    pub speed: f64,
}


impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            looping: false,
            volume: 1.0,
            speed: 1.0,
        }
    }
}


impl SessionOptions {
    /// Clamps a requested volume into `[0.0, 1.0]`.
    ///
    /// Returns `None` for NaN, which has no nearest bound.
    pub fn clamp_volume( volume: f64 ) -> Option<f64> {
        if volume.is_nan() {
            None
        } else {
            Some( volume.clamp( 0.0, 1.0 ) )
        }
    }


    /// Returns true if `speed` is a usable playback rate.
    pub fn is_valid_speed( speed: f64 ) -> bool {
        speed.is_finite() && speed > 0.0
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_clamp_volume() {
        assert_eq!( SessionOptions::clamp_volume( -0.5 ), Some( 0.0 ) );
        assert_eq!( SessionOptions::clamp_volume( 0.25 ), Some( 0.25 ) );
        assert_eq!( SessionOptions::clamp_volume( 3.0 ), Some( 1.0 ) );
        assert_eq!( SessionOptions::clamp_volume( f64::NAN ), None );
    }


    #[test]
    fn test_speed_validation() {
        assert!( SessionOptions::is_valid_speed( 0.5 ) );
        assert!( !SessionOptions::is_valid_speed( 0.0 ) );
        assert!( !SessionOptions::is_valid_speed( -1.0 ) );
        assert!( !SessionOptions::is_valid_speed( f64::INFINITY ) );
    }


    #[test]
    fn test_global_options_default_denies_mixing() {
        assert!( !GlobalOptions::default().mix_with_others );
    }
}
