//! This is the documentation for all kpabe schemes
//!
//! Currently those are:
//! * GPSW KP-ABE
//!
pub mod gpsw;
