//! Background Tasks Module
//!
//! Contains the periodic ticker task that drives folder aging.

mod ticker;

pub(crate) use ticker::spawn_ticker;
