#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic)]
#![warn(missing_docs)]

//! `tauloc` computes theoretical seismic arrivals and re-identifies observed
//! phase picks for earthquake hypocenter refinement.
//!
//! The computational core is a tau/p travel-time engine: surface-focus phase
//! tables are corrected to an arbitrary source depth with pre-integrated
//! up-going tables, each phase branch is interpolated with a spline that is
//! cubic in `sqrt(p_end - p)`, and queries return travel times together with
//! their distance and depth derivatives. On top of the engine sit the
//! auxiliary data (phase groups, per-phase statistics, ellipticity
//! corrections, topography) and the figure-of-merit phase identifier.

pub mod auxiliary;
pub mod branch;
mod convert;
pub mod decimate;
pub mod ellip;
pub mod error;
pub mod event;
pub mod geo;
pub mod integrate;
pub mod model;
pub mod phase;
pub mod phase_id;
pub mod request;
pub mod spline;
pub mod stats;
pub mod tables;
pub mod topo;
pub mod upgoing;
pub mod volume;
