//! Composite input devices with chord remapping
//!
//! Physical devices are matched against declarative profiles, bound into
//! composite instances and their merged event streams are translated by a
//! capability map before reaching virtual target devices.

pub mod composite;
pub mod config;
pub mod device;
pub mod input;
pub mod mapping;
pub mod matching;
pub mod target;
