//! Core library for spatial RGB lighting.
//!
//! Devices are placed on a 3D grid, effects compute a color for any grid
//! position from the distance to a reference point, and the engine pushes
//! those colors to the hardware on a shared tick (or per-effect worker
//! threads). Everything talks to the hardware through a [`DeviceBus`], so
//! the crate runs equally well against a real device manager or the
//! in-memory [`MemoryDevices`].

pub mod color;
pub mod config;
pub mod device;
pub mod effect;
pub mod engine;
pub mod error;
pub mod events;
pub mod grid;
pub mod pattern;
pub mod persist;

pub use color::RgbColor;
pub use config::{AppConfig, EngineConfig, PatternConfig};
pub use device::{
    ApplyReport, DeviceBus, DeviceController, DeviceKind, DeviceReference, DeviceTarget,
    MemoryDevice, MemoryDevices,
};
pub use effect::{
    DistanceFalloff, EffectInstance, EffectKind, EffectLayout, EffectSettings, Explosion,
    ExplosionParams, SpatialEffect, Wave, WaveParams,
};
pub use engine::{
    EffectId, EffectManager, EffectSnapshot, PreviewBuffer, TickLoop, TickRate, TickSummary,
};
pub use error::{Result, SpatialError};
pub use events::{EngineEvent, EventBus, GridEvent};
pub use grid::{Assignment, DevicePlacement, GridDimensions, GridPosition, SharedGrid, SpatialGrid};
pub use pattern::{CancelToken, PatternKind, PatternTester};
pub use persist::{EffectProfile, LayoutFile, ProfileReport, RestoreReport};
