//! # PetalSonic Propagation
//!
//! Geometric sound propagation for games: how sound gets from an emitter to a listener through
//! a scene of rooms, portals and triangle geometry.
//!
//! The engine finds diffraction paths (around edges and through portals) and reflection paths
//! (image sources off reflective surfaces), scores them with a diffraction coefficient,
//! transmission loss and gain, and hands the result to your mixer once per audio frame.
//!
//! ## Quick Start
//!
//! ```no_run
//! use petalsonic_propagation::*;
//!
//! let engine = PropagationEngine::new(PropagationDesc::default())?;
//!
//! // Two rooms joined by a door
//! let kitchen = SceneEntityId(1);
//! let hall = SceneEntityId(2);
//! engine.set_room(kitchen, RoomParams::default(), Some("kitchen"))?;
//! engine.set_room(hall, RoomParams::default(), Some("hall"))?;
//! engine.set_portal(
//!     SceneEntityId(100),
//!     PortalParams {
//!         transform: Transform::new(Vec3::new(5.0, 0.0, 0.0), Vec3::NEG_X, Vec3::Y),
//!         extent: Vec3::new(1.0, 2.0, 0.25),
//!         front_room: kitchen,
//!         back_room: hall,
//!         ..Default::default()
//!     },
//!     Some("door"),
//! )?;
//!
//! // An emitter in the kitchen, the listener in the hall
//! let emitter = SceneEntityId(10);
//! let listener = SceneEntityId(11);
//! engine.register_emitter(emitter)?;
//! engine.register_listener(listener)?;
//! engine.set_position(emitter, Transform::from_position(Vec3::new(2.0, 0.0, 0.0)))?;
//! engine.set_game_object_in_room(emitter, kitchen)?;
//! engine.set_position(listener, Transform::from_position(Vec3::new(8.0, 0.0, 3.0)))?;
//! engine.set_game_object_in_room(listener, hall)?;
//!
//! // Once per audio frame (or call `start()` to tick on a dedicated thread)
//! engine.tick()?;
//!
//! let query = engine.query_diffraction_paths(emitter, 0)?;
//! for path in &query.paths {
//!     println!("{} nodes, diffraction {:.2}", path.nodes.len(), path.diffraction);
//! }
//! for event in engine.poll_events() {
//!     if let PropagationEvent::TickCompleted { timing } = event {
//!         println!("tick took {} us", timing.total_time_us);
//!     }
//! }
//! # Ok::<(), PropagationError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`PropagationEngine`]**: The public API: scene mutations, positions, tuning, queries
//! - **[`PropagationDesc`]**: Init settings with documented defaults and validation
//! - **[`OutputSink`]**: Receives per-tick results for the mixer ([`ChannelSink`] forwards them)
//! - **[`JobExecutor`]**: Runs listener scans and pair searches (thread pool or host threads)
//! - **[`PropagationEvent`]**: Tick timing, room transitions and degraded geometry
//! - **[`RayTracer`]**: Ray queries against the scene
//!
//! ## Architecture
//!
//! Each tick:
//!
//! 1. **Commands**: queued scene mutations and tuning calls are applied to the scene snapshot
//! 2. **Rooms**: every game object is assigned a room (explicit override or room bounds)
//! 3. **Balancing**: each emitter/listener pair is recomputed, extrapolated or held
//! 4. **Scan**: listeners of recomputed pairs cast their ray fan; one scan serves all emitters
//! 5. **Search**: portal routes, edge chains and image sources are built and evaluated as jobs
//! 6. **Publish**: paths are ranked, limited, smoothed and pushed to the [`OutputSink`]
//!
//! Jobs only read the shared snapshot; nothing in the hot path takes a lock.

pub mod balance;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod events;
pub mod geometry;
pub mod id;
pub mod jobs;
pub mod math;
pub mod output;
pub mod raycast;
pub mod rooms;
pub mod scene;
pub mod search;

pub use config::{
    AdaptiveSpreadDesc, DistanceBehavior, GeometryInstanceParams, GeometryParams, PortalParams,
    PropagationDesc, RoomParams, TransmissionOperation,
};
pub use engine::{PathQuery, PropagationEngine};
pub use error::{PropagationError, Result};
pub use events::{PropagationEvent, TickTimingEvent};
pub use geometry::{AcousticSurface, RayHit, RayTracer, Triangle};
pub use id::{AcousticTextureId, GeometrySetId, SceneEntityId};
pub use jobs::{HostJobExecutor, HostWorker, InlineExecutor, JobExecutor, ThreadPoolExecutor};
pub use math::{Transform, Vec3};
pub use output::{
    ChannelSink, DiffractionNode, DiffractionPath, EmitterPropagation, ImageSource, OutputSink,
    OutputUpdate, PathFeature, PortalPropagation, ReflectionPath, VirtualSource,
};
