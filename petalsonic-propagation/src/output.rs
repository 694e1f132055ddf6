//! Propagation results: diffraction and reflection paths, per-pair state, and the payloads
//! pushed to the mixing side.

use crate::geometry::SurfaceKey;
use crate::id::{AcousticTextureId, SceneEntityId};
use crate::math::{Transform, Vec3, polyline_length};
use crossbeam_channel::{Receiver, Sender};

/// Most points (reflections plus spliced diffraction nodes) a reflection path can carry.
pub const MAX_REFLECTION_POINTS: usize = 8;

/// The scene feature a path point sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathFeature {
    /// Passes through a portal opening
    Portal(SceneEntityId),
    /// Bends around a diffraction edge of a geometry instance
    Edge { instance: SceneEntityId, edge: u32 },
    /// Bounces off a planar reflector
    Reflector(SurfaceKey),
}

impl PathFeature {
    pub fn portal(&self) -> Option<SceneEntityId> {
        match self {
            Self::Portal(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_diffraction(&self) -> bool {
        !matches!(self, Self::Reflector(_))
    }
}

/// Stable identity of a path across ticks: the features it visits, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(pub Vec<PathFeature>);

/// One bend of a diffraction path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffractionNode {
    pub position: Vec3,
    pub feature: PathFeature,
    /// Deviation from a straight line at this node, in radians
    pub angle: f32,
    /// Room on the emitter side of the node
    pub emitter_side_room: SceneEntityId,
    /// Room on the listener side of the node
    pub listener_side_room: SceneEntityId,
}

/// An indirect route from emitter to listener, around edges or through portals.
///
/// Nodes are ordered from the emitter to the listener. A path without nodes is the direct
/// path (same acoustic space) or the transmission path (different rooms).
#[derive(Debug, Clone, PartialEq)]
pub struct DiffractionPath {
    pub nodes: Vec<DiffractionNode>,
    pub emitter_position: Vec3,
    pub listener_position: Vec3,
    /// Accumulated diffraction coefficient (0.0 - 1.0)
    pub diffraction: f32,
    /// Accumulated transmission loss (0.0 - 1.0)
    pub transmission_loss: f32,
    /// Linear gain including the taper near the maximum diffraction angle
    pub gain: f32,
    /// Total length in meters
    pub length: f32,
    /// Where the emitter appears to be from the listener
    pub virtual_emitter: Transform,
}

impl DiffractionPath {
    /// A path through `nodes`; angles, coefficients and length are filled in by evaluation.
    pub fn new(emitter: Vec3, listener: Vec3, nodes: Vec<DiffractionNode>) -> Self {
        Self {
            nodes,
            emitter_position: emitter,
            listener_position: listener,
            diffraction: 0.0,
            transmission_loss: 0.0,
            gain: 1.0,
            length: emitter.distance(listener),
            virtual_emitter: Transform::from_position(emitter),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn key(&self) -> PathKey {
        PathKey(self.nodes.iter().map(|n| n.feature).collect())
    }

    /// Emitter, nodes, listener.
    pub fn points(&self) -> Vec<Vec3> {
        let mut points = Vec::with_capacity(self.nodes.len() + 2);
        points.push(self.emitter_position);
        points.extend(self.nodes.iter().map(|n| n.position));
        points.push(self.listener_position);
        points
    }

    /// Portals crossed, emitter side first.
    pub fn portals(&self) -> impl Iterator<Item = SceneEntityId> + '_ {
        self.nodes.iter().filter_map(|n| n.feature.portal())
    }

    pub fn angle_sum(&self) -> f32 {
        self.nodes.iter().map(|n| n.angle).sum()
    }

    /// Recomputes node angles, length and the virtual emitter for the current end points.
    pub fn update_geometry(&mut self, emitter_orientation: &Transform) {
        let points = self.points();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.angle = crate::math::deviation_angle(points[i], points[i + 1], points[i + 2]);
        }
        self.length = polyline_length(&points);
        let toward = points[points.len() - 2] - self.listener_position;
        let direction = toward.normalize_or_zero();
        let position = if direction == Vec3::ZERO {
            self.emitter_position
        } else {
            self.listener_position + direction * self.length
        };
        self.virtual_emitter = Transform {
            position,
            ..*emitter_orientation
        };
    }
}

/// One point of a reflection path: a reflection or a spliced diffraction node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    pub position: Vec3,
    pub feature: PathFeature,
    /// Acoustic texture of the reflecting surface; `None` for diffraction nodes
    pub texture: Option<AcousticTextureId>,
}

/// An image-source path: one or more reflections, possibly bending around an edge or
/// through a portal before or after reflecting.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionPath {
    /// Points ordered from the emitter to the listener
    pub points: Vec<PathPoint>,
    pub emitter_position: Vec3,
    pub listener_position: Vec3,
    /// Apparent source position as heard from the listener
    pub image_source: Vec3,
    /// Diffraction between the emitter and the first reflection (0.0 - 1.0)
    pub emitter_diffraction: f32,
    /// Diffraction between the last reflection and the listener (0.0 - 1.0)
    pub listener_diffraction: f32,
    pub transmission_loss: f32,
    pub gain: f32,
    pub length: f32,
}

impl ReflectionPath {
    pub fn new(emitter: Vec3, listener: Vec3, points: Vec<PathPoint>) -> Self {
        let mut path = Self {
            points,
            emitter_position: emitter,
            listener_position: listener,
            image_source: emitter,
            emitter_diffraction: 0.0,
            listener_diffraction: 0.0,
            transmission_loss: 0.0,
            gain: 1.0,
            length: 0.0,
        };
        path.update_geometry();
        path
    }

    pub fn key(&self) -> PathKey {
        PathKey(self.points.iter().map(|p| p.feature).collect())
    }

    pub fn reflection_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| !p.feature.is_diffraction())
            .count()
    }

    pub fn diffraction_node_count(&self) -> usize {
        self.points.len() - self.reflection_count()
    }

    pub fn textures(&self) -> Vec<AcousticTextureId> {
        self.points.iter().filter_map(|p| p.texture).collect()
    }

    pub fn surfaces(&self) -> Vec<SurfaceKey> {
        self.points
            .iter()
            .filter_map(|p| match p.feature {
                PathFeature::Reflector(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Emitter, points, listener.
    pub fn positions(&self) -> Vec<Vec3> {
        let mut positions = Vec::with_capacity(self.points.len() + 2);
        positions.push(self.emitter_position);
        positions.extend(self.points.iter().map(|p| p.position));
        positions.push(self.listener_position);
        positions
    }

    /// Recomputes length and image source from the stored points.
    pub fn update_geometry(&mut self) {
        let positions = self.positions();
        self.length = polyline_length(&positions);
        let toward = positions[positions.len() - 2] - self.listener_position;
        self.image_source = self.listener_position + toward.normalize_or_zero() * self.length;
    }
}

/// Current propagation result for one emitter position and one listener.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationState {
    pub emitter: SceneEntityId,
    pub listener: SceneEntityId,
    pub position_index: usize,
    pub emitter_transform: Transform,
    pub listener_transform: Transform,
    pub emitter_room: SceneEntityId,
    pub listener_room: SceneEntityId,
    /// Ranked best first
    pub diffraction_paths: Vec<DiffractionPath>,
    /// Ranked best first
    pub reflection_paths: Vec<ReflectionPath>,
    /// Built-in diffraction value: that of the best path, 1.0 when no path exists
    pub diffraction: f32,
    /// Built-in transmission loss: that of the zero-node path, 1.0 when there is none
    pub transmission_loss: f32,
    /// Tick at which the paths were last searched
    pub computed_frame: u64,
    /// Scene version the paths were searched against
    pub scene_version: u64,
}

impl PropagationState {
    pub fn empty(emitter: SceneEntityId, listener: SceneEntityId, position_index: usize) -> Self {
        Self {
            emitter,
            listener,
            position_index,
            emitter_transform: Transform::identity(),
            listener_transform: Transform::identity(),
            emitter_room: SceneEntityId::OUTDOORS,
            listener_room: SceneEntityId::OUTDOORS,
            diffraction_paths: Vec::new(),
            reflection_paths: Vec::new(),
            diffraction: 1.0,
            transmission_loss: 1.0,
            computed_frame: 0,
            scene_version: 0,
        }
    }

    /// Refreshes the built-in values from the current path sets.
    pub fn update_built_ins(&mut self) {
        self.diffraction = self.diffraction_paths.first().map_or(1.0, |p| p.diffraction);
        self.transmission_loss = self
            .diffraction_paths
            .iter()
            .find(|p| p.is_direct())
            .map_or(1.0, |p| p.transmission_loss);
    }

    /// Moves the held paths to new end points without searching again.
    pub fn extrapolate(&mut self, emitter: Transform, listener: Transform) {
        self.emitter_transform = emitter;
        self.listener_transform = listener;
        for path in &mut self.diffraction_paths {
            path.emitter_position = emitter.position;
            path.listener_position = listener.position;
            path.update_geometry(&emitter);
        }
        for path in &mut self.reflection_paths {
            path.emitter_position = emitter.position;
            path.listener_position = listener.position;
            path.update_geometry();
        }
    }
}

/// A virtual source rendered for one diffraction path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualSource {
    pub transform: Transform,
    pub gain: f32,
    pub diffraction: f32,
    pub transmission_loss: f32,
    pub node_count: usize,
}

/// An image source rendered for one reflection path.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSource {
    pub position: Vec3,
    pub gain: f32,
    pub textures: Vec<AcousticTextureId>,
    pub emitter_diffraction: f32,
    pub listener_diffraction: f32,
}

/// Everything the mixer needs for one emitter position heard by one listener.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterPropagation {
    pub emitter: SceneEntityId,
    pub listener: SceneEntityId,
    pub position_index: usize,
    pub emitter_room: SceneEntityId,
    pub listener_room: SceneEntityId,
    /// Smoothed built-in diffraction value
    pub diffraction: f32,
    /// Smoothed built-in transmission loss
    pub transmission_loss: f32,
    pub virtual_sources: Vec<VirtualSource>,
    pub image_sources: Vec<ImageSource>,
    /// Paths were searched this tick rather than carried over
    pub recomputed: bool,
}

/// Wet (room reverb) contribution of a portal for the spatial audio listener.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalPropagation {
    pub portal: SceneEntityId,
    pub listener: SceneEntityId,
    /// 0.0 inside the portal volume, growing as the listener leaves the opening's axis
    pub wet_diffraction: f32,
    /// Gain of the adjacent room's reverb bleeding through the portal
    pub bleed_gain: f32,
}

/// Receives the per-tick propagation results.
///
/// Called on the thread running the tick, after all jobs have joined.
pub trait OutputSink: Send {
    fn emitter_propagation(&mut self, update: &EmitterPropagation);

    fn portal_propagation(&mut self, _update: &PortalPropagation) {}

    /// Called once after every push of a tick.
    fn tick_finished(&mut self, _frame: u64) {}
}

/// A pushed result, as delivered by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutputUpdate {
    Emitter(EmitterPropagation),
    Portal(PortalPropagation),
    TickFinished(u64),
}

/// Forwards every push into a channel, for a mixer running on another thread.
pub struct ChannelSink {
    sender: Sender<OutputUpdate>,
}

impl ChannelSink {
    /// Creates the sink and the receiving end for the mixer.
    pub fn channel() -> (Self, Receiver<OutputUpdate>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, receiver)
    }

    fn forward(&self, update: OutputUpdate) {
        if self.sender.send(update).is_err() {
            log::warn!("Output receiver dropped; discarding propagation update");
        }
    }
}

impl OutputSink for ChannelSink {
    fn emitter_propagation(&mut self, update: &EmitterPropagation) {
        self.forward(OutputUpdate::Emitter(update.clone()));
    }

    fn portal_propagation(&mut self, update: &PortalPropagation) {
        self.forward(OutputUpdate::Portal(*update));
    }

    fn tick_finished(&mut self, frame: u64) {
        self.forward(OutputUpdate::TickFinished(frame));
    }
}
