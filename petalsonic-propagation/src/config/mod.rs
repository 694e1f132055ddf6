mod propagation_desc;
mod scene_params;

pub use propagation_desc::{
    AdaptiveSpreadDesc, MAX_DIFFRACTION_ORDER, MAX_LOAD_BALANCING_SPREAD, MAX_REFLECTION_ORDER,
    PropagationDesc,
};
pub(crate) use propagation_desc::{
    validate_diffraction_order, validate_load_balancing_spread, validate_reflection_order,
    validate_smoothing_constant,
};
pub use scene_params::{
    DistanceBehavior, GeometryInstanceParams, GeometryParams, PortalParams, RoomParams,
    TransmissionOperation,
};
