//! Acoustic surface properties.
//!
//! A surface carries the transmission loss applied when sound passes through a triangle and
//! the acoustic texture (filter profile) the mixer uses for reflections off it.

use crate::error::{PropagationError, Result};
use crate::id::AcousticTextureId;

/// Acoustic properties shared by any number of triangles in a geometry set.
///
/// # Example
///
/// ```
/// use petalsonic_propagation::geometry::AcousticSurface;
///
/// // Use a preset surface
/// let wall = AcousticSurface::CONCRETE;
///
/// // Or describe a custom one
/// let curtain = AcousticSurface::new(0.15).with_name("curtain");
/// assert!(curtain.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AcousticSurface {
    /// Filter profile applied by the mixer to reflections off this surface.
    pub texture: AcousticTextureId,

    /// Fraction of sound blocked when passing through the surface (0.0 - 1.0).
    ///
    /// 0.0 = acoustically transparent, 1.0 = fully blocking.
    pub transmission_loss: f32,

    /// Optional name, kept for debugging.
    pub name: Option<String>,
}

impl AcousticSurface {
    /// Surface used by triangles that reference no surface: blocks everything.
    pub const DEFAULT: Self = Self::preset(1.0);

    /// Open surface, e.g. a foliage or netting placeholder
    pub const TRANSPARENT: Self = Self::preset(0.0);

    /// Concrete wall - almost complete blocking
    pub const CONCRETE: Self = Self::preset(0.95);

    /// Brick wall
    pub const BRICK: Self = Self::preset(0.9);

    /// Wooden partition or door
    pub const WOOD: Self = Self::preset(0.6);

    /// Glass pane
    pub const GLASS: Self = Self::preset(0.4);

    /// Heavy curtain
    pub const CURTAIN: Self = Self::preset(0.2);

    const fn preset(transmission_loss: f32) -> Self {
        Self {
            texture: AcousticTextureId(0),
            transmission_loss,
            name: None,
        }
    }

    pub fn new(transmission_loss: f32) -> Self {
        Self::preset(transmission_loss)
    }

    pub fn with_texture(mut self, texture: AcousticTextureId) -> Self {
        self.texture = texture;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validates that the transmission loss is within [0.0, 1.0].
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.transmission_loss) {
            return Err(PropagationError::InvalidParameter(format!(
                "surface transmission loss must be between 0.0 and 1.0, got {}",
                self.transmission_loss
            )));
        }
        Ok(())
    }
}

impl Default for AcousticSurface {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for surface in [
            AcousticSurface::DEFAULT,
            AcousticSurface::TRANSPARENT,
            AcousticSurface::CONCRETE,
            AcousticSurface::BRICK,
            AcousticSurface::WOOD,
            AcousticSurface::GLASS,
            AcousticSurface::CURTAIN,
        ] {
            assert!(surface.validate().is_ok());
        }
    }

    #[test]
    fn test_default_blocks_everything() {
        assert_eq!(AcousticSurface::default().transmission_loss, 1.0);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(AcousticSurface::new(1.5).validate().is_err());
        assert!(AcousticSurface::new(-0.1).validate().is_err());
        assert!(AcousticSurface::new(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_builder() {
        let s = AcousticSurface::new(0.3)
            .with_texture(AcousticTextureId(4))
            .with_name("panel");
        assert_eq!(s.texture, AcousticTextureId(4));
        assert_eq!(s.name.as_deref(), Some("panel"));
    }
}
