//! Scale and filter policy shared between the UI and the Update Task.
//!
//! This module provides:
//! - [`ScaleMode`] - how the logical frame is stretched onto the panel
//! - [`FilterMode`] - which axes blend at duplicate-run boundaries
//! - [`AspectRatio`] - explicit target ratio for [`ScaleMode::Custom`]
//! - [`DisplaySettings`] - lock-free settings block with forced-refresh tracking
//!
//! # Forced refresh
//!
//! Any policy change bumps a request counter. The Update Task remembers the
//! counter it saw before drawing and acknowledges exactly that value after
//! the draw finished, so a change that lands mid-draw stays pending and the
//! producer keeps sending full frames until geometry has been rebuilt.

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

// =============================================================================
// Scale Mode
// =============================================================================

/// How the logical frame maps onto the physical screen.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
#[repr(u8)]
pub enum ScaleMode {
    /// 1:1, centered.
    Off = 0,
    /// Full screen height, logical aspect preserved.
    Fit = 1,
    /// Full screen height at 4:3, which fills the 320x240 panel.
    #[default]
    Fill = 2,
    /// Full screen height at the configured [`AspectRatio`].
    Custom = 3,
}

impl ScaleMode {
    const MAX: u8 = Self::Custom as u8;

    /// Decode a stored or user-supplied value, clamping out-of-range input.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Off,
            1 => Self::Fit,
            2 => Self::Fill,
            3 => Self::Custom,
            _ => {
                log_warn!("scale mode {} out of range, using {}", raw, Self::MAX);
                Self::Custom
            }
        }
    }

    /// Cycle to the next mode: Off -> Fit -> Fill -> Custom -> Off
    pub const fn next(self) -> Self {
        match self {
            Self::Off => Self::Fit,
            Self::Fit => Self::Fill,
            Self::Fill => Self::Custom,
            Self::Custom => Self::Off,
        }
    }

    /// Whether the image is resampled at all.
    pub const fn is_scaling(self) -> bool { !matches!(self, Self::Off) }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Off => "SCALE OFF",
            Self::Fit => "SCALE FIT",
            Self::Fill => "SCALE FILL",
            Self::Custom => "SCALE CUSTOM",
        }
    }
}

// =============================================================================
// Filter Mode
// =============================================================================

/// Which axes blend across duplicate-run boundaries.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
#[repr(u8)]
pub enum FilterMode {
    #[default]
    None = 0,
    LinearX = 1,
    LinearY = 2,
    Bilinear = 3,
}

impl FilterMode {
    const MAX: u8 = Self::Bilinear as u8;

    /// Decode a stored or user-supplied value, clamping out-of-range input.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::None,
            1 => Self::LinearX,
            2 => Self::LinearY,
            3 => Self::Bilinear,
            _ => {
                log_warn!("filter mode {} out of range, using {}", raw, Self::MAX);
                Self::Bilinear
            }
        }
    }

    pub const fn next(self) -> Self {
        match self {
            Self::None => Self::LinearX,
            Self::LinearX => Self::LinearY,
            Self::LinearY => Self::Bilinear,
            Self::Bilinear => Self::None,
        }
    }

    #[inline]
    pub const fn filters_x(self) -> bool { self as u8 & 1 != 0 }

    #[inline]
    pub const fn filters_y(self) -> bool { self as u8 & 2 != 0 }

    #[inline]
    pub const fn is_active(self) -> bool { !matches!(self, Self::None) }

    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "FILTER OFF",
            Self::LinearX => "FILTER X",
            Self::LinearY => "FILTER Y",
            Self::Bilinear => "FILTER XY",
        }
    }
}

// =============================================================================
// Aspect Ratio
// =============================================================================

/// Width:height ratio of the scaled image.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(target_arch = "arm", derive(defmt::Format))]
pub struct AspectRatio {
    pub num: u16,
    pub den: u16,
}

impl AspectRatio {
    pub const FOUR_THREE: Self = Self::new(4, 3);

    pub const fn new(
        num: u16,
        den: u16,
    ) -> Self {
        Self { num, den }
    }

    const fn pack(self) -> u32 { ((self.num as u32) << 16) | self.den as u32 }

    const fn unpack(packed: u32) -> Self { Self::new((packed >> 16) as u16, packed as u16) }

    const fn is_valid(self) -> bool { self.num != 0 && self.den != 0 }
}

impl Default for AspectRatio {
    fn default() -> Self { Self::FOUR_THREE }
}

/// Scaling policy resolved for one logical frame size.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScalePolicy {
    /// 1:1, centered.
    Native,
    /// Full screen height at the given ratio.
    Aspect(AspectRatio),
}

// =============================================================================
// Settings Block
// =============================================================================

/// Current scale/filter policy plus forced-refresh bookkeeping.
pub struct DisplaySettings {
    scale: AtomicU8,
    filter: AtomicU8,
    aspect: AtomicU32,
    refresh_requested: AtomicU32,
    refresh_done: AtomicU32,
}

impl DisplaySettings {
    /// Settings with a refresh already pending for the first frame.
    pub const fn new(
        scale: ScaleMode,
        filter: FilterMode,
    ) -> Self {
        Self {
            scale: AtomicU8::new(scale as u8),
            filter: AtomicU8::new(filter as u8),
            aspect: AtomicU32::new(AspectRatio::FOUR_THREE.pack()),
            refresh_requested: AtomicU32::new(1),
            refresh_done: AtomicU32::new(0),
        }
    }

    pub fn scale_mode(&self) -> ScaleMode { ScaleMode::from_raw(self.scale.load(Ordering::Relaxed)) }

    pub fn filter_mode(&self) -> FilterMode { FilterMode::from_raw(self.filter.load(Ordering::Relaxed)) }

    pub fn aspect_override(&self) -> AspectRatio { AspectRatio::unpack(self.aspect.load(Ordering::Relaxed)) }

    /// Change the scale mode and force the next draw to rebuild geometry.
    pub fn set_scale_mode(
        &self,
        mode: ScaleMode,
    ) {
        self.scale.store(mode as u8, Ordering::Relaxed);
        self.request_refresh();
    }

    /// Change the filter mode and force the next draw to rebuild geometry.
    pub fn set_filter_mode(
        &self,
        mode: FilterMode,
    ) {
        self.filter.store(mode as u8, Ordering::Relaxed);
        self.request_refresh();
    }

    /// Set the ratio used by [`ScaleMode::Custom`]. Zero terms are rejected.
    pub fn set_aspect_override(
        &self,
        ratio: AspectRatio,
    ) {
        if !ratio.is_valid() {
            log_warn!("aspect {}:{} rejected", ratio.num, ratio.den);
            return;
        }
        self.aspect.store(ratio.pack(), Ordering::Relaxed);
        self.request_refresh();
    }

    /// Whether diff output should respect filter-safe row boundaries.
    pub fn filtering(&self) -> bool { self.scale_mode().is_scaling() && self.filter_mode().is_active() }

    /// Resolve the active scale mode for a logical frame size.
    pub fn policy_for(
        &self,
        width: u16,
        height: u16,
    ) -> ScalePolicy {
        match self.scale_mode() {
            ScaleMode::Off => ScalePolicy::Native,
            ScaleMode::Fit => ScalePolicy::Aspect(AspectRatio::new(width.max(1), height.max(1))),
            ScaleMode::Fill => ScalePolicy::Aspect(AspectRatio::FOUR_THREE),
            ScaleMode::Custom => ScalePolicy::Aspect(self.aspect_override()),
        }
    }

    pub fn request_refresh(&self) { self.refresh_requested.fetch_add(1, Ordering::AcqRel); }

    /// Whether a refresh has been requested and not yet drawn.
    pub fn refresh_pending(&self) -> bool {
        self.refresh_requested.load(Ordering::Acquire) != self.refresh_done.load(Ordering::Acquire)
    }

    /// Token for the refresh request the next draw will satisfy.
    pub fn refresh_epoch(&self) -> u32 { self.refresh_requested.load(Ordering::Acquire) }

    /// Mark requests up to `epoch` as drawn.
    pub fn complete_refresh(
        &self,
        epoch: u32,
    ) {
        self.refresh_done.store(epoch, Ordering::Release);
    }
}

impl Default for DisplaySettings {
    fn default() -> Self { Self::new(ScaleMode::default(), FilterMode::default()) }
}

// ============================================================================
// Unit Tests (run on host with: cargo test --lib --target <host-triple>)
// ============================================================================
