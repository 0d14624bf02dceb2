//! Workgroup dispatch arithmetic.
//!
//! Each workgroup shades a `WORKGROUP_WIDTH x WORKGROUP_HEIGHT` tile of
//! pixels. The grid is rounded up so partial tiles at the right and bottom
//! edges are still dispatched; the shader discards invocations outside the
//! image.

use crate::constants::{WORKGROUP_HEIGHT, WORKGROUP_WIDTH};

/// Number of workgroups to dispatch along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    /// Tile size the grid was computed for.
    pub tile: (u32, u32),
}

impl WorkgroupGrid {
    /// Grid covering a `width x height` image with the default 16x8 tile.
    pub const fn for_image(width: u32, height: u32) -> Self {
        Self::with_tile(width, height, WORKGROUP_WIDTH, WORKGROUP_HEIGHT)
    }

    /// Grid covering a `width x height` image with a custom tile size.
    ///
    /// A zero tile dimension is treated as 1.
    pub const fn with_tile(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Self {
        let tw = if tile_width == 0 { 1 } else { tile_width };
        let th = if tile_height == 0 { 1 } else { tile_height };
        Self {
            x: width.div_ceil(tw),
            y: height.div_ceil(th),
            z: 1,
            tile: (tw, th),
        }
    }

    /// Total number of shader invocations launched, saturating at `u64::MAX`.
    pub const fn invocations(&self) -> u64 {
        (self.x as u64 * self.tile.0 as u64)
            .saturating_mul(self.y as u64 * self.tile.1 as u64)
            .saturating_mul(self.z as u64)
    }

    /// Pixel extent covered by the grid (always >= the image extent),
    /// saturating at `u32::MAX`.
    pub const fn covered_extent(&self) -> (u32, u32) {
        (
            self.x.saturating_mul(self.tile.0),
            self.y.saturating_mul(self.tile.1),
        )
    }

    /// Whether every pixel of a `width x height` image is covered.
    pub const fn covers(&self, width: u32, height: u32) -> bool {
        let (cw, ch) = self.covered_extent();
        cw >= width && ch >= height
    }

    /// Number of invocations that fall outside the image and must be
    /// discarded by the shader's bounds check. Zero if the grid is smaller
    /// than the image.
    pub const fn idle_invocations(&self, width: u32, height: u32) -> u64 {
        self.invocations()
            .saturating_sub(width as u64 * height as u64)
    }
}
