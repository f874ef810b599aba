use super::ShimError;
use crate::backend::WorkShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Rebuilds a dimension from the legacy `(packed_xy, z)` pair.
    pub fn from_packed(xy: u64, z: u32) -> Self {
        let (x, y) = unpack_xy(xy);
        Self { x, y, z }
    }

    pub fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Splits a packed pair: `x` is the low 32 bits, `y` the high 32 bits.
pub fn unpack_xy(packed: u64) -> (u32, u32) {
    ((packed & 0xFFFF_FFFF) as u32, (packed >> 32) as u32)
}

/// Global size is `grid[i] * block[i]`; the block is the local size.
pub fn work_shape(grid: Dim3, block: Dim3) -> Result<WorkShape, ShimError> {
    let grid = grid.to_array();
    let block = block.to_array();

    let mut global = [0usize; 3];
    let mut local = [0usize; 3];

    for i in 0..3 {
        if grid[i] == 0 || block[i] == 0 {
            return Err(ShimError::InvalidGeometry(format!(
                "dimension {i} is empty (grid {}, block {})",
                grid[i], block[i]
            )));
        }
        global[i] = (grid[i] as usize)
            .checked_mul(block[i] as usize)
            .ok_or_else(|| ShimError::InvalidGeometry(format!("global size overflows in dimension {i}")))?;
        local[i] = block[i] as usize;
    }

    Ok(WorkShape { global, local })
}
