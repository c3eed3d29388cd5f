//! WGSL sources. Fluid passes are composed with `common.wgsl` prepended.

macro_rules! with_common {
    ($file:literal) => {
        concat!(
            include_str!("shaders/common.wgsl"),
            "\n",
            include_str!($file)
        )
    };
}

pub const PREFIX_SUM: &str = include_str!("shaders/prefix_sum.wgsl");
pub const COUNTING_SORT: &str = include_str!("shaders/counting_sort.wgsl");
pub const SPATIAL_HASH: &str = with_common!("shaders/spatial_hash.wgsl");
pub const FORCES: &str = with_common!("shaders/forces.wgsl");
pub const REORDER: &str = with_common!("shaders/reorder.wgsl");
pub const DENSITY: &str = with_common!("shaders/density.wgsl");
pub const PRESSURE: &str = with_common!("shaders/pressure.wgsl");
pub const VISCOSITY: &str = with_common!("shaders/viscosity.wgsl");
pub const COPY_BACK: &str = with_common!("shaders/copy_back.wgsl");
pub const COLLISION: &str = with_common!("shaders/collision.wgsl");

/// Every shader with its label, for validation.
pub const ALL: &[(&str, &str)] = &[
    ("prefix_sum", PREFIX_SUM),
    ("counting_sort", COUNTING_SORT),
    ("spatial_hash", SPATIAL_HASH),
    ("forces", FORCES),
    ("reorder", REORDER),
    ("density", DENSITY),
    ("pressure", PRESSURE),
    ("viscosity", VISCOSITY),
    ("copy_back", COPY_BACK),
    ("collision", COLLISION),
];
