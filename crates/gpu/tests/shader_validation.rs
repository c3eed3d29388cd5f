//! Offline WGSL validation
//!
//! Parses and validates every compute shader with naga, so shader errors
//! show up without a GPU adapter:
//! 1. Every shader parses
//! 2. Every shader passes full validation (including uniformity)
//! 3. Every entry point the Rust side dispatches exists

use gpu::shaders;

fn validate(label: &str, source: &str) -> naga::Module {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(e) => panic!("{} failed to parse:\n{}", label, e.emit_to_string(source)),
    };
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    if let Err(e) = validator.validate(&module) {
        panic!("{} failed validation:\n{}", label, e.emit_to_string(source));
    }
    module
}

fn entry_points(module: &naga::Module) -> Vec<&str> {
    module.entry_points.iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn all_shaders_validate() {
    for (label, source) in shaders::ALL {
        validate(label, source);
    }
}

#[test]
fn primitive_entry_points_exist() {
    let scan = validate("prefix_sum", shaders::PREFIX_SUM);
    let names = entry_points(&scan);
    for entry in ["local_prefix_sum", "scan_block_sums", "add_block_offsets"] {
        assert!(names.contains(&entry), "prefix_sum is missing {}", entry);
    }

    let sort = validate("counting_sort", shaders::COUNTING_SORT);
    let names = entry_points(&sort);
    for entry in ["count_digits", "scatter_digits"] {
        assert!(names.contains(&entry), "counting_sort is missing {}", entry);
    }

    let hash = validate("spatial_hash", shaders::SPATIAL_HASH);
    let names = entry_points(&hash);
    for entry in ["compute_keys", "clear_offsets", "compute_offsets"] {
        assert!(names.contains(&entry), "spatial_hash is missing {}", entry);
    }
}

#[test]
fn step_entry_points_exist() {
    let cases = [
        (shaders::FORCES, "external_forces"),
        (shaders::REORDER, "reorder"),
        (shaders::DENSITY, "compute_density"),
        (shaders::PRESSURE, "compute_pressure"),
        (shaders::VISCOSITY, "compute_viscosity"),
        (shaders::COPY_BACK, "copy_back"),
        (shaders::COLLISION, "update_positions"),
    ];
    for (source, entry) in cases {
        let module = validate(entry, source);
        assert!(
            entry_points(&module).contains(&entry),
            "missing entry point {}",
            entry
        );
    }
}

#[test]
fn compute_entry_points_use_full_workgroups() {
    for (label, source) in shaders::ALL {
        let module = validate(label, source);
        for entry in &module.entry_points {
            if entry.name == "scan_block_sums" {
                assert_eq!(entry.workgroup_size, [1, 1, 1]);
            } else {
                assert_eq!(
                    entry.workgroup_size,
                    [gpu::WORKGROUP_SIZE, 1, 1],
                    "{}::{} workgroup size",
                    label,
                    entry.name
                );
            }
        }
    }
}
