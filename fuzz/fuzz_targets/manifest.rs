#![no_main]

use libfuzzer_sys::fuzz_target;
use testhost_core::AssemblyMetadata;

fuzz_target!(|data: &[u8]| {
    // Manifests come from disk; malformed ones must fail to parse, never panic
    if let Ok(assembly) = serde_json::from_slice::<AssemblyMetadata>(data) {
        for ty in assembly.types.iter().flatten() {
            let _ = ty.name();
            for method in &ty.methods {
                let _ = method.return_kind();
            }
        }
    }
});
