//! Bytecode back end.
//!
//! Serializes the packed tables into the binary program format. The
//! matching resident loader lives with the VM: it re-expands the blob into
//! in-memory tables and hands them to the same interpreter the template
//! envelope binds.

use trellis_program::{wire, ProjectionData};

/// Serialize a compiled program to its binary envelope.
pub fn emit(data: &ProjectionData) -> Vec<u8> {
    wire::encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_program::PackedMetadata;

    #[test]
    fn test_blob_round_trips() {
        let data = ProjectionData {
            meta_data: vec![PackedMetadata::sentinel()],
            ..Default::default()
        };
        let blob = emit(&data);
        assert_eq!(wire::decode(&blob).unwrap(), data);
    }
}
