// tests/ort_inspector_test.rs
// 真实 ONNX Runtime：损坏的文件必须归类为 ArtifactUnloadable，而不是让校验中断

use std::fs;

use graph_export_engine::*;

fn inspector_or_skip() -> Option<OrtGraphInspector> {
    match OrtGraphInspector::new() {
        Ok(inspector) => Some(inspector),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

#[test]
fn test_garbage_file_is_unloadable() {
    let Some(inspector) = inspector_or_skip() else {
        return;
    };
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("encoder_model.onnx");
    fs::write(&path, b"this is not a protobuf graph").unwrap();

    let err = inspector.load_interface(&path).unwrap_err();

    assert!(matches!(err, EngineError::ArtifactUnloadable { .. }));
    assert!(!err.is_fatal());
    assert!(err.to_string().contains("encoder_model.onnx"));
}

#[test]
fn test_verifier_survives_garbage_family() {
    let Some(inspector) = inspector_or_skip() else {
        return;
    };
    let tmp = tempfile::tempdir().unwrap();
    for role in GraphRole::ALL {
        fs::write(tmp.path().join(role.file_name(false, "onnx")), b"garbage").unwrap();
    }

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    assert_eq!(report.missing_or_mismatched.len(), 3);
    assert!(report
        .missing_or_mismatched
        .iter()
        .all(|d| d.kind == DiscrepancyKind::ArtifactUnloadable));
    assert!(!report.cache_inputs_detected);
    assert_eq!(report.exit_code(), 1);
}
