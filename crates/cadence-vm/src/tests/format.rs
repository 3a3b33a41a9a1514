//! Binary Model format

use super::*;
use crate::error::LoadError;
use crate::format::load_model;
use crate::vm::{Interpreter, VmConfig};
use cadence_ast::build::*;
use cadence_ast::BinaryOp;
use std::sync::Arc;

fn scorer() -> Document {
    document(
        "scorer",
        vec![
            flow(
                "main",
                vec![
                    at(let_("bonus", select(var("enemy_staggered"), num(10.0), num(0.0))), 2, 5),
                    at(
                        assign(
                            "out",
                            binary(BinaryOp::Add, var("stamina"), var("bonus")),
                        ),
                        3,
                        5,
                    ),
                    call_flow("describe"),
                ],
            ),
            flow(
                "describe",
                vec![if_(
                    binary(BinaryOp::Gt, var("stamina"), num(50.0)),
                    vec![assign("scene", string("fresh"))],
                    vec![assign("scene", string("tired"))],
                )],
            ),
        ],
    )
}

fn roundtrip(options: CompileOptions) -> (Model, Model) {
    let model = compile_with(&scorer(), options);
    let bytes = model.to_bytes().unwrap();
    let loaded = load_model(&bytes).unwrap();
    (model, loaded)
}

#[test]
fn test_roundtrip_plain() {
    let (model, loaded) = roundtrip(CompileOptions::default());
    assert_eq!(loaded, model);
    assert!(loaded.debug_map().is_none());
}

#[test]
fn test_roundtrip_compressed_with_debug_info() {
    let options = CompileOptions::default().with_debug_info().compressed();
    let (model, loaded) = roundtrip(options);
    assert_eq!(loaded, model);

    let debug = loaded.debug_map().unwrap();
    assert_eq!(debug.flow_starting_at(loaded.entry_offset()), Some("main"));
    assert!(debug.spans.iter().any(|(_, span)| span.line == 3));
}

#[test]
fn test_loaded_model_evaluates_identically() {
    let (model, loaded) = roundtrip(CompileOptions::default().compressed());
    let state = inputs(&model, &[("enemy_staggered", 1.0), ("stamina", 45.0)]);

    let mut expected = outputs(&model);
    Interpreter::new(Arc::new(model.clone()), VmConfig::default())
        .unwrap()
        .evaluate(&state, &mut expected)
        .unwrap();
    let mut actual = outputs(&loaded);
    Interpreter::new(Arc::new(loaded.clone()), VmConfig::default())
        .unwrap()
        .evaluate(&state, &mut actual)
        .unwrap();

    assert_eq!(expected, actual);
    assert_eq!(actual[model.output("out").unwrap().slot as usize], 55.0);
    assert_eq!(output_text(&loaded, &actual, "scene"), Some("tired"));
}

#[test]
fn test_extension_header_roundtrip() {
    let doc = extending(
        document("bonus", vec![flow("main", vec![assign("scene", string("bonus"))])]),
        "story",
        "choice",
    );
    let model = compile_doc(&doc);
    let loaded = load_model(&model.to_bytes().unwrap()).unwrap();
    assert!(loaded.is_extension());
    assert_eq!(loaded.extension(), model.extension());
}

#[test]
fn test_corruption_detected() {
    let bytes = compile_doc(&scorer()).to_bytes().unwrap();

    let mut flipped = bytes.clone();
    let last = flipped.len() - 1;
    flipped[last] ^= 0x01;
    assert_eq!(load_model(&flipped), Err(LoadError::ChecksumMismatch));

    let mut magic = bytes.clone();
    magic[0] = b'X';
    assert_eq!(load_model(&magic), Err(LoadError::BadMagic));

    let mut version = bytes.clone();
    version[4] = 2;
    assert_eq!(load_model(&version), Err(LoadError::UnsupportedVersion(2)));

    let truncated = &bytes[..bytes.len() - 1];
    assert!(matches!(
        load_model(truncated),
        Err(LoadError::LengthMismatch { .. })
    ));

    assert_eq!(load_model(&bytes[..10]), Err(LoadError::TooShort(10)));
}

#[test]
fn test_understated_call_depth_rejected() {
    let doc = document(
        "caller",
        vec![
            flow("main", vec![call_flow("sub")]),
            flow("sub", vec![assign("out", num(1.0))]),
        ],
    );
    let mut model = compile_doc(&doc);
    assert_eq!(model.max_call_depth(), 1);
    load_model(&model.to_bytes().unwrap()).unwrap();

    model.max_call_depth = 0;
    assert_eq!(
        load_model(&model.to_bytes().unwrap()),
        Err(LoadError::CallDepthLimit {
            declared: 0,
            required: 1
        })
    );
}
