//! Streaming interpreter, continuation points and extension attachment

use super::*;
use crate::error::{AttachmentRejected, EvaluationFault};
use crate::streaming::{StreamState, StreamingConfig, StreamingInterpreter};
use crate::vm::VmConfig;
use cadence_ast::build::*;
use cadence_ast::BinaryOp;
use cadence_types::ModelId;
use std::sync::Arc;
use std::time::Duration;

const STEP: Duration = Duration::from_millis(500);

/// Root sequence: one choice with a two second window, defaulting to `ending_A`
fn story() -> Arc<Model> {
    let doc = document(
        "story",
        vec![
            flow(
                "main",
                vec![
                    assign("scene", string("intro")),
                    continuation("choice", 2.0, "ending_A"),
                ],
            ),
            flow(
                "ending_A",
                vec![assign("scene", string("ending_A")), wait(num(5.0))],
            ),
        ],
    );
    Arc::new(compile_doc(&doc))
}

/// Extension for `story` at `choice` that declares its own point
fn bonus(name: &str) -> Arc<Model> {
    let doc = document(
        name,
        vec![
            flow(
                "main",
                vec![
                    assign("scene", string(name)),
                    continuation("bonus_choice", 1.0, "bonus_end"),
                ],
            ),
            flow("bonus_end", vec![assign("scene", string("bonus_end"))]),
        ],
    );
    Arc::new(compile_doc(&extending(doc, "story", "choice")))
}

/// Extension for `bonus` at `bonus_choice`
fn epilogue(name: &str) -> Arc<Model> {
    let doc = document(
        name,
        vec![flow("main", vec![assign("scene", string("epilogue")), wait(num(5.0))])],
    );
    Arc::new(compile_doc(&extending(doc, "bonus", "bonus_choice")))
}

/// Minimal driver holding the caller-owned buffers
struct Driver {
    interp: StreamingInterpreter,
    inputs: Vec<f64>,
    outputs: Vec<f64>,
}

impl Driver {
    fn new(model: Arc<Model>, config: StreamingConfig) -> Self {
        let inputs = vec![0.0; model.input_len()];
        let outputs = vec![0.0; model.output_len()];
        Self {
            interp: StreamingInterpreter::new(model, config),
            inputs,
            outputs,
        }
    }

    fn advance(&mut self, dt: Duration) -> Result<StreamState, EvaluationFault> {
        self.interp.advance(dt, &self.inputs, &mut self.outputs)
    }

    /// Current `scene`, resolved against the instance string table
    fn scene(&self) -> Option<&str> {
        let slot = self.interp.model().output("scene")?.slot as usize;
        self.interp.resolve_string(self.outputs[slot])
    }
}

#[test]
fn test_timeout_runs_default_flow() {
    let mut driver = Driver::new(story(), StreamingConfig::default());

    assert_eq!(driver.advance(Duration::ZERO), Ok(StreamState::AwaitingExtension));
    assert_eq!(driver.scene(), Some("intro"));
    assert_eq!(driver.interp.awaiting_point(), Some("choice"));

    for _ in 0..3 {
        assert_eq!(driver.advance(STEP), Ok(StreamState::AwaitingExtension));
    }
    assert_eq!(driver.advance(STEP), Ok(StreamState::Running));
    assert_eq!(driver.interp.clock(), Duration::from_secs(2));
    assert_eq!(driver.scene(), Some("ending_A"));
    assert_eq!(driver.interp.awaiting_point(), None);

    // Late attachment is rejected and changes nothing
    assert_eq!(
        driver.interp.attacher().attach(bonus("bonus")),
        Err(AttachmentRejected::AlreadyResolved)
    );
    assert_eq!(driver.advance(Duration::from_secs(5)), Ok(StreamState::Terminal));
    assert_eq!(driver.scene(), Some("ending_A"));
}

#[test]
fn test_extension_replaces_default() {
    let mut driver = Driver::new(story(), StreamingConfig::default());
    driver.advance(Duration::ZERO).unwrap();
    for _ in 0..3 {
        driver.advance(STEP).unwrap();
    }
    assert_eq!(driver.interp.clock(), Duration::from_millis(1500));

    driver.interp.attacher().attach(bonus("bonus")).unwrap();
    // The attachment landed before the deadline, so it wins even though
    // this advance crosses it
    assert_eq!(driver.advance(STEP), Ok(StreamState::AwaitingExtension));
    assert_eq!(driver.interp.current_model().id(), ModelId::from_name("bonus"));
    assert_eq!(driver.scene(), Some("bonus"));
    assert_eq!(driver.interp.awaiting_point(), Some("bonus_choice"));

    driver.advance(Duration::from_secs(1)).unwrap();
    assert_eq!(driver.scene(), Some("bonus_end"));
    assert_eq!(driver.interp.state(), StreamState::Terminal);
}

#[test]
fn test_strings_survive_extension_switch() {
    let root = Arc::new(compile_doc(&document(
        "tale",
        vec![
            flow(
                "main",
                vec![
                    assign("scene", string("intro")),
                    assign("out", num(1.0)),
                    continuation("choice", 2.0, "fallback"),
                ],
            ),
            flow("fallback", vec![assign("out", num(3.0))]),
        ],
    )));
    let twist = Arc::new(compile_doc(&extending(
        document(
            "tale_twist",
            vec![flow(
                "main",
                vec![
                    assign("out", num(2.0)),
                    wait(num(1.0)),
                    assign("scene", string("twist")),
                ],
            )],
        ),
        "tale",
        "choice",
    )));
    let intro = root.string_index("intro").unwrap();
    let out = root.output("out").unwrap().slot as usize;
    let mut driver = Driver::new(Arc::clone(&root), StreamingConfig::default());

    assert_eq!(driver.advance(Duration::ZERO), Ok(StreamState::AwaitingExtension));
    driver.interp.attacher().attach(twist).unwrap();
    assert_eq!(driver.advance(STEP), Ok(StreamState::Running));
    assert!(driver.interp.holds_retired_stage());

    // The extension left `scene` alone, so it still reads as the root wrote it
    assert_eq!(driver.outputs[out], 2.0);
    assert_eq!(driver.scene(), Some("intro"));
    assert_eq!(driver.interp.string_index("intro"), Some(intro));

    assert_eq!(driver.advance(Duration::from_secs(1)), Ok(StreamState::Terminal));
    assert_eq!(driver.scene(), Some("twist"));
    assert_eq!(driver.interp.resolve_string(intro as f64), Some("intro"));
    assert!(!driver.interp.holds_retired_stage());
}

#[test]
fn test_second_attachment_is_rejected() {
    let mut driver = Driver::new(story(), StreamingConfig::default());
    driver.advance(Duration::ZERO).unwrap();

    let attacher = driver.interp.attacher();
    attacher.attach(bonus("bonus")).unwrap();
    assert_eq!(
        attacher.attach(bonus("rival")),
        Err(AttachmentRejected::AlreadyResolved)
    );

    driver.advance(STEP).unwrap();
    assert_eq!(driver.interp.current_model().id(), ModelId::from_name("bonus"));
    assert_eq!(driver.scene(), Some("bonus"));
}

#[test]
fn test_concurrent_attachments_pick_one() {
    let mut driver = Driver::new(story(), StreamingConfig::default());
    driver.advance(Duration::ZERO).unwrap();

    let candidates = [bonus("bonus"), bonus("rival"), bonus("third")];
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = candidates
            .iter()
            .map(|ext| {
                let attacher = driver.interp.attacher();
                let ext = Arc::clone(ext);
                scope.spawn(move || attacher.attach(ext))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let accepted: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(accepted.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == AttachmentRejected::AlreadyResolved));

    driver.advance(STEP).unwrap();
    let winner = results.iter().position(Result::is_ok).unwrap();
    assert_eq!(driver.interp.current_model().id(), candidates[winner].id());
}

#[test]
fn test_attachment_checks() {
    let mut driver = Driver::new(story(), StreamingConfig::default());
    let attacher = driver.interp.attacher();

    assert_eq!(
        attacher.attach(bonus("bonus")),
        Err(AttachmentRejected::NoPendingPoint)
    );
    driver.advance(Duration::ZERO).unwrap();

    assert_eq!(attacher.attach(story()), Err(AttachmentRejected::NotAnExtension));

    let wrong_parent = epilogue("epilogue");
    assert_eq!(
        attacher.attach(wrong_parent),
        Err(AttachmentRejected::ParentMismatch {
            expected: ModelId::from_name("story"),
            actual: ModelId::from_name("bonus"),
        })
    );

    let wrong_point = document("detour", vec![flow("main", vec![halt()])]);
    let wrong_point = Arc::new(compile_doc(&extending(wrong_point, "story", "elsewhere")));
    assert_eq!(
        attacher.attach(wrong_point),
        Err(AttachmentRejected::AttachPointMismatch)
    );

    let foreign = document(
        "foreign",
        vec![flow("main", vec![assign("out", num(1.0))])],
    );
    let foreign = Arc::new(compile_doc(&extending(foreign, "story", "choice")));
    assert_eq!(
        attacher.attach(foreign),
        Err(AttachmentRejected::SchemaMismatch { name: "out".into() })
    );

    // None of the rejections resolved the point
    attacher.attach(bonus("bonus")).unwrap();
}

#[test]
fn test_chained_extensions() {
    let mut driver = Driver::new(story(), StreamingConfig::default());
    let attacher = driver.interp.attacher();
    driver.advance(Duration::ZERO).unwrap();
    attacher.attach(bonus("bonus")).unwrap();

    assert_eq!(driver.advance(Duration::ZERO), Ok(StreamState::AwaitingExtension));
    assert_eq!(driver.interp.awaiting_point(), Some("bonus_choice"));

    attacher.attach(epilogue("epilogue")).unwrap();
    assert_eq!(driver.advance(Duration::ZERO), Ok(StreamState::Running));
    assert_eq!(driver.scene(), Some("epilogue"));
    assert_eq!(driver.interp.model().id(), ModelId::from_name("story"));
}

#[test]
fn test_circular_extension_rejected() {
    let mut driver = Driver::new(story(), StreamingConfig::default());
    let attacher = driver.interp.attacher();
    driver.advance(Duration::ZERO).unwrap();
    attacher.attach(bonus("bonus")).unwrap();
    driver.advance(Duration::ZERO).unwrap();

    // An extension compiled under the root's name would re-enter the root
    let looping = document("story", vec![flow("main", vec![assign("scene", string("loop"))])]);
    let looping = Arc::new(compile_doc(&extending(looping, "bonus", "bonus_choice")));
    assert_eq!(
        attacher.attach(looping),
        Err(AttachmentRejected::CircularExtension(ModelId::from_name("story")))
    );

    // Rejection leaves the default continuation in place
    assert_eq!(driver.advance(Duration::from_secs(1)), Ok(StreamState::Terminal));
    assert_eq!(driver.scene(), Some("bonus_end"));
}

#[test]
fn test_chain_depth_limit() {
    let config = StreamingConfig {
        max_extension_chain: 1,
        ..StreamingConfig::default()
    };
    let mut driver = Driver::new(story(), config);
    let attacher = driver.interp.attacher();
    driver.advance(Duration::ZERO).unwrap();
    attacher.attach(bonus("bonus")).unwrap();
    driver.advance(Duration::ZERO).unwrap();

    assert_eq!(
        attacher.attach(epilogue("epilogue")),
        Err(AttachmentRejected::ChainTooDeep { limit: 1 })
    );
}

#[test]
fn test_sequences_complete_without_extensions() {
    let doc = document(
        "saga",
        vec![
            flow(
                "main",
                vec![
                    assign("out", num(1.0)),
                    continuation("first", 0.5, "act_two"),
                ],
            ),
            flow(
                "act_two",
                vec![
                    assign("out", num(2.0)),
                    wait(num(0.25)),
                    continuation("second", 0.5, "act_three"),
                ],
            ),
            flow("act_three", vec![call_flow("finale")]),
            flow("finale", vec![assign("out", num(3.0))]),
        ],
    );
    let model = Arc::new(compile_doc(&doc));
    let slot = model.output("out").unwrap().slot as usize;
    let mut driver = Driver::new(model, StreamingConfig::default());

    let step = Duration::from_millis(100);
    let mut state = StreamState::Running;
    for _ in 0..50 {
        state = driver.advance(step).unwrap();
        if state == StreamState::Terminal {
            break;
        }
    }
    assert_eq!(state, StreamState::Terminal);
    assert_eq!(driver.outputs[slot], 3.0);
    assert!(driver.interp.clock() <= Duration::from_secs(2));

    // Terminal is sticky
    assert_eq!(driver.advance(step), Ok(StreamState::Terminal));
}

#[test]
fn test_wait_suspends_until_clock_passes() {
    let doc = document(
        "timer",
        vec![flow(
            "main",
            vec![
                assign("out", num(1.0)),
                wait(num(1.0)),
                assign("out", num(2.0)),
            ],
        )],
    );
    let model = Arc::new(compile_doc(&doc));
    let slot = model.output("out").unwrap().slot as usize;
    let mut driver = Driver::new(model, StreamingConfig::default());

    assert_eq!(driver.advance(Duration::ZERO), Ok(StreamState::Running));
    assert_eq!(driver.outputs[slot], 1.0);
    assert_eq!(driver.advance(STEP), Ok(StreamState::Running));
    assert_eq!(driver.outputs[slot], 1.0);
    assert_eq!(driver.advance(STEP), Ok(StreamState::Terminal));
    assert_eq!(driver.outputs[slot], 2.0);
}

#[test]
fn test_fault_is_terminal() {
    let doc = document(
        "spinner",
        vec![flow(
            "main",
            vec![repeat(
                100,
                vec![assign("out", binary(BinaryOp::Add, var("a"), num(1.0)))],
            )],
        )],
    );
    let config = StreamingConfig {
        vm: VmConfig {
            instruction_limit: 50,
            ..VmConfig::default()
        },
        ..StreamingConfig::default()
    };
    let mut driver = Driver::new(Arc::new(compile_doc(&doc)), config);

    assert_eq!(
        driver.advance(Duration::ZERO),
        Err(EvaluationFault::InstructionLimit { limit: 50 })
    );
    assert_eq!(driver.interp.state(), StreamState::Terminal);
    assert_eq!(driver.advance(STEP), Err(EvaluationFault::Faulted));
}

#[test]
fn test_state_length_checked() {
    let mut interp = StreamingInterpreter::new(story(), StreamingConfig::default());
    let mut outputs = vec![0.0; 7];
    assert!(matches!(
        interp.advance(Duration::ZERO, &[], &mut outputs),
        Err(EvaluationFault::StateMismatch { what: "output", .. })
    ));
    // A malformed call does not fault the instance
    let mut outputs = vec![0.0; interp.model().output_len()];
    assert_eq!(
        interp.advance(Duration::ZERO, &[], &mut outputs),
        Ok(StreamState::AwaitingExtension)
    );
}
