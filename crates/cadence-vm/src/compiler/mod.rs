//! Behavior compiler (AST to Model)
//!
//! Pipeline: semantic analysis against a [`SchemaRegistry`], lowering to
//! basic-block IR, level-gated optimization, bytecode emission. Every stage
//! is a pure transformation; diagnostics are accumulated and a failed
//! compilation never yields a partial Model.

use crate::bytecode::{Model, ModelFlags, FORMAT_VERSION};
use crate::error::{CompileError, CompileErrorKind};
use crate::verify::{analyze_stack, verify_model};
use cadence_ast::{Document, Span};
use cadence_types::ModelId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// Module structure
mod codegen;
pub(crate) mod constants;
pub(crate) mod ir;
pub(crate) mod optimize;
pub mod schema;
mod semantic;
pub(crate) mod symbols;

pub use schema::{Access, SchemaRegistry, StaticSchemaRegistry, VariableSchema};

use codegen::CodeGenerator;
use constants::ConstantPool;

/// Highest optimization level
pub const MAX_OPTIMIZATION_LEVEL: u8 = 3;

/// Compiler settings
///
/// - `optimization_level`: 0 none, 1 constant folding, 2 + dead-branch and
///   unreachable-block elimination, 3 + subexpression caching
/// - `debug_info`: embed the source map
/// - `compress`: zstd-compress the payload when serialized
/// - `model_id`: override the identifier derived from the document name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub optimization_level: u8,
    pub debug_info: bool,
    pub compress: bool,
    pub model_id: Option<ModelId>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimization_level: 2,
            debug_info: false,
            compress: false,
            model_id: None,
        }
    }
}

impl CompileOptions {
    pub fn with_level(mut self, level: u8) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_debug_info(mut self) -> Self {
        self.debug_info = true;
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }
}

/// Behavior compiler bound to a schema registry
pub struct Compiler<'r> {
    registry: &'r dyn SchemaRegistry,
    options: CompileOptions,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r dyn SchemaRegistry, options: CompileOptions) -> Self {
        let mut options = options;
        if options.optimization_level > MAX_OPTIMIZATION_LEVEL {
            warn!(
                requested = options.optimization_level,
                "Optimization level clamped to {MAX_OPTIMIZATION_LEVEL}"
            );
            options.optimization_level = MAX_OPTIMIZATION_LEVEL;
        }
        Self { registry, options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile a document into a Model, or report every diagnostic found
    pub fn compile(&self, document: &Document) -> Result<Model, Vec<CompileError>> {
        let mut pool = ConstantPool::new();

        let analysis = semantic::analyze(document, self.registry, &mut pool)?;
        debug!(
            document = %document.name,
            flows = analysis.flows.len(),
            continuation_points = analysis.points.len(),
            "Semantic analysis complete"
        );

        let mut program = ir::build(&analysis);
        debug!(blocks = program.blocks.len(), "IR built");

        optimize::optimize(&mut program, self.options.optimization_level);
        debug!(
            level = self.options.optimization_level,
            blocks = program.layout.len(),
            "IR optimized"
        );

        let local_count = u16::try_from(program.local_count)
            .map_err(|_| vec![limit(format!("{} locals", program.local_count))])?;

        let generated = CodeGenerator::new(&program, &analysis.points, &mut pool)
            .generate()
            .map_err(|err| vec![err])?;

        let max_stack = analyze_stack(
            &generated.code,
            generated.entry_offset as usize,
            &generated.continuation_points,
        )
        .map_err(|err| vec![limit(format!("operand stack: {err}"))])?;

        let mut flags = ModelFlags::default();
        if self.options.debug_info {
            flags.insert(ModelFlags::DEBUG_INFO);
        }
        if self.options.compress {
            flags.insert(ModelFlags::COMPRESSED);
        }
        if !generated.continuation_points.is_empty() {
            flags.insert(ModelFlags::HAS_CONTINUATION_POINTS);
        }
        if analysis.extension.is_some() {
            flags.insert(ModelFlags::IS_EXTENSION);
        }

        let model = Model {
            id: self
                .options
                .model_id
                .unwrap_or_else(|| ModelId::from_name(&document.name)),
            version: FORMAT_VERSION,
            flags,
            max_stack,
            max_call_depth: analysis.max_call_depth,
            local_count,
            entry_offset: generated.entry_offset,
            schema: analysis.schema,
            continuation_points: generated.continuation_points,
            constants: pool.constants,
            strings: pool.strings,
            code: generated.code,
            extension: analysis.extension,
            debug: self.options.debug_info.then_some(generated.debug),
        };

        // Anything the loader would reject is a compiler defect
        verify_model(&model).map_err(|err| vec![limit(format!("generated model is invalid: {err}"))])?;

        info!(
            document = %document.name,
            model = %model.id,
            instructions = model.code.len(),
            constants = model.constants.len(),
            max_stack = model.max_stack,
            "Model compiled"
        );
        Ok(model)
    }
}

fn limit(message: String) -> CompileError {
    CompileError::new(CompileErrorKind::Limit, Span::default(), message)
}

/// Compile a document with a one-off [`Compiler`]
pub fn compile(
    document: &Document,
    registry: &dyn SchemaRegistry,
    options: CompileOptions,
) -> Result<Model, Vec<CompileError>> {
    Compiler::new(registry, options).compile(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_ast::build::*;
    use cadence_ast::BinaryOp;
    use cadence_types::ValueType;

    fn registry() -> StaticSchemaRegistry {
        StaticSchemaRegistry::new()
            .input("stamina", ValueType::Number)
            .output("speed", ValueType::Number)
    }

    #[test]
    fn test_options_from_json() {
        let options: CompileOptions =
            serde_json::from_str(r#"{"optimization_level": 3, "debug_info": true}"#).unwrap();
        assert_eq!(options.optimization_level, 3);
        assert!(options.debug_info);
        assert!(!options.compress);
    }

    #[test]
    fn test_level_is_clamped() {
        let registry = registry();
        let compiler = Compiler::new(&registry, CompileOptions::default().with_level(9));
        assert_eq!(compiler.options().optimization_level, MAX_OPTIMIZATION_LEVEL);
    }

    #[test]
    fn test_flags_follow_options() {
        let doc = document(
            "runner",
            vec![flow(
                "main",
                vec![assign("speed", binary(BinaryOp::Mul, var("stamina"), num(2.0)))],
            )],
        );
        let model = compile(
            &doc,
            &registry(),
            CompileOptions::default().with_debug_info().compressed(),
        )
        .unwrap();
        assert!(model.flags().contains(ModelFlags::DEBUG_INFO));
        assert!(model.flags().contains(ModelFlags::COMPRESSED));
        assert!(!model.has_continuation_points());
        assert_eq!(model.id(), ModelId::from_name("runner"));
        assert_eq!(model.max_stack(), 2);
        assert!(model.debug_map().is_some());
    }

    #[test]
    fn test_errors_are_batched() {
        let doc = document(
            "broken",
            vec![flow(
                "main",
                vec![assign("speed", var("missing")), assign("nowhere", num(1.0))],
            )],
        );
        let errors = compile(&doc, &registry(), CompileOptions::default()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| e.kind == CompileErrorKind::UnknownVariable));
    }
}
