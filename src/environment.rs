//! Compilation environment for batches of ByteScript scripts
//!
//! Scripts in a batch may call each other, so whether one compiles depends
//! on which others survive. The environment checks every loaded script
//! against the headers of all the others, drops the failures, and repeats
//! until a pass drops nothing. Survivors are then compiled against the
//! reduced header set.

use std::collections::HashSet;

use tracing::debug;

use crate::analyzer::{analyze, Analysis};
use crate::ast::Program;
use crate::compiler::Compiler;
use crate::error::Result;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::script::{ByteScript, CompilationResult, KnownHeaders, ScriptSource};
use crate::vm::ScriptRegistry;

/// Parse a script body, numbering lines from the source's first line.
pub fn parse_source(source: &ScriptSource) -> Result<Program> {
    let tokens = Lexer::new(&source.text)
        .starting_at_line(source.first_line)
        .tokenize()?;
    Parser::new(tokens).parse()
}

/// Compile one script against `known` (its own header need not be there).
pub fn compile_source(source: &ScriptSource, known: &KnownHeaders) -> CompilationResult {
    let program = match parse_source(source) {
        Ok(program) => program,
        Err(error) => return CompilationResult::syntax_failure(source.name(), error.to_string()),
    };
    let analysis = analyze(&program, &source.header, known);
    finish(source, analysis)
}

/// Generate code for an analyzed script.
fn finish(source: &ScriptSource, analysis: Analysis) -> CompilationResult {
    let Some(program) = analysis.program else {
        return CompilationResult::semantic_failure(source.name(), analysis.errors);
    };

    match Compiler::new().compile(&program) {
        Ok(code) => {
            debug!(script = source.name(), bytes = code.len(), "unit compiled");
            CompilationResult::compiled(ByteScript::new(source.header.clone(), code))
        }
        Err(error) => CompilationResult::semantic_failure(source.name(), vec![error.to_string()]),
    }
}

/// A batch of sources waiting to be compiled together.
#[derive(Debug, Default)]
pub struct CompilationEnvironment {
    sources: Vec<ScriptSource>,
}

impl CompilationEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, source: ScriptSource) {
        self.sources.push(source);
    }

    pub fn load_all(&mut self, sources: impl IntoIterator<Item = ScriptSource>) {
        self.sources.extend(sources);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Compile everything loaded, returning one result per source in load
    /// order. The environment is empty afterwards.
    pub fn compile(&mut self) -> Vec<CompilationResult> {
        self.compile_with(&KnownHeaders::new())
    }

    /// Like [`compile`](Self::compile), with extra callable headers that are
    /// already compiled elsewhere (e.g. in a running registry). Loaded
    /// sources take precedence over `external` headers of the same name.
    pub fn compile_with(&mut self, external: &KnownHeaders) -> Vec<CompilationResult> {
        let sources = std::mem::take(&mut self.sources);
        let mut results: Vec<Option<CompilationResult>> = vec![None; sources.len()];

        // Parsing does not depend on other scripts, so it happens once.
        let mut alive: Vec<(usize, Program)> = Vec::with_capacity(sources.len());
        let mut seen = HashSet::new();
        for (index, source) in sources.iter().enumerate() {
            if !seen.insert(source.name()) {
                results[index] = Some(CompilationResult::semantic_failure(
                    source.name(),
                    vec![format!("script '{}' is already defined", source.name())],
                ));
                continue;
            }
            match parse_source(source) {
                Ok(program) => alive.push((index, program)),
                Err(error) => {
                    debug!(script = source.name(), %error, "syntax error");
                    results[index] =
                        Some(CompilationResult::syntax_failure(source.name(), error.to_string()));
                }
            }
        }

        let mut pass = 0;
        let analyses = loop {
            pass += 1;
            let mut known = external.clone();
            for (index, _) in &alive {
                let header = &sources[*index].header;
                known.insert(header.name().to_string(), header.clone());
            }

            let analyses: Vec<Analysis> = alive
                .iter()
                .map(|(index, program)| analyze(program, &sources[*index].header, &known))
                .collect();

            if analyses.iter().all(Analysis::success) {
                break analyses;
            }

            let mut survivors = Vec::with_capacity(alive.len());
            for ((index, program), analysis) in alive.into_iter().zip(analyses) {
                if analysis.success() {
                    survivors.push((index, program));
                } else {
                    let name = sources[index].name();
                    debug!(script = name, pass, "script eliminated");
                    results[index] =
                        Some(CompilationResult::semantic_failure(name, analysis.errors));
                }
            }
            alive = survivors;
        };

        for ((index, _), analysis) in alive.iter().zip(analyses) {
            results[*index] = Some(finish(&sources[*index], analysis));
        }

        debug!(
            loaded = sources.len(),
            compiled = alive.len(),
            passes = pass,
            "batch compiled"
        );

        results
            .into_iter()
            .zip(&sources)
            .map(|(result, source)| {
                result.unwrap_or_else(|| {
                    CompilationResult::semantic_failure(
                        source.name(),
                        vec!["script was not compiled".to_string()],
                    )
                })
            })
            .collect()
    }
}

/// Add every successful unit to `registry`; returns how many were added.
pub fn install(results: Vec<CompilationResult>, registry: &mut ScriptRegistry) -> usize {
    let mut installed = 0;
    for unit in results.into_iter().filter_map(|r| r.unit) {
        registry.insert(unit);
        installed += 1;
    }
    installed
}
