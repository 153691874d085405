//! The STIL lexer, block parser, pattern-lowering engine, and
//! VCT/GASC emitters of spec.md #2-#4.
//!
//! `convert` is the `Convert` entry point of spec.md #6: it reads a
//! STIL source file, parses its symbol tables, streams the `Pattern`
//! body through [`lowering::LoweringEngine`], and writes the result
//! through whichever of [`emit::vct::VctEmitter`]/
//! [`emit::gasc::GascEmitter`] the requested [`Target`] selects.
//!
//! # Modules
//!
//! - `lexer`: the pure, restartable token stream of spec.md #4.1
//! - `ast`: block-level symbol-table entries and the Pattern Statement AST
//! - `block_parser`: the two-phase top-level block dispatcher of spec.md #4.2
//! - `symbols`: signal/group/waveform-table/procedure/macro tables
//! - `pattern_parser`: the Pattern Statement recursive-descent parser
//! - `lowering`: the Pattern Lowering Engine of spec.md #4.3
//! - `emit`: the VCT and GASC emitters of spec.md #4.4/#4.5
//! - `config`: host-facing `EngineConfig`/`Target`

pub mod ast;
pub mod block_parser;
pub mod config;
pub mod emit;
pub mod lexer;
pub mod lowering;
pub mod pattern_parser;
pub mod symbols;

pub use config::{EngineConfig, Target};
pub use lowering::{LoweredVector, MicroInstruction};

use emit::gasc::{group_defs_for, GascEmitter};
use emit::vct::VctEmitter;
use emit::FinishOutcome;
use lowering::{validate_top_level_labels, LoweringEngine};
use pattern_parser::PatternStatementParser;
use std::fs;
use std::io::BufWriter;
use std::path::Path;
use stil_core::{Event, EventSink, StilError};

/// The `Ok` payload of `convert` (spec.md #6's "[EXPANDED]" note): the
/// spec's `Done{total_vectors}` event duplicates this for a streaming
/// host, but a synchronous caller that never reads the event channel
/// still needs a return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSummary {
    pub total_vectors: u64,
    pub warnings: u32,
}

/// Convert a STIL source file to either a VCT or GASC pattern file
/// (spec.md #6's `Convert` entry point).
///
/// Reads `source_path`, parses every non-`Pattern` block into the
/// symbol tables of spec.md #3 (two-phase semantics, spec.md #4.2),
/// then streams the `Pattern` body through the lowering engine into
/// `output_path`. On cancellation, the emitter's closing marker is
/// still written (spec.md #7) and `StilError::Cancelled` is returned;
/// on any other fatal error, `output_path` is left without a closing
/// marker, per the same policy.
pub fn convert(
    source_path: &Path,
    output_path: &Path,
    config: &EngineConfig,
    event_sink: &dyn EventSink,
) -> Result<ConvertSummary, StilError> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| StilError::io(format!("failed reading '{}'", source_path.display()), e))?;

    let document = block_parser::parse_document(&source, &config.deny_list)?;
    let warnings = document.warnings.len() as u32;
    for (offset, message) in &document.warnings {
        event_sink.emit(Event::Warning {
            source_offset: *offset,
            message: message.clone(),
        });
    }

    let out_file = fs::File::create(output_path)
        .map_err(|e| StilError::io(format!("failed creating '{}'", output_path.display()), e))?;
    let writer = BufWriter::new(out_file);

    let enforce_wft_limit = matches!(config.target, Target::Vct);
    let total_len = source.len() as u64;

    let scan_parser = PatternStatementParser::new(document.pattern_body.clone(), &config.deny_list);
    validate_top_level_labels(scan_parser, &document.callables)?;

    let parser = PatternStatementParser::new(document.pattern_body, &config.deny_list);
    let engine = LoweringEngine::new(
        &document.signals,
        &document.groups,
        &document.waveform_tables,
        &document.callables,
        event_sink,
        config.cancellation.clone(),
        enforce_wft_limit,
        total_len,
    );

    let source_display = source_path.display().to_string();
    let outcome = match config.target {
        Target::Vct => {
            let mut emitter = VctEmitter::new(
                writer,
                &source_display,
                &document.header,
                &document.signals,
                &document.waveform_tables,
                &config.channel_map,
                event_sink,
            )?;
            let run = engine.run(parser, &mut emitter);
            finish_run(run, |outcome| emitter.finish(outcome))
        }
        Target::Gasc => {
            let group_names = document.groups.names().to_vec();
            let group_defs = group_defs_for(&group_names, &document.groups);
            let mut emitter = GascEmitter::new(
                writer,
                &document.header,
                &document.signals,
                &group_defs,
                &document.waveform_tables,
            )?;
            let run = engine.run(parser, &mut emitter);
            finish_run(run, |outcome| emitter.finish(outcome))
        }
    };

    match outcome {
        Ok(total_vectors) => {
            event_sink.emit(Event::Done { total_vectors });
            Ok(ConvertSummary {
                total_vectors,
                warnings,
            })
        }
        Err(StilError::Cancelled { last_address }) => {
            event_sink.emit(Event::Cancelled { last_address });
            Err(StilError::Cancelled { last_address })
        }
        Err(other) => Err(other),
    }
}

/// Always write the emitter's closing marker before propagating the
/// lowering engine's result -- on success with `FinishOutcome::Completed`,
/// on cancellation with `FinishOutcome::Cancelled`, and not at all on
/// any other fatal error (spec.md #7).
fn finish_run(
    run: Result<u64, StilError>,
    finish: impl FnOnce(FinishOutcome) -> Result<(), StilError>,
) -> Result<u64, StilError> {
    match run {
        Ok(total) => {
            finish(FinishOutcome::Completed)?;
            Ok(total)
        }
        Err(StilError::Cancelled { last_address }) => {
            finish(FinishOutcome::Cancelled { last_address })?;
            Err(StilError::Cancelled { last_address })
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stil_core::{ChannelMap, NullEventSink};
    use tempfile::tempdir;

    fn write_source(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn convert_minimal_pattern_to_vct() {
        let dir = tempdir().unwrap();
        let src = write_source(
            &dir,
            "in.stil",
            "Signals { a In; } Timing { w { a { 0:D; 1:U; } }; } Pattern p { W w; V{a=0;} V{a=1;} Stop; }",
        );
        let out = dir.path().join("out.vct");
        let channel_map = ChannelMap::from_entries([("a".to_string(), vec![0])]).unwrap();
        let config = EngineConfig::new(Target::Vct).with_channel_map(channel_map);
        let summary = convert(&src, &out, &config, &NullEventSink).unwrap();
        assert_eq!(summary.total_vectors, 3);
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("#VECTOR"));
        assert!(text.contains("#VECTOREND"));
        assert!(text.contains("MSSA"));
        assert!(text.contains("HALT"));
    }

    #[test]
    fn convert_minimal_pattern_to_gasc() {
        let dir = tempdir().unwrap();
        let src = write_source(
            &dir,
            "in.stil",
            "Signals { a In; } Timing { w { a { 0:D; 1:U; } }; } Pattern p { W w; V{a=0;} V{a=1;} Stop; }",
        );
        let out = dir.path().join("out.gasc");
        let config = EngineConfig::new(Target::Gasc);
        let summary = convert(&src, &out, &config, &NullEventSink).unwrap();
        assert_eq!(summary.total_vectors, 3);
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("SPM_PATTERN (SCAN)"));
        assert!(text.contains("*D*"));
        assert!(text.trim_end().ends_with('}'));
    }

    #[test]
    fn cancellation_still_writes_closing_marker() {
        let dir = tempdir().unwrap();
        let src = write_source(
            &dir,
            "in.stil",
            "Signals { a In; } Timing { w { a { 0:D; 1:U; } }; } Pattern p { W w; V{a=0;} V{a=1;} Stop; }",
        );
        let out = dir.path().join("out.gasc");
        let token = stil_core::CancellationToken::new();
        token.cancel();
        let config = EngineConfig::new(Target::Gasc).with_cancellation(token);
        let err = convert(&src, &out, &config, &NullEventSink).unwrap_err();
        assert!(err.is_cancellation());
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.trim_end().ends_with('}'));
    }
}
