//! The free-form GASC emitter of spec.md #4.5.
//!
//! Unlike the VCT emitter, no channel map is consulted: every vector
//! renders the full declared-signal-order WFC list, and the
//! `Signals`/`SignalGroups`/`Timing` sections are written in a form
//! this crate's own block parser can re-read (spec.md #8's round-trip
//! property).

use super::{micro_text, FinishOutcome};
use crate::ast::{Direction, HeaderInfo};
use crate::lowering::{LoweredVector, MicroInstruction, VectorSink};
use crate::symbols::{SignalGroupTable, SignalTable, WaveformTableTable};
use stil_core::StilError;
use std::io::Write;

pub struct GascEmitter<W: Write> {
    writer: W,
}

impl<W: Write> GascEmitter<W> {
    pub fn new(
        writer: W,
        header: &HeaderInfo,
        signals: &SignalTable,
        group_defs: &[(&str, &[String])],
        waveform_tables: &WaveformTableTable,
    ) -> Result<Self, StilError> {
        let mut emitter = GascEmitter { writer };
        emitter.write_file_header(header, signals, group_defs, waveform_tables)?;
        Ok(emitter)
    }

    fn io(&self, e: std::io::Error) -> StilError {
        StilError::io("failed writing GASC output", e)
    }

    fn write_file_header(
        &mut self,
        header: &HeaderInfo,
        signals: &SignalTable,
        group_defs: &[(&str, &[String])],
        waveform_tables: &WaveformTableTable,
    ) -> Result<(), StilError> {
        writeln!(self.writer, "Header {{").map_err(|e| self.io(e))?;
        for (key, value) in header {
            writeln!(self.writer, "  {} = \"{}\";", key, value).map_err(|e| self.io(e))?;
        }
        writeln!(self.writer, "}}").map_err(|e| self.io(e))?;

        writeln!(self.writer, "Signals {{").map_err(|e| self.io(e))?;
        for signal in signals.iter() {
            let dir = direction_word(signal.direction);
            match signal.default_wfc {
                Some(wfc) => writeln!(self.writer, "  {} {} {};", signal.name, dir, wfc)
                    .map_err(|e| self.io(e))?,
                None => {
                    writeln!(self.writer, "  {} {};", signal.name, dir).map_err(|e| self.io(e))?
                }
            }
        }
        writeln!(self.writer, "}}").map_err(|e| self.io(e))?;

        if !group_defs.is_empty() {
            writeln!(self.writer, "SignalGroups {{").map_err(|e| self.io(e))?;
            for (name, members) in group_defs {
                writeln!(self.writer, "  {} {{ {} }};", name, members.join(", "))
                    .map_err(|e| self.io(e))?;
            }
            writeln!(self.writer, "}}").map_err(|e| self.io(e))?;
        }

        writeln!(self.writer, "Timing {{").map_err(|e| self.io(e))?;
        for wft in waveform_tables.iter() {
            writeln!(self.writer, "  {} {{", wft.name).map_err(|e| self.io(e))?;
            if let Some(period) = wft.period {
                writeln!(self.writer, "    Period {};", period).map_err(|e| self.io(e))?;
            }
            for (signal, mapping) in &wft.mapping {
                writeln!(self.writer, "    {} {{", signal).map_err(|e| self.io(e))?;
                for (raw, driven) in mapping {
                    writeln!(self.writer, "      {}:{};", raw, driven).map_err(|e| self.io(e))?;
                }
                writeln!(self.writer, "    }}").map_err(|e| self.io(e))?;
            }
            writeln!(self.writer, "  }};").map_err(|e| self.io(e))?;
        }
        writeln!(self.writer, "}}").map_err(|e| self.io(e))?;

        writeln!(self.writer, "SPM_PATTERN (SCAN) {{").map_err(|e| self.io(e))
    }

    /// Write the closing `}` of the `SPM_PATTERN (SCAN)` block on both
    /// success and cancellation (spec.md #7), mirroring the VCT
    /// emitter's `#VECTOREND`.
    pub fn finish(mut self, _outcome: FinishOutcome) -> Result<(), StilError> {
        writeln!(self.writer, "}}").map_err(|e| self.io(e))?;
        self.writer.flush().map_err(|e| self.io(e))
    }
}

fn direction_word(direction: Direction) -> &'static str {
    match direction {
        Direction::In => "In",
        Direction::Out => "Out",
        Direction::InOut => "InOut",
        Direction::Supply => "Supply",
        Direction::Pseudo => "Pseudo",
    }
}

impl<W: Write> VectorSink for GascEmitter<W> {
    fn write_vector(&mut self, vector: &LoweredVector) -> Result<(), StilError> {
        let wfcs: String = vector.wfcs.iter().map(|w| w.as_char()).collect();
        let micro_suffix = match vector.micro {
            MicroInstruction::Adv => String::new(),
            ref other => format!("#{}", micro_text(other)),
        };
        let wft_suffix = match &vector.wft_name {
            Some(name) => format!(";{}", name),
            None => String::new(),
        };
        let label_suffix = if vector.labels.is_empty() {
            String::new()
        } else {
            format!(":{}", vector.labels.join(","))
        };
        writeln!(
            self.writer,
            "       *{}*{}{}{}",
            wfcs, micro_suffix, wft_suffix, label_suffix
        )
        .map_err(|e| self.io(e))
    }
}

/// Flatten a `SignalGroupTable`'s declared members for the `Signals`/
/// `SignalGroups` section of the header, in the order groups were
/// declared. Only the direct member list is written (not the
/// flattened leaf-signal list) so a re-parse of this crate's own
/// output reproduces the same nested `SignalGroupDef`s.
pub fn group_defs_for<'a>(
    names: &'a [String],
    lookup: &'a SignalGroupTable,
) -> Vec<(&'a str, &'a [String])> {
    names
        .iter()
        .filter_map(|name| lookup.members_of(name).map(|members| (name.as_str(), members)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SignalDef;
    use crate::lowering::MicroInstruction;
    use stil_core::Wfc;

    #[test]
    fn vector_line_omits_implicit_adv_suffixes() {
        let mut signals = SignalTable::new();
        signals
            .insert(SignalDef {
                name: "a".to_string(),
                direction: Direction::In,
                default_wfc: None,
            })
            .unwrap();
        let waveform_tables = WaveformTableTable::new();
        let header = HeaderInfo::new();
        let mut buf = Vec::new();
        {
            let mut emitter =
                GascEmitter::new(&mut buf, &header, &signals, &[], &waveform_tables).unwrap();
            emitter
                .write_vector(&LoweredVector {
                    address: 0,
                    wfcs: vec![Wfc::new('D').unwrap()],
                    micro: MicroInstruction::Adv,
                    wft_name: None,
                    wft_id: None,
                    labels: vec![],
                })
                .unwrap();
            emitter.finish(FinishOutcome::Completed).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("*D*"));
        assert!(!text.contains("*D*#"));
        assert!(text.trim_end().ends_with('}'));
    }

    #[test]
    fn vector_line_renders_micro_wft_and_label_suffixes() {
        let mut signals = SignalTable::new();
        signals
            .insert(SignalDef {
                name: "a".to_string(),
                direction: Direction::In,
                default_wfc: None,
            })
            .unwrap();
        let waveform_tables = WaveformTableTable::new();
        let header = HeaderInfo::new();
        let mut buf = Vec::new();
        {
            let mut emitter =
                GascEmitter::new(&mut buf, &header, &signals, &[], &waveform_tables).unwrap();
            emitter
                .write_vector(&LoweredVector {
                    address: 0,
                    wfcs: vec![Wfc::new('D').unwrap()],
                    micro: MicroInstruction::Halt,
                    wft_name: Some("w".to_string()),
                    wft_id: Some(0),
                    labels: vec!["L1".to_string()],
                })
                .unwrap();
            emitter.finish(FinishOutcome::Completed).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("*D*#HALT;w:L1"));
    }
}
