//! The two output formats of spec.md #4.4/#4.5: a fixed-column VCT
//! pattern for a 256-channel HTOL tester, and a free-form GASC
//! pattern text. Both consume the same `LoweredVector` stream from
//! `crate::lowering` through the shared `VectorSink` trait; only the
//! framing and per-vector rendering differ.

pub mod gasc;
pub mod vct;

use crate::lowering::MicroInstruction;

/// Whether an emitter's trailing framing marker records normal
/// completion or a cooperative cancellation (spec.md #7: "the
/// emitter always writes a closing marker ... on both success and
/// cancellation, and never on fatal error"). `convert()` only ever
/// calls `finish` with one of these two variants -- a fatal error
/// propagates with `?` before `finish` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    Completed,
    Cancelled { last_address: u64 },
}

/// Render a micro-instruction the way both emitters need it rendered
/// for the plain `ADV` case, i.e. always produce text. The VCT emitter
/// always prints this; the GASC emitter additionally suppresses it for
/// bare `Adv` (spec.md #4.5: "`#micro` omitted when the instruction is
/// the implicit `ADV`"), which `gasc::render_micro_suffix` handles on
/// top of this.
pub(crate) fn micro_text(micro: &MicroInstruction) -> String {
    match micro {
        MicroInstruction::Mssa => "MSSA".to_string(),
        MicroInstruction::Adv => "ADV".to_string(),
        MicroInstruction::Rpt(n) => format!("RPT {}", n),
        MicroInstruction::Li(k, n) => format!("LI{} {}", k, n),
        MicroInstruction::Jni(k) => format!("JNI{}", k),
        MicroInstruction::Imatch => "IMATCH".to_string(),
        MicroInstruction::Mbgn => "MBGN".to_string(),
        MicroInstruction::Mend => "MEND".to_string(),
        MicroInstruction::Halt => "HALT".to_string(),
        MicroInstruction::Jump(label) => format!("JUMP {}", label),
        MicroInstruction::Call(name) => format!("CALL {}", name),
        MicroInstruction::Ret => "RET".to_string(),
        MicroInstruction::Iddq => "IDDQ".to_string(),
    }
}
