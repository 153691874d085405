//! The symbol tables of spec.md #3, built by the block parser before
//! any `Pattern` body is lowered (spec.md #4.2's two-phase contract).
//!
//! Four tables live here: `SignalTable` (declaration-order signals),
//! `SignalGroupTable` (nested groups, flattened and memoized),
//! `WaveformTableTable` (declared `Timing` tables, in declaration
//! order), and `CallableTable` (`Procedures`/`MacroDefs`, checked for
//! recursion). All four are built once and are read-only afterwards
//! (spec.md #5: "may be shared across threads without locking").

use crate::ast::{CallableDef, SignalDef, SignalGroupDef, Statement, StatementKind, WaveformTableDef};
use stil_core::{StilError, Wfc};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct SignalTable {
    order: Vec<SignalDef>,
    index: HashMap<String, usize>,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: SignalDef) -> Result<(), StilError> {
        if self.index.contains_key(&def.name) {
            return Err(StilError::MalformedSymbolTable {
                message: format!("signal '{}' declared more than once", def.name),
            });
        }
        self.index.insert(def.name.clone(), self.order.len());
        self.order.push(def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SignalDef> {
        self.index.get(name).map(|&i| &self.order[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Declaration order, the order GASC's `Signals` section and
    /// per-vector WFC list use (spec.md #3: "Insertion order is
    /// preserved").
    pub fn iter(&self) -> impl Iterator<Item = &SignalDef> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct SignalGroupTable {
    defs: HashMap<String, SignalGroupDef>,
    order: Vec<String>,
    flat: HashMap<String, Vec<String>>,
}

impl SignalGroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: SignalGroupDef) -> Result<(), StilError> {
        if self.defs.contains_key(&def.name) {
            return Err(StilError::MalformedSymbolTable {
                message: format!("signal group '{}' declared more than once", def.name),
            });
        }
        self.order.push(def.name.clone());
        self.defs.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Flatten every declared group to its ordered leaf-signal list,
    /// rejecting cycles (spec.md #3: "Cycles among groups fail with
    /// MalformedSymbolTable"). Must be called once, after all
    /// `SignalGroups` entries are inserted and before `resolve` is
    /// used; the spec's "resolved at first use, memoized" is
    /// implemented here as "resolved once for all groups up front,"
    /// which produces the same flat lists with no difference
    /// observable from the lowering engine.
    pub fn finalize(&mut self) -> Result<(), StilError> {
        let names: Vec<String> = self.order.clone();
        for name in names {
            if !self.flat.contains_key(&name) {
                let mut visiting = HashSet::new();
                let flat = resolve_group(&name, &self.defs, &mut self.flat, &mut visiting)?;
                self.flat.insert(name, flat);
            }
        }
        Ok(())
    }

    /// The flat, ordered leaf-signal list for a group name, or `None`
    /// if `name` is not a declared group (the caller should then try
    /// it as a plain signal name).
    pub fn resolve(&self, name: &str) -> Option<&[String]> {
        self.flat.get(name).map(|v| v.as_slice())
    }

    /// Declaration order of every `SignalGroups` entry, for the GASC
    /// emitter's header section (spec.md #4.5/#8's round-trip
    /// property).
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// A group's raw, unflattened member list as declared -- the form
    /// a re-parse of the GASC header must reproduce, as opposed to
    /// `resolve`'s fully flattened leaf-signal list.
    pub fn members_of(&self, name: &str) -> Option<&[String]> {
        self.defs.get(name).map(|def| def.members.as_slice())
    }
}

fn resolve_group(
    name: &str,
    defs: &HashMap<String, SignalGroupDef>,
    flat: &mut HashMap<String, Vec<String>>,
    visiting: &mut HashSet<String>,
) -> Result<Vec<String>, StilError> {
    if let Some(cached) = flat.get(name) {
        return Ok(cached.clone());
    }
    let def = match defs.get(name) {
        Some(def) => def,
        None => return Ok(Vec::new()),
    };
    if !visiting.insert(name.to_string()) {
        return Err(StilError::MalformedSymbolTable {
            message: format!("signal group '{}' is part of a reference cycle", name),
        });
    }
    let mut out = Vec::new();
    for member in &def.members {
        if defs.contains_key(member) {
            out.extend(resolve_group(member, defs, flat, visiting)?);
        } else {
            out.push(member.clone());
        }
    }
    visiting.remove(name);
    flat.insert(name.to_string(), out.clone());
    Ok(out)
}

#[derive(Debug, Default)]
pub struct WaveformTableTable {
    order: Vec<String>,
    defs: HashMap<String, WaveformTableDef>,
}

impl WaveformTableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: WaveformTableDef) -> Result<(), StilError> {
        if self.defs.contains_key(&def.name) {
            return Err(StilError::MalformedSymbolTable {
                message: format!("waveform table '{}' declared more than once", def.name),
            });
        }
        self.order.push(def.name.clone());
        self.defs.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WaveformTableDef> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Declaration order, used for the VCT header's WFT summary.
    pub fn iter(&self) -> impl Iterator<Item = &WaveformTableDef> {
        self.order.iter().map(move |n| &self.defs[n])
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }
}

impl WaveformTableDef {
    /// Apply this table's `raw_wfc -> driven_wfc` mapping for one
    /// signal. Unmapped signals or unmapped input characters pass
    /// through unchanged (spec.md #3: "deterministic and total ...
    /// unknown inputs pass through unchanged").
    pub fn drive(&self, signal: &str, raw: Wfc) -> Wfc {
        self.mapping
            .get(signal)
            .and_then(|m| m.get(&raw))
            .copied()
            .unwrap_or(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CallableKind {
    Procedure,
    Macro,
}

#[derive(Debug, Default)]
pub struct CallableTable {
    procedures: HashMap<String, CallableDef>,
    macros: HashMap<String, CallableDef>,
}

impl CallableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_procedure(&mut self, def: CallableDef) -> Result<(), StilError> {
        if self.procedures.contains_key(&def.name) {
            return Err(StilError::MalformedSymbolTable {
                message: format!("procedure '{}' declared more than once", def.name),
            });
        }
        self.procedures.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn insert_macro(&mut self, def: CallableDef) -> Result<(), StilError> {
        if self.macros.contains_key(&def.name) {
            return Err(StilError::MalformedSymbolTable {
                message: format!("macro '{}' declared more than once", def.name),
            });
        }
        self.macros.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn procedure(&self, name: &str) -> Option<&CallableDef> {
        self.procedures.get(name)
    }

    pub fn macro_def(&self, name: &str) -> Option<&CallableDef> {
        self.macros.get(name)
    }

    /// Reject recursive `Procedures`/`MacroDefs` references, direct or
    /// indirect through `Call`/`Macro` statements nested anywhere in a
    /// body (spec.md #3/#9: "refuses them at symbol-table build time
    /// by a DFS with a visiting set, so the lowering stage sees only a
    /// DAG and can inline without guarding against cycles").
    pub fn check_acyclic(&self) -> Result<(), StilError> {
        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        for name in self.procedures.keys() {
            self.dfs((CallableKind::Procedure, name.clone()), &mut visiting, &mut done)?;
        }
        for name in self.macros.keys() {
            self.dfs((CallableKind::Macro, name.clone()), &mut visiting, &mut done)?;
        }
        Ok(())
    }

    fn dfs(
        &self,
        node: (CallableKind, String),
        visiting: &mut HashSet<(CallableKind, String)>,
        done: &mut HashSet<(CallableKind, String)>,
    ) -> Result<(), StilError> {
        if done.contains(&node) {
            return Ok(());
        }
        if !visiting.insert(node.clone()) {
            let (kind, name) = &node;
            let kind_name = match kind {
                CallableKind::Procedure => "procedure",
                CallableKind::Macro => "macro",
            };
            return Err(StilError::MalformedSymbolTable {
                message: format!("{} '{}' is part of a recursive call cycle", kind_name, name),
            });
        }
        let body = match node.0 {
            CallableKind::Procedure => self.procedures.get(&node.1).map(|d| &d.body),
            CallableKind::Macro => self.macros.get(&node.1).map(|d| &d.body),
        };
        if let Some(body) = body {
            let mut callees = Vec::new();
            collect_callees(body, &mut callees);
            for callee in callees {
                self.dfs(callee, visiting, done)?;
            }
        }
        visiting.remove(&node);
        done.insert(node);
        Ok(())
    }
}

fn collect_callees(stmts: &[Statement], out: &mut Vec<(CallableKind, String)>) {
    for stmt in stmts {
        match &stmt.kind {
            StatementKind::Call(name) => out.push((CallableKind::Procedure, name.clone())),
            StatementKind::Macro(name) => out.push((CallableKind::Macro, name.clone())),
            StatementKind::Loop { body, .. } | StatementKind::MatchLoop { body, .. } => {
                collect_callees(body, out)
            }
            _ => {}
        }
    }
}
