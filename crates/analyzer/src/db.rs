//! Cross-function fact database
//!
//! Four logical tables connect function walks to each other:
//!
//! - `return_states`: facts asserted when a function returns with a
//!   value in a given range (*"returns freed($0)"*, *"returns locked"*)
//! - `caller_info`: facts call sites push into a callee's initial state
//! - `return_implies`: conditional facts a call site activates when the
//!   concrete return value lands in a range
//! - `function_ptr`: struct-member to function-name bindings, used to
//!   resolve calls through function pointers
//!
//! Tables are keyed by `(file, function, static?)` so static functions
//! from different files do not collide. Inserts go to a pending buffer
//! and become visible when the driver commits after the current function
//! walk; selects are pure and return rows in insertion order, which is
//! what makes two identical runs produce byte-identical stores.
//!
//! The on-disk form is JSON via serde, written when the driver was given
//! `--db-file`. Within one process the tables are the durable interface
//! between the two passes of `--two-pass`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Numeric catalog of fact types, stable across runs and stored in the
/// database as the raw number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FactTag {
    ParamSet = 1,
    ParamCleared = 2,
    Lock = 3,
    Unlock = 4,
    UserData = 5,
    Container = 6,
    NegativeError = 7,
    Fget = 8,
    ParamFreed = 9,
    MaybeFreed = 10,
}

impl From<FactTag> for u32 {
    fn from(tag: FactTag) -> u32 {
        tag as u32
    }
}

impl TryFrom<u32> for FactTag {
    type Error = String;

    fn try_from(v: u32) -> Result<FactTag, String> {
        Ok(match v {
            1 => FactTag::ParamSet,
            2 => FactTag::ParamCleared,
            3 => FactTag::Lock,
            4 => FactTag::Unlock,
            5 => FactTag::UserData,
            6 => FactTag::Container,
            7 => FactTag::NegativeError,
            8 => FactTag::Fget,
            9 => FactTag::ParamFreed,
            10 => FactTag::MaybeFreed,
            other => return Err(format!("unknown fact tag {}", other)),
        })
    }
}

impl fmt::Display for FactTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

/// Identity of a function in the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FnKey {
    pub file: String,
    pub function: String,
    pub is_static: bool,
}

impl FnKey {
    pub fn new(file: &str, function: &str, is_static: bool) -> FnKey {
        FnKey { file: file.to_string(), function: function.to_string(), is_static }
    }

    /// Can a call in `caller_file` reach this function?
    fn visible_from(&self, caller_file: &str) -> bool {
        !self.is_static || self.file == caller_file
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStateRow {
    pub return_id: u32,
    pub return_ranges: String,
    pub tag: FactTag,
    pub param: i32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerInfoRow {
    pub call_id: u32,
    pub tag: FactTag,
    pub param: i32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnImpliesRow {
    pub range_start: i64,
    pub range_end: i64,
    pub tag: FactTag,
    pub param: i32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionPtrRow {
    pub member_path: String,
    pub function: String,
}

/// The serialized portion of the database.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    return_states: Vec<(FnKey, ReturnStateRow)>,
    caller_info: Vec<(FnKey, CallerInfoRow)>,
    return_implies: Vec<(FnKey, ReturnImpliesRow)>,
    function_ptr: Vec<FunctionPtrRow>,
}

#[derive(Debug, Default)]
pub struct FactDb {
    tables: Tables,
    pending: Tables,
}

impl FactDb {
    pub fn new() -> FactDb {
        FactDb::default()
    }

    // ---- inserts (buffered until commit) ----

    pub fn insert_return_state(&mut self, func: FnKey, row: ReturnStateRow) {
        self.pending.return_states.push((func, row));
    }

    pub fn insert_caller_info(&mut self, func: FnKey, row: CallerInfoRow) {
        self.pending.caller_info.push((func, row));
    }

    pub fn insert_return_implies(&mut self, func: FnKey, row: ReturnImpliesRow) {
        self.pending.return_implies.push((func, row));
    }

    pub fn insert_function_ptr(&mut self, member_path: &str, function: &str) {
        self.pending.function_ptr.push(FunctionPtrRow {
            member_path: member_path.to_string(),
            function: function.to_string(),
        });
    }

    /// Publish everything inserted since the last commit. Called by the
    /// driver after each function walk; facts become visible to later
    /// functions, never to the one that produced them. Caller-info and
    /// function-pointer rows deduplicate so re-walks (second pass,
    /// reloaded database) keep the tables stable.
    pub fn commit(&mut self) {
        self.tables.return_states.append(&mut self.pending.return_states);
        for entry in self.pending.caller_info.drain(..) {
            if !self.tables.caller_info.contains(&entry) {
                self.tables.caller_info.push(entry);
            }
        }
        self.tables.return_implies.append(&mut self.pending.return_implies);
        for row in self.pending.function_ptr.drain(..) {
            if !self.tables.function_ptr.contains(&row) {
                self.tables.function_ptr.push(row);
            }
        }
    }

    /// Drop rows previously recorded for `func` so a re-walk (second
    /// pass, or the same function seen again) replaces its summary
    /// instead of accumulating duplicates.
    pub fn forget_function(&mut self, func: &FnKey) {
        self.tables.return_states.retain(|(k, _)| k != func);
        self.tables.return_implies.retain(|(k, _)| k != func);
    }

    // ---- selects (pure) ----

    pub fn select_return_states(&self, callee: &str, caller_file: &str) -> Vec<&ReturnStateRow> {
        self.tables
            .return_states
            .iter()
            .filter(|(k, _)| k.function == callee && k.visible_from(caller_file))
            .map(|(_, r)| r)
            .collect()
    }

    pub fn select_caller_info(&self, callee: &FnKey) -> Vec<&CallerInfoRow> {
        self.tables
            .caller_info
            .iter()
            .filter(|(k, _)| k == callee)
            .map(|(_, r)| r)
            .collect()
    }

    pub fn select_return_implies(&self, callee: &str, caller_file: &str) -> Vec<&ReturnImpliesRow> {
        self.tables
            .return_implies
            .iter()
            .filter(|(k, _)| k.function == callee && k.visible_from(caller_file))
            .map(|(_, r)| r)
            .collect()
    }

    pub fn lookup_function_ptr(&self, member_path: &str) -> Option<&str> {
        self.tables
            .function_ptr
            .iter()
            .find(|r| r.member_path == member_path)
            .map(|r| r.function.as_str())
    }

    pub fn has_summary(&self, callee: &str, caller_file: &str) -> bool {
        !self.select_return_states(callee, caller_file).is_empty()
    }

    // ---- persistence ----

    /// Serialize the committed tables. Deterministic: storage is
    /// insertion-ordered vectors, so identical runs produce identical
    /// bytes.
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(&self.tables)
            .map_err(|e| format!("failed to serialize fact database: {}", e))
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json = self.to_json()?;
        fs::write(path, json)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }

    pub fn load(path: &Path) -> Result<FactDb, String> {
        let json = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let tables: Tables = serde_json::from_str(&json)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
        Ok(FactDb { tables, pending: Tables::default() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tag: FactTag, param: i32) -> ReturnStateRow {
        ReturnStateRow {
            return_id: 1,
            return_ranges: "min-max".to_string(),
            tag,
            param,
            key: "$".to_string(),
            value: String::new(),
        }
    }

    #[test]
    fn test_pending_until_commit() {
        let mut db = FactDb::new();
        db.insert_return_state(FnKey::new("a.c", "release", false), row(FactTag::ParamFreed, 0));
        assert!(db.select_return_states("release", "a.c").is_empty());
        db.commit();
        assert_eq!(db.select_return_states("release", "a.c").len(), 1);
    }

    #[test]
    fn test_static_functions_keyed_by_file() {
        let mut db = FactDb::new();
        db.insert_return_state(FnKey::new("a.c", "helper", true), row(FactTag::Lock, 0));
        db.insert_return_state(FnKey::new("b.c", "helper", true), row(FactTag::Unlock, 0));
        db.commit();
        let rows = db.select_return_states("helper", "a.c");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tag, FactTag::Lock);
    }

    #[test]
    fn test_non_static_visible_everywhere() {
        let mut db = FactDb::new();
        db.insert_return_state(FnKey::new("a.c", "free_it", false), row(FactTag::ParamFreed, 0));
        db.commit();
        assert_eq!(db.select_return_states("free_it", "other.c").len(), 1);
    }

    #[test]
    fn test_forget_function_replaces_summary() {
        let mut db = FactDb::new();
        let key = FnKey::new("a.c", "f", false);
        db.insert_return_state(key.clone(), row(FactTag::Lock, 0));
        db.commit();
        db.forget_function(&key);
        db.insert_return_state(key.clone(), row(FactTag::Unlock, 0));
        db.commit();
        let rows = db.select_return_states("f", "a.c");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tag, FactTag::Unlock);
    }

    #[test]
    fn test_function_ptr_dedup() {
        let mut db = FactDb::new();
        db.insert_function_ptr("ops->open", "my_open");
        db.insert_function_ptr("ops->open", "my_open");
        db.commit();
        assert_eq!(db.lookup_function_ptr("ops->open"), Some("my_open"));
        assert_eq!(db.tables.function_ptr.len(), 1);
    }

    #[test]
    fn test_json_round_trip_and_determinism() {
        let mut db = FactDb::new();
        db.insert_return_state(FnKey::new("a.c", "f", false), row(FactTag::NegativeError, -1));
        db.insert_caller_info(
            FnKey::new("a.c", "g", false),
            CallerInfoRow {
                call_id: 0,
                tag: FactTag::UserData,
                param: 1,
                key: "$".to_string(),
                value: "min-max".to_string(),
            },
        );
        db.commit();
        let one = db.to_json().unwrap();
        let two = db.to_json().unwrap();
        assert_eq!(one, two);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        db.save(&path).unwrap();
        let back = FactDb::load(&path).unwrap();
        assert_eq!(back.to_json().unwrap(), one);
    }

    #[test]
    fn test_fact_tag_numeric_round_trip() {
        assert_eq!(u32::from(FactTag::ParamFreed), 9);
        assert_eq!(FactTag::try_from(3u32).unwrap(), FactTag::Lock);
        assert!(FactTag::try_from(99u32).is_err());
    }
}
