//! Cross-function analysis: summaries, two-pass mode, database
//! persistence, and resource limits.

use sift::engine::Config;
use sift::{Engine, analyze_files, analyze_source};
use std::fs;

fn has_message(eng: &Engine, needle: &str) -> bool {
    eng.diagnostics.iter().any(|d| d.message.contains(needle))
}

#[test]
fn test_callee_after_caller_needs_two_passes() {
    // helper() is defined after its caller; one pass walks caller()
    // before any summary for helper() exists.
    let src = "\
void caller(char *q)
{
        helper(q);
        *q = 1;
}

void helper(char *p)
{
        free(p);
}
";
    let one_pass = analyze_source(Config::default(), "t.c", src).unwrap();
    assert!(
        !has_message(&one_pass, "dereferencing freed memory"),
        "{:?}",
        one_pass.diagnostics
    );

    let cfg = Config { two_pass: true, ..Config::default() };
    let two_pass = analyze_source(cfg, "t.c", src).unwrap();
    assert!(
        has_message(&two_pass, "dereferencing freed memory 'q'"),
        "{:?}",
        two_pass.diagnostics
    );
}

#[test]
fn test_caller_ranges_reach_callee_on_second_pass() {
    // The call site passes 7; with caller info seeded, the callee's
    // index is out of bounds.
    let src = "\
int a[4];

int get(int i)
{
        return a[i];
}

int use(void)
{
        return get(7);
}
";
    let one_pass = analyze_source(Config::default(), "t.c", src).unwrap();
    assert!(!has_message(&one_pass, "buffer overflow"), "{:?}", one_pass.diagnostics);

    let cfg = Config { two_pass: true, ..Config::default() };
    let two_pass = analyze_source(cfg, "t.c", src).unwrap();
    assert!(
        has_message(&two_pass, "buffer overflow 'a' 4 <= 7"),
        "{:?}",
        two_pass.diagnostics
    );
}

#[test]
fn test_no_db_disables_summaries() {
    let src = "\
void helper(char *p)
{
        free(p);
}

void caller(char *q)
{
        helper(q);
        *q = 1;
}
";
    // With the database on, declaration order alone is enough.
    let with_db = analyze_source(Config::default(), "t.c", src).unwrap();
    assert!(has_message(&with_db, "dereferencing freed memory 'q'"));

    let cfg = Config { no_db: true, ..Config::default() };
    let without = analyze_source(cfg, "t.c", src).unwrap();
    assert!(
        !has_message(&without, "dereferencing freed memory"),
        "{:?}",
        without.diagnostics
    );
}

#[test]
fn test_summary_output_is_deterministic() {
    let src = "\
void helper(char *p)
{
        free(p);
}

int pick(int n)
{
        if (n > 4)
                return 1;
        return 0;
}
";
    let run = || {
        let eng = analyze_source(Config::default(), "t.c", src).unwrap();
        eng.db.to_json().unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_db_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let src_path = dir.path().join("input.c");
    let db_path = dir.path().join("facts.json");
    fs::write(
        &src_path,
        "void helper(char *p)\n{\n        free(p);\n}\n",
    )
    .unwrap();

    let cfg = Config { db_file: Some(db_path.clone()), ..Config::default() };
    let first = analyze_files(cfg.clone(), &[src_path.clone()]).unwrap();
    assert!(db_path.exists());
    let first_json = first.db.to_json().unwrap();
    assert!(first_json.contains("helper"));

    // A second invocation loads the store and leaves it stable.
    let second = analyze_files(cfg, &[src_path]).unwrap();
    assert_eq!(second.db.to_json().unwrap(), first_json);
}

#[test]
fn test_db_file_enables_cross_run_facts() {
    let dir = tempfile::tempdir().unwrap();
    let helper_c = dir.path().join("helper.c");
    let caller_c = dir.path().join("caller.c");
    let db_path = dir.path().join("facts.json");
    fs::write(&helper_c, "void helper(char *p)\n{\n        free(p);\n}\n").unwrap();
    fs::write(
        &caller_c,
        "void helper(char *p);\nvoid caller(char *q)\n{\n        helper(q);\n        *q = 1;\n}\n",
    )
    .unwrap();

    let cfg = Config { db_file: Some(db_path), ..Config::default() };
    analyze_files(cfg.clone(), std::slice::from_ref(&helper_c)).unwrap();
    let eng = analyze_files(cfg, std::slice::from_ref(&caller_c)).unwrap();
    assert!(
        has_message(&eng, "dereferencing freed memory 'q'"),
        "{:?}",
        eng.diagnostics
    );
}

#[test]
fn test_oom_budget_aborts_with_one_diagnostic() {
    // Any real process is bigger than 1 kb.
    let src = "\
int f(int a)
{
        a = a + 1;
        a = a + 2;
        a = a + 3;
        return a;
}
";
    let cfg = Config { oom_kb: Some(1), ..Config::default() };
    let eng = analyze_source(cfg, "t.c", src).unwrap();
    if !cfg!(target_os = "linux") {
        // No VmSize probe off Linux; the budget check disables itself.
        return;
    }
    assert!(eng.oom_hit);
    let oom_msgs: Vec<_> = eng
        .diagnostics
        .iter()
        .filter(|d| d.message.contains("out of memory"))
        .collect();
    assert_eq!(oom_msgs.len(), 1, "{:?}", eng.diagnostics);
}

#[test]
fn test_parse_error_aborts_only_that_function() {
    let src = "\
int broken(void)
{
        return 1 +;
}

void fine(char *p)
{
        free(p);
        *p = 1;
}
";
    let eng = analyze_source(Config::default(), "t.c", src).unwrap();
    // The broken function is skipped; the rest still analyzes.
    assert!(
        has_message(&eng, "dereferencing freed memory 'p'"),
        "{:?}",
        eng.diagnostics
    );
}
