//! Per-run orchestration
//!
//! The driver owns the outer loop: build an engine, instantiate the
//! checkers, parse every input file, then walk file by file in command
//! line order and function by function in declaration order. Summaries
//! flush to the database after each function, so later functions see
//! earlier ones' facts. Under `--two-pass` the whole walk runs twice:
//! the first pass only populates the database (diagnostics are
//! collected but not printed), the second re-walks with summaries and
//! caller info available.

use crate::ast::{TopLevel, TranslationUnit};
use crate::checks;
use crate::db::{FactDb, FnKey};
use crate::engine::{Config, Engine, FnCtx};
use crate::flow;
use crate::hooks::Event;
use crate::parser;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Build an engine with the full checker set registered and, when
/// configured, the persisted database loaded.
pub fn build_engine(cfg: Config) -> Result<Engine, String> {
    let mut eng = Engine::new(cfg);
    checks::register_all(&mut eng);
    if let Some(path) = eng.cfg.db_file.clone()
        && path.exists()
    {
        eng.db = FactDb::load(&path)?;
        // A pre-existing database means cross-function facts are
        // usable from the first pass.
        eng.use_caller_info = true;
    }
    Ok(eng)
}

/// Analyze a set of files. Returns the engine so callers can inspect
/// diagnostics; fatal setup errors (unreadable file lists, broken
/// database) come back as `Err`.
pub fn analyze_files(cfg: Config, files: &[PathBuf]) -> Result<Engine, String> {
    let mut eng = build_engine(cfg)?;

    let mut units = Vec::new();
    for path in files {
        let source = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{}: cannot read: {}", path.display(), e);
                continue;
            }
        };
        match parser::parse_source(&path.to_string_lossy(), &source) {
            Ok(tu) => units.push(tu),
            Err(e) => {
                eprintln!("{}: parse error: {}", path.display(), e);
            }
        }
    }

    run_passes(&mut eng, &units);

    if let Some(path) = eng.cfg.db_file.clone() {
        eng.db.save(&path)?;
    }
    Ok(eng)
}

/// Analyze one in-memory source. The test suites drive everything
/// through this.
pub fn analyze_source(cfg: Config, file: &str, source: &str) -> Result<Engine, String> {
    let mut eng = build_engine(cfg)?;
    let tu = parser::parse_source(file, source)?;
    run_passes(&mut eng, &[tu]);
    Ok(eng)
}

fn run_passes(eng: &mut Engine, units: &[TranslationUnit]) {
    let passes = if eng.cfg.two_pass { 2 } else { 1 };
    let preloaded_db = eng.use_caller_info;

    for pass in 0..passes {
        info!(pass, "starting analysis pass");
        eng.quiet = eng.cfg.two_pass && pass == 0;
        eng.use_caller_info = pass > 0 || preloaded_db;
        if pass > 0 {
            eng.diagnostics.clear();
        }

        for tu in units {
            walk_unit(eng, tu);
            if eng.oom_hit {
                return;
            }
        }
    }
    eng.quiet = false;
}

fn walk_unit(eng: &mut Engine, tu: &TranslationUnit) {
    // Recoverable parse problems: the affected functions are absent
    // from the unit; everything else proceeds.
    for issue in &tu.issues {
        if !eng.quiet {
            eprintln!("{}: parse error: {}", issue.pos, issue.message);
        }
    }

    // Give Base and EndFile hooks a context to look at.
    eng.fx = FnCtx {
        symbols: tu.symbols.clone(),
        file: tu.file.clone(),
        ..FnCtx::default()
    };

    for toplevel in &tu.toplevels {
        match toplevel {
            TopLevel::Decl(decl) => {
                eng.fx.line = decl.pos.line;
                eng.dispatch(&Event::Base(decl));
            }
            TopLevel::Func(f) => {
                // A re-walk (second pass, reloaded database) replaces
                // this function's summary rather than stacking a
                // duplicate.
                eng.db.forget_function(&FnKey::new(&tu.file, &f.name, f.is_static));
                flow::walk_function(eng, tu, f);
                eng.db.commit();
                if eng.oom_hit {
                    return;
                }
                eng.fx = FnCtx {
                    symbols: tu.symbols.clone(),
                    file: tu.file.clone(),
                    ..FnCtx::default()
                };
            }
        }
    }

    eng.dispatch(&Event::EndFile);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Engine {
        let cfg = Config::default();
        let mut eng = analyze_source(cfg, "test.c", src).unwrap();
        eng.quiet = true;
        eng
    }

    #[test]
    fn test_clean_function_has_no_diagnostics() {
        let eng = run("int add(int a, int b) { return a + b; }");
        assert!(eng.diagnostics.is_empty(), "{:?}", eng.diagnostics);
    }

    #[test]
    fn test_functions_walked_in_order() {
        // Summaries from the first function are visible in the second.
        let src = "\
            void my_free(void *p) { free(p); }\n\
            void victim(char *q) { my_free(q); my_free(q); }\n";
        let eng = run(src);
        assert!(
            eng.diagnostics
                .iter()
                .any(|d| d.message.contains("double free of 'q'")),
            "{:?}",
            eng.diagnostics
        );
    }
}
