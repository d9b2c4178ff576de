use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;

use srcdbg::breakpoint::run_to_line;
use srcdbg::debugger::{Debugger, SessionState};
use srcdbg::errors::{DebuggerError, Result};
use srcdbg::feedback::Feedback;
use srcdbg::symbols::{SourceLocation, SymbolTable};
use srcdbg::tracee::Tracee;
use srcdbg::ui::{DebuggerUI, Location, Status};

const LOOP: &str = r#"#include <stdio.h>

int main(void) {
    int total = 0;
    for (int i = 0; i < 3; i++) {
        total += 1;
    }
    printf("%d\n", total);
    return 0;
}
"#;

/// `unused` is thrown away by the linker, its line table rows stay behind
const WITH_UNUSED: &str = r#"#include <stdio.h>

int main(void) {
    int x = 1;
    printf("%d\n", x);
    return 0;
}

int unused(int a) {
    return a * 2;
}
"#;

const PROGRAM: &str = r#"#include <stdio.h>

static int add(int a, int b) {
    return a + b;
}

int main(void) {
    int x = 1;
    int y = add(x, 2);
    printf("%d\n", y);
    return 0;
}
"#;

/// Plays a fixed list of commands and remembers everything it was shown
struct ScriptUi {
    commands: VecDeque<Status>,
    shown: Vec<String>,
}

impl ScriptUi {
    fn new(commands: impl IntoIterator<Item = Status>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
            shown: Vec::new(),
        }
    }
}

impl DebuggerUI for ScriptUi {
    fn process(&mut self, feedback: Feedback) -> Result<Status> {
        self.shown.push(feedback.to_string());
        Ok(self.commands.pop_front().unwrap_or(Status::DebuggerQuit))
    }

    fn report(&mut self, feedback: &Feedback) -> Result<()> {
        self.shown.push(feedback.to_string());
        Ok(())
    }
}

/// Compiles `source` as `name`, `None` if there is no C compiler or tracing is not allowed
fn compile(dir: &Path, name: &str, source: &str, extra_flags: &[&str]) -> Option<PathBuf> {
    if which::which("cc").is_err() {
        eprintln!("skipping, no C compiler");
        return None;
    }
    if let Err(e) = Tracee::launch("/bin/true") {
        eprintln!("skipping, cannot trace: {e}");
        return None;
    }

    let source_path = dir.join(format!("{name}.c"));
    let exe = dir.join(name);
    std::fs::write(&source_path, source).unwrap();
    let status = Command::new("cc")
        .args(["-g", "-O0", "-no-pie"])
        .args(extra_flags)
        .arg("-o")
        .arg(&exe)
        .arg(&source_path)
        .status()
        .ok()?;
    if !status.success() {
        eprintln!("skipping, could not compile {name}.c");
        return None;
    }
    Some(exe)
}

fn build_program(dir: &Path) -> Option<PathBuf> {
    compile(dir, "prog", PROGRAM, &[])
}

fn cursor_line(shown: &str) -> Option<usize> {
    shown
        .lines()
        .find_map(|l| l.strip_prefix("> "))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}

#[test]
fn test_starts_at_main() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build_program(dir.path()) else {
        return;
    };

    let mut debugger = Debugger::build(&exe, ScriptUi::new(Vec::<Status>::new()));
    let feedback = debugger.launch_debuggee().unwrap();
    assert_eq!(debugger.state(), SessionState::AtCursor);
    let cursor = debugger.cursor().unwrap();
    assert!(cursor.file.ends_with("prog.c"));
    assert_eq!(cursor.line, 7);
    assert_eq!(cursor_line(&feedback.to_string()), Some(7));

    debugger.dispatch(Status::DebuggerQuit).unwrap();
    assert_eq!(debugger.state(), SessionState::Terminated);
}

#[test]
fn test_break_continue_next_and_exit() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build_program(dir.path()) else {
        return;
    };

    let ui = ScriptUi::new([
        Status::SetBreakpoint(Location::FileLine("prog.c".to_string(), 9)),
        Status::Breakpoints,
        Status::Continue,
        Status::StepLine,
        Status::Continue,
    ]);
    let mut debugger = Debugger::build(&exe, ui);
    debugger.run_debugger().unwrap();
    assert_eq!(debugger.state(), SessionState::Exited);

    let shown = debugger.into_ui().shown;
    assert_eq!(shown.len(), 6, "{shown:#?}");
    assert_eq!(cursor_line(&shown[0]), Some(7));
    assert!(shown[1].contains("* 9 "), "{}", shown[1]);
    assert!(shown[2].ends_with("prog.c: 9"), "{}", shown[2]);
    assert_eq!(cursor_line(&shown[3]), Some(9));
    assert_eq!(cursor_line(&shown[4]), Some(10));
    assert_eq!(shown[5], "debuggee exited with status 0");
}

#[test]
fn test_function_breakpoint_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build_program(dir.path()) else {
        return;
    };

    let ui = ScriptUi::new([
        Status::SetBreakpoint(Location::Function("add".to_string())),
        Status::Continue,
        Status::DelBreakpoint(Location::Function("add".to_string())),
        Status::Breakpoints,
        Status::DelBreakpoint(Location::Line(3)),
    ]);
    let mut debugger = Debugger::build(&exe, ui);
    debugger.run_debugger().unwrap();
    assert_eq!(debugger.state(), SessionState::Terminated);

    let shown = debugger.into_ui().shown;
    assert_eq!(shown.len(), 6, "{shown:#?}");
    assert!(shown[1].contains("* 3 "), "{}", shown[1]);
    assert_eq!(cursor_line(&shown[2]), Some(3));
    assert_eq!(shown[4], "no breakpoints");
    assert!(shown[5].starts_with("no breakpoint at "), "{}", shown[5]);
}

#[test]
fn test_recoverable_errors_keep_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build_program(dir.path()) else {
        return;
    };

    let ui = ScriptUi::new([
        Status::SetBreakpoint(Location::FileLine("nope.c".to_string(), 1)),
        Status::SetBreakpoint(Location::Line(2)),
        Status::SetBreakpoint(Location::Function("no_such_function".to_string())),
        Status::Listing(Some(4)),
    ]);
    let mut debugger = Debugger::build(&exe, ui);
    debugger.run_debugger().unwrap();
    assert_eq!(debugger.state(), SessionState::Terminated);

    let shown = debugger.into_ui().shown;
    assert_eq!(shown.len(), 5, "{shown:#?}");
    assert!(shown[1].starts_with("Error: No source file named nope.c"), "{}", shown[1]);
    assert!(shown[2].starts_with("Error: No code for"), "{}", shown[2]);
    assert!(shown[3].starts_with("Error: No function named"), "{}", shown[3]);
    assert!(shown[4].contains("  4 "), "{}", shown[4]);
    assert!(shown[4].contains("> 7 "), "{}", shown[4]);
}

#[test]
fn test_breakpoint_in_loop_hits_every_pass() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = compile(dir.path(), "loop", LOOP, &[]) else {
        return;
    };

    let ui = ScriptUi::new([
        Status::SetBreakpoint(Location::Line(6)),
        Status::Continue,
        Status::Continue,
        Status::Continue,
        Status::Continue,
    ]);
    let mut debugger = Debugger::build(&exe, ui);
    debugger.run_debugger().unwrap();
    assert_eq!(debugger.state(), SessionState::Exited);

    let shown = debugger.into_ui().shown;
    assert_eq!(shown.len(), 6, "{shown:#?}");
    assert_eq!(cursor_line(&shown[0]), Some(3));
    for pass in &shown[2..5] {
        assert_eq!(cursor_line(pass), Some(6), "{pass}");
    }
    assert_eq!(shown[5], "debuggee exited with status 0");
}

#[test]
fn test_run_to_line_stops_at_the_line_address() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build_program(dir.path()) else {
        return;
    };

    let symbols = SymbolTable::load(&exe).unwrap();
    assert!(!symbols.is_position_independent());
    let file = symbols.resolve_file("prog.c").unwrap().to_owned();
    let mut tracee = Tracee::launch(&exe).unwrap();

    for line in [8, 9, 11] {
        let run = run_to_line(&mut tracee, &symbols, &file, line).unwrap();
        assert!(run.reached, "line {line}: {run:?}");
        let pc = tracee.get_pc().unwrap();
        assert_eq!(pc, run.addr);
        assert_eq!(pc, symbols.line_to_pc(&file, line).unwrap());
        assert_eq!(symbols.pc_to_line(pc), Some(SourceLocation::new(&file, line)));
    }
    tracee.kill().unwrap();
}

#[test]
fn test_code_removed_by_the_linker_is_not_a_location() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = compile(
        dir.path(),
        "gc",
        WITH_UNUSED,
        &["-ffunction-sections", "-Wl,--gc-sections"],
    ) else {
        return;
    };

    let ui = ScriptUi::new([
        Status::SetBreakpoint(Location::Line(10)),
        Status::StepLine,
        Status::StepLine,
        Status::StepLine,
        Status::StepLine,
        Status::StepLine,
        Status::Continue,
    ]);
    let mut debugger = Debugger::build(&exe, ui);
    debugger.run_debugger().unwrap();
    assert_eq!(debugger.state(), SessionState::Exited);

    let shown = debugger.into_ui().shown;
    assert_eq!(shown.len(), 8, "{shown:#?}");
    assert!(shown[1].starts_with("Error: No code for"), "{}", shown[1]);
    let lines: Vec<Option<usize>> = shown[2..6].iter().map(|s| cursor_line(s)).collect();
    assert_eq!(lines, vec![Some(4), Some(5), Some(6), Some(7)]);
    assert!(shown[6].starts_with("Error: No code for"), "{}", shown[6]);
    assert_eq!(shown[7], "debuggee exited with status 0");
}

#[test]
fn test_stop_without_source_forgets_the_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let Some(exe) = build_program(dir.path()) else {
        return;
    };

    let mut debugger = Debugger::build(&exe, ScriptUi::new(Vec::<Status>::new()));
    debugger.launch_debuggee().unwrap();
    debugger
        .dispatch(Status::SetBreakpoint(Location::Line(10)))
        .unwrap();
    debugger.dispatch(Status::Continue).unwrap();
    assert_eq!(debugger.cursor().map(|c| c.line), Some(10));

    // step into the call to printf, which has no line information
    let mut left_source = false;
    for _ in 0..32 {
        if let Feedback::NoSource(_) = debugger.dispatch(Status::StepSingle).unwrap() {
            left_source = true;
            break;
        }
        assert_eq!(debugger.cursor().map(|c| c.line), Some(10));
    }
    assert!(left_source);
    assert!(debugger.cursor().is_none());
    assert!(matches!(
        debugger.dispatch(Status::Listing(None)),
        Err(DebuggerError::CommandParse(_))
    ));

    debugger.dispatch(Status::DebuggerQuit).unwrap();
    assert_eq!(debugger.state(), SessionState::Terminated);
}
