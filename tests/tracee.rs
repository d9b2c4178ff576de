use srcdbg::breakpoint::Breakpoint;
use srcdbg::consts::INT3_BYTE;
use srcdbg::errors::DebuggerError;
use srcdbg::tracee::{StopStatus, Tracee, TraceeState};

const TRUE: &str = "/bin/true";

fn launch_true() -> Option<Tracee> {
    match Tracee::launch(TRUE) {
        Ok(tracee) => Some(tracee),
        Err(e) => {
            eprintln!("skipping, cannot trace {TRUE}: {e}");
            None
        }
    }
}

#[test]
fn test_breakpoint_install_and_remove_restores_code() {
    let Some(tracee) = launch_true() else {
        return;
    };
    let pc = tracee.get_pc().unwrap();
    let original = tracee.read_byte(pc).unwrap();

    let bp = Breakpoint::install(&tracee, pc).unwrap();
    assert_eq!(bp.saved_data(), original);
    assert_eq!(tracee.read_byte(pc).unwrap(), INT3_BYTE);

    bp.remove(&tracee).unwrap();
    assert_eq!(tracee.read_byte(pc).unwrap(), original);
}

#[test]
fn test_write_byte_leaves_neighbours_alone() {
    let Some(tracee) = launch_true() else {
        return;
    };
    let pc = tracee.get_pc().unwrap();
    let before: Vec<u8> = (0..8).map(|i| tracee.read_byte(pc + i).unwrap()).collect();

    tracee.write_byte(pc + 3, 0x90).unwrap();
    for (i, byte) in before.iter().enumerate() {
        let now = tracee.read_byte(pc + i).unwrap();
        if i == 3 {
            assert_eq!(now, 0x90);
        } else {
            assert_eq!(now, *byte, "byte {i} changed");
        }
    }
    tracee.write_byte(pc + 3, before[3]).unwrap();
}

#[test]
fn test_run_to_exit() {
    let Some(mut tracee) = launch_true() else {
        return;
    };
    assert_eq!(tracee.cont().unwrap(), StopStatus::Exited(0));
    assert_eq!(tracee.state(), TraceeState::Exited(0));
    assert!(!tracee.is_alive());
    assert!(matches!(tracee.get_pc(), Err(DebuggerError::ProcessExited)));
    assert!(matches!(tracee.cont(), Err(DebuggerError::ProcessExited)));
    // killing what is already gone is fine
    tracee.kill().unwrap();
}

#[test]
fn test_single_step_moves_the_pc() {
    let Some(mut tracee) = launch_true() else {
        return;
    };
    let before = tracee.get_pc().unwrap();
    let status = tracee.single_step().unwrap();
    assert!(status.is_sigtrap());
    assert_ne!(tracee.get_pc().unwrap(), before);
}

#[test]
fn test_kill() {
    let Some(mut tracee) = launch_true() else {
        return;
    };
    tracee.kill().unwrap();
    assert!(!tracee.is_alive());
    assert_eq!(
        tracee.state(),
        TraceeState::Signaled(nix::sys::signal::Signal::SIGKILL)
    );
}
