#![cfg(target_os = "linux")]

use dollar_shell::Shell;
use serial_test::serial;

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").map(|dir| dir.count()).unwrap_or(0)
}

#[test]
#[serial]
fn builtin_pipelines_release_descriptors() -> anyhow::Result<()> {
    let shell = Shell::new();
    // Warm up lazily opened descriptors (log sinks, /dev/null).
    shell.cmd("echo warm | cat")?.run()?;
    let before = open_fds();
    for _ in 0..10_000 {
        let output = shell.cmd("echo hi | cat | cat")?.run()?;
        assert_eq!(output.stdout.as_bytes(), b"hi\n");
    }
    let after = open_fds();
    assert!(after <= before + 4, "descriptors grew from {before} to {after}");
    Ok(())
}

#[test]
#[serial]
fn failed_invocations_release_descriptors() -> anyhow::Result<()> {
    let shell = Shell::new();
    shell.cmd("false | true")?.nothrow().run()?;
    let before = open_fds();
    for _ in 0..500 {
        let err = shell.cmd("echo x | no-such-program-9931")?.run().unwrap_err();
        assert!(err.spawn_kind().is_some());
        let err = shell.cmd("echo x > /no/such/dir/file")?.run().unwrap_err();
        assert!(err.spawn_kind().is_some());
    }
    let after = open_fds();
    assert!(after <= before + 4, "descriptors grew from {before} to {after}");
    Ok(())
}

#[test]
#[serial]
fn external_pipelines_release_descriptors() -> anyhow::Result<()> {
    let shell = Shell::new();
    shell.cmd("printf warm | /bin/cat")?.run()?;
    let before = open_fds();
    for _ in 0..1_000 {
        let output = shell.cmd("printf hi | /bin/cat | cat")?.run()?;
        assert_eq!(output.stdout.as_bytes(), b"hi");
        let output = shell.cmd("/bin/cat")?.stdin("fed").run()?;
        assert_eq!(output.stdout.as_bytes(), b"fed");
    }
    let after = open_fds();
    assert!(after <= before + 4, "descriptors grew from {before} to {after}");
    Ok(())
}
