use std::env;
use std::fs;
use std::io::{self, Read};
use std::process;

use dollar_shell::{ErrorKind, OutputMode, Shell, ShellError, ShellTask, SpawnErrorKind};
use log::debug;

const USAGE: &str = "usage: dsh [--pipefail] [-c SCRIPT | FILE]";

enum Source {
    Inline(String),
    File(String),
    Stdin,
}

fn main() {
    init_logging();
    let mut pipefail = false;
    let mut source = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--pipefail" => pipefail = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                return;
            }
            "-c" => match args.next() {
                Some(script) => source = Some(Source::Inline(script)),
                None => {
                    eprintln!("dsh: -c requires an argument\n{USAGE}");
                    process::exit(2);
                }
            },
            _ if source.is_none() => source = Some(Source::File(arg)),
            _ => {
                eprintln!("dsh: unexpected argument '{arg}'\n{USAGE}");
                process::exit(2);
            }
        }
    }
    let source = source.unwrap_or(Source::Stdin);
    let reads_stdin = matches!(source, Source::Stdin);
    let script = match load_script(source) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("dsh: {err}");
            process::exit(2);
        }
    };
    process::exit(run_script(&script, pipefail, reads_stdin));
}

fn init_logging() {
    let env = env_logger::Env::default().filter_or("DSH_LOG", "warn");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

fn load_script(source: Source) -> io::Result<String> {
    match source {
        Source::Inline(script) => Ok(script),
        Source::File(path) => fs::read_to_string(path),
        Source::Stdin => {
            let mut script = String::new();
            io::stdin().read_to_string(&mut script)?;
            Ok(script)
        }
    }
}

fn run_script(script: &str, pipefail: bool, reads_stdin: bool) -> i32 {
    let promise = match Shell::new().pipefail(pipefail).cmd(script) {
        Ok(promise) => promise,
        Err(err) => {
            eprintln!("dsh: {}", err.display_with_input(script));
            return 2;
        }
    };
    let mut promise = promise.output(OutputMode::Inherit).nothrow();
    if !reads_stdin {
        promise = promise.inherit_stdin();
    }
    let task = promise.spawn();
    forward_signals(&task);
    match task.wait() {
        Ok(output) => output.exit_code,
        Err(err) => exit_status(&err),
    }
}

fn exit_status(err: &ShellError) -> i32 {
    match err.kind {
        ErrorKind::Cancelled => 130,
        ErrorKind::Spawn(SpawnErrorKind::ProgramNotFound) => {
            eprintln!("dsh: {}", err.display_simple());
            127
        }
        ErrorKind::Spawn(SpawnErrorKind::PermissionDenied) => {
            eprintln!("dsh: {}", err.display_simple());
            126
        }
        ErrorKind::NonZeroExit => err.exit_code().unwrap_or(1),
        _ => {
            eprintln!("dsh: {}", err.display_simple());
            1
        }
    }
}

#[cfg(unix)]
fn forward_signals(task: &ShellTask) {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            debug!("dsh event=signal-install-failed error={err}");
            return;
        }
    };
    let cancel = task.cancel_token();
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            debug!("dsh event=signal signal={signal}");
            cancel.cancel();
        }
    });
}

#[cfg(not(unix))]
fn forward_signals(_task: &ShellTask) {
    debug!("dsh event=signal-forwarding-unavailable");
}
