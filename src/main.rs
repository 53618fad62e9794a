use std::env;
use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use forksh::config::ENV_LOG;
use forksh::{Config, Dispatcher, ExitState, Outcome};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

/// Process exit status for `-c`: signal deaths follow the 128+N convention.
fn exit_status(outcome: &Outcome) -> i32 {
    let state = match outcome {
        Outcome::Foreground(state) => *state,
        Outcome::Pipeline { right, .. } => *right,
        Outcome::Background(_) => return 0,
    };
    match state {
        ExitState::Exited(code) => code,
        ExitState::Signaled(sig) => 128 + sig as i32,
        ExitState::Unknown => 1,
    }
}

fn run_script(sh: &mut Dispatcher, script: &str) -> i32 {
    let mut status = 0;
    for line in script.lines() {
        let argv = tokenize(line);
        if argv.is_empty() {
            continue;
        }
        status = match sh.run(&argv) {
            Ok(outcome) => exit_status(&outcome),
            Err(e) if e.is_fatal() => {
                eprintln!("forksh: {e}");
                return 1;
            }
            Err(e) => {
                eprintln!("forksh: {e}");
                1
            }
        };
        // Nobody reports background results in script mode.
        sh.sweep();
    }
    status
}

fn repl(sh: &mut Dispatcher) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    let prompt = sh.config().prompt.clone();
    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        for (pid, state) in sh.sweep() {
            if interactive {
                eprintln!("[{pid}] done ({})", state.code());
            }
        }
        if interactive {
            let mut out = io::stdout().lock();
            write!(out, "{prompt}")?;
            out.flush()?;
        }
        line.clear();
        if stdin.lock().read_line(&mut line).context("reading command line")? == 0 {
            break;
        }
        if !sh.dispatch(&tokenize(&line)) {
            break;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let mut args = env::args().skip(1);
    let mut script: Option<String> = None;
    while let Some(a) = args.next() {
        match a.as_str() {
            "-c" => { script = Some(args.next().ok_or_else(|| anyhow::anyhow!("missing script after -c"))?); }
            "-h" | "--help" => { eprintln!("usage: forksh-rs [-c <command line>]"); return Ok(()); }
            other => { eprintln!("unknown arg: {other}"); }
        }
    }

    let mut sh = Dispatcher::new(Config::from_env());
    sh.setup().context("installing signal policy")?;
    let code = match script {
        Some(s) => run_script(&mut sh, &s),
        None => { repl(&mut sh)?; 0 }
    };
    sh.teardown()?;
    std::process::exit(code);
}
