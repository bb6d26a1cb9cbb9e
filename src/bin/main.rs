use std::{process, sync::Arc};

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use sockexec::{
    cli::{Cli, parse_args},
    error::{EXIT_SETUP_FAILURE, SockexecError},
    lock::LockSocket,
    privilege,
    runtime::{self, ServiceName},
    supervisor::{self, ShutdownSignal},
};

fn main() {
    let args = parse_args();
    init_logging(&args);

    let shutdown = Arc::new(ShutdownSignal::new());
    if let Err(err) = register_signal_handler(Arc::clone(&shutdown)) {
        eprintln!("sockexec: Cannot install signal handler: {err}");
        process::exit(EXIT_SETUP_FAILURE);
    }

    let code = match run(&args, &shutdown) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("sockexec: {err}");
            err.exit_code()
        }
    };

    process::exit(code);
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Everything between setup and exit. The lock lives in this scope, so it is
/// released before `main` calls `process::exit`, whichever step fails.
fn run(args: &Cli, shutdown: &ShutdownSignal) -> Result<i32, SockexecError> {
    if !args.keep_privileges {
        privilege::drop_privileges(args.uid, args.gid)?;
    }

    let name = ServiceName::from_env()?;
    let path = runtime::resolve(&args.socket_dir, &name)?;

    let mut lock = match LockSocket::acquire(&path) {
        Ok(lock) => lock,
        Err(SockexecError::AlreadyRunning { path }) if args.allow_running => {
            warn!(
                "Service '{name}' already running at {}; not starting a duplicate",
                path.display()
            );
            return Ok(0);
        }
        Err(err) => return Err(err),
    };
    lock.serve_probes()?;

    let exit = supervisor::run_child(&args.command, shutdown)?;
    debug!(
        "Child finished with {exit}; {} probe(s) served",
        lock.probes_served()
    );

    lock.release();
    Ok(exit.exit_code())
}

fn register_signal_handler(shutdown: Arc<ShutdownSignal>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        debug!("Termination signal received");
        shutdown.request();
    })
}
