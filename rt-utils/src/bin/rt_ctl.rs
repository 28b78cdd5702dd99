use {
    agave_rt_utils::{RtConfig, RtControl},
    log::{error, info, warn},
    std::{env, process::exit},
};

fn usage() -> ! {
    error!("Usage: agave-rt-ctl [--config <FILE.json>] [--status]");
    exit(1);
}

fn log_status(control: &RtControl) {
    let cpus = match control.online_cpus() {
        Ok(cpus) => cpus,
        Err(e) => {
            error!("Failed to enumerate online CPUs: {e}");
            return;
        }
    };
    info!("Online CPUs: {cpus:?}");
    match control.isolated_cpus() {
        Ok(isolated) if !isolated.is_empty() => info!("Isolated CPUs: {isolated:?}"),
        Ok(_) => {}
        Err(e) => warn!("Failed to read isolated CPUs: {e}"),
    }

    let thread = control.current_thread();
    match control.thread_affinity(thread) {
        Ok(affinity) => info!("Thread affinity: {affinity:?}"),
        Err(e) => warn!("Failed to read thread affinity: {e}"),
    }
    match control.thread_priority(thread) {
        Ok(nice) => info!("Thread niceness: {nice}"),
        Err(e) => warn!("Failed to read thread niceness: {e}"),
    }
    match control.thread_rt_priority(thread) {
        Ok(priority) => info!(
            "Thread scheduling: {:?} priority {}",
            priority.policy, priority.priority
        ),
        Err(e) => warn!("Failed to read thread scheduling policy: {e}"),
    }
    match control.rt_throttling() {
        Ok(throttling) => match throttling.runtime_us {
            Some(runtime) => info!(
                "RT throttling: {runtime}us every {}us",
                throttling.period_us
            ),
            None => info!("RT throttling: disabled"),
        },
        Err(e) => warn!("Failed to read RT throttling: {e}"),
    }
    for cpu in cpus {
        info!("CPU {cpu} governor: {:?}", control.governor(cpu));
    }
}

fn main() {
    solana_logger::setup_with_default("info");
    let mut args = env::args().skip(1);
    let mut config_path = None;
    let mut status = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().unwrap_or_else(|| usage())),
            "--status" => status = true,
            "-h" | "--help" => usage(),
            _ => usage(),
        }
    }
    if config_path.is_none() && !status {
        usage();
    }

    let control = RtControl::system();
    if let Some(path) = config_path {
        let config = RtConfig::from_file(&path).unwrap_or_else(|e| {
            error!("Failed to load {path}: {e}");
            exit(1);
        });
        if let Err(e) = control.apply_config(&config) {
            error!("Failed to apply {path}: {e}");
            exit(1);
        }
        info!("Applied {path}");
    }
    if status {
        log_status(&control);
    }
}
