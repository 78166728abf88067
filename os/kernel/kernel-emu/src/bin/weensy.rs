//! Boot the kernel on the emulated machine and print the memory map when
//! it powers off.
//!
//! ```text
//! weensy [alloc|fork|forkexit] [-v|-q]
//! ```

use kernel::{Kernel, KernelConfig, Shutdown};
use kernel_emu::programs::Demo;
use kernel_emu::{EmuConfig, EmuError, EmuLogger, EmulatedCpu, PhysicalMemory, boot_images};
use log::{LevelFilter, error, info};
use std::process::ExitCode;
use std::{env, fmt};

fn main() -> ExitCode {
    // args: [program set] [-v | -q]
    let mut demo = Demo::Alloc;
    let mut level = LevelFilter::Info;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" => level = LevelFilter::Debug,
            "-q" => level = LevelFilter::Warn,
            name => match name.parse() {
                Ok(d) => demo = d,
                Err(e) => {
                    eprintln!("weensy: {e}");
                    return ExitCode::from(2);
                }
            },
        }
    }

    if EmuLogger::new(level).init().is_err() {
        eprintln!("weensy: logger already installed");
    }

    match run(demo) {
        Ok(kernel) => {
            print!("{}", MemoryReport(&kernel));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("PANIC: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(demo: Demo) -> Result<Kernel<PhysicalMemory>, EmuError> {
    info!("Booting program set {demo}");
    let mut kernel = boot_images(&demo.images()?, KernelConfig::default())?;
    let mut cpu = EmulatedCpu::new(EmuConfig::default());

    let Shutdown::PowerOff = kernel.run(&mut cpu)?;
    let stats = cpu.stats();
    info!(
        "{} instructions, {} traps, {} timer ticks, uptime {:?}",
        stats.instructions,
        stats.traps,
        stats.timer_ticks,
        kernel.uptime()
    );
    Ok(kernel)
}

/// Physical map, then the virtual map of the lowest live process.
struct MemoryReport<'k>(&'k Kernel<PhysicalMemory>);

impl fmt::Display for MemoryReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kernel = self.0;
        let usage = kernel.memory_usage();
        usage.render_physical(f)?;
        let first = kernel
            .processes()
            .live()
            .find_map(|p| p.space.map(|space| (p.pid, space)));
        if let Some((pid, space)) = first {
            writeln!(f)?;
            usage.render_virtual(kernel.mem(), space, pid, f)?;
        }
        Ok(())
    }
}
