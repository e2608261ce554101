// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod config;
mod dump;

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

use xe_gpu::engines::compute::{DispatchContext, KernelHandler};
use xe_gpu::engines::GpuMemory;
use xe_gpu::event::EventPoolFlags;
use xe_gpu::kernel::{ArgDescriptor, KernelFlags};
use xe_gpu::printf::tags;
use xe_gpu::{
    CommandQueueDesc, DriverHandle, ExecutionMode, HardwareInfo, KernelDescriptor, MemoryManager, SimulatedBackend,
};

/// xe - GPU compute command-list driver on a simulated device
#[derive(Parser, Debug)]
#[command(name = "xe", version, about = "Records and submits compute work to a simulated GPU")]
struct Args {
    /// Hardware product to simulate (skl, tgllp)
    #[arg(short, long, default_value = "tgllp")]
    product: String,

    /// Path to config file (default: $XDG_CONFIG_HOME/xe/xe.ini)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Number of kernel launches after the initial copy
    #[arg(long, default_value_t = 4)]
    launches: u32,

    /// Bytes moved by the compute and copy engines
    #[arg(long, default_value_t = 4096)]
    copy_size: usize,

    /// Print the decoded command lists
    #[arg(long)]
    dump: bool,

    /// Queue submissions until a wait instead of executing them at once
    #[arg(long)]
    deferred: bool,
}

/// Cross-thread layout of the demo kernel.
mod fill {
    pub const OUT: u16 = 0;
    pub const INDEX: u16 = 8;
    pub const PRINTF_SURFACE: u16 = 16;
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Start wide open; narrowed below once settings are known.
    let user_filter = std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format_timestamp_millis()
        .init();
    let settings = config::load_config(args.config.as_deref())?;
    if !user_filter && !args.verbose && !settings.print_debug_messages {
        log::set_max_level(LevelFilter::Info);
    }

    info!("xe - GPU compute driver");
    info!("=======================");

    let hw_info = HardwareInfo::from_product_name(&args.product)
        .with_context(|| format!("Unknown product: {}", args.product))?;
    ensure!(args.copy_size > 0, "--copy-size must be non-zero");

    let mode = if args.deferred {
        ExecutionMode::Deferred
    } else {
        ExecutionMode::Immediate
    };
    let backend = Arc::new(SimulatedBackend::from_settings(mode, &settings));
    let driver = DriverHandle::new(vec![hw_info], Arc::new(MemoryManager::new()), backend.clone(), settings)
        .context("Failed to initialize driver")?;
    let Some(device) = driver.device(0) else {
        bail!("Device 0 hidden by affinity mask");
    };

    // Buffers
    let size = args.copy_size;
    let src = device.alloc_host_memory(size, 64)?;
    let dst = device.alloc_device_memory(size, 64)?;
    let readback = device.alloc_host_memory(size, 64)?;
    let results = device.alloc_shared_memory(4 * args.launches.max(1) as usize, 64)?;
    let pattern: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    src.write(0, &pattern);
    let cleared = device.alloc_device_memory(size, 64)?;

    // Demo kernel
    let mut desc = KernelDescriptor::new("fill", 16);
    desc.flags |= KernelFlags::USES_PRINTF;
    desc.args = vec![
        ArgDescriptor::Pointer {
            cross_thread_offset: fill::OUT,
        },
        ArgDescriptor::Value {
            cross_thread_offset: fill::INDEX,
            size: 4,
        },
    ];
    desc.printf_surface_offset = Some(fill::PRINTF_SURFACE);
    desc.printf_strings = vec!["launch %d: %d groups\n".to_string()];
    let immutable = device.create_module_kernel(desc, &[0x3Cu8; 64])?;
    let mut kernel = device.create_kernel(&immutable)?;
    kernel.set_argument_buffer(0, Some(&results))?;
    backend.register_kernel_handler(kernel.isa_allocation().gpu_address(), fill_handler());

    let pool = device.create_event_pool(2, EventPoolFlags::KERNEL_TIMESTAMP)?;
    let copied = pool.create_event(0)?;
    let finished = pool.create_event(1)?;
    copied.host_reset();
    finished.host_reset();

    // Compute work
    let mut list = device.create_command_list(false)?;
    list.append_memory_fill(cleared.gpu_address(), &[0xA5], size, None, &[])?;
    list.append_memory_copy(dst.gpu_address(), src.gpu_address(), size, Some(&copied), &[])?;
    for i in 0..args.launches {
        kernel.set_argument_value(1, &i.to_le_bytes())?;
        let signal = (i + 1 == args.launches).then_some(&finished);
        list.append_launch_kernel(&mut kernel, [i + 1, 1, 1], signal, &[&copied])?;
    }
    list.close()?;
    if args.dump {
        dump::dump_command_list("compute list", &list);
    }

    let mut queue = device.create_command_queue(CommandQueueDesc::default())?;
    let fence = queue.create_fence();
    queue.execute_command_lists(&mut [&mut list], Some(&fence))?;
    ensure!(
        fence.host_synchronize(u64::MAX)?.is_ready(),
        "Compute queue did not complete"
    );
    ensure!(dst.to_vec(size) == pattern, "Compute copy mismatch");
    ensure!(cleared.to_vec(size).iter().all(|&b| b == 0xA5), "Compute fill mismatch");

    // Copy engine readback
    let mut copy_task = None;
    if device.num_copy_engines() > 0 {
        let mut copy_list = device.create_command_list(true)?;
        copy_list.append_memory_copy(readback.gpu_address(), dst.gpu_address(), size, None, &[])?;
        copy_list.close()?;
        if args.dump {
            dump::dump_command_list("copy list", &copy_list);
        }
        let mut copy_queue = device.create_command_queue(CommandQueueDesc {
            copy_only: true,
            ..CommandQueueDesc::default()
        })?;
        copy_queue.execute_command_lists(&mut [&mut copy_list], None)?;
        ensure!(
            copy_queue.synchronize(u64::MAX)?.is_ready(),
            "Copy queue did not complete"
        );
        ensure!(readback.to_vec(size) == pattern, "Blitter copy mismatch");
        copy_task = Some(copy_queue.task_count());
        copy_list
            .destroy()
            .map_err(|(_, e)| e)
            .context("Failed to destroy copy list")?;
    }
    list.destroy()
        .map_err(|(_, e)| e)
        .context("Failed to destroy compute list")?;

    // Summary
    println!("product:      {}", device.hw_info().name);
    println!("mode:         {:?}", backend.mode());
    println!("submissions:  {}", backend.submission_count());
    println!("dispatches:   {}", backend.dispatches().len());
    println!("compute task: {}", queue.task_count());
    if let Some(task) = copy_task {
        println!("copy task:    {}", task);
    }
    if args.launches > 0 {
        let ts = finished.query_kernel_timestamp()?;
        println!(
            "last kernel:  {} ticks (global {}..{})",
            ts.global_end.saturating_sub(ts.global_start),
            ts.global_start,
            ts.global_end
        );
    }
    let groups: Vec<u32> = (0..args.launches as usize).map(|i| results.read_u32(i * 4)).collect();
    println!("groups:       {:?}", groups);
    for line in device.take_printf_output() {
        print!("printf:       {}", line);
    }

    info!("Done");
    Ok(())
}

/// Records its launch index and group count, then prints them.
fn fill_handler() -> KernelHandler {
    Arc::new(|ctx: &DispatchContext<'_>| -> Result<(), String> {
        let out = ctx.cross_thread_u64(fill::OUT as usize);
        let index = ctx.cross_thread_u32(fill::INDEX as usize);
        let groups = ctx.group_count[0];
        ctx.memory
            .write_u32(out + 4 * index as u64, groups)
            .map_err(|e| e.to_string())?;

        let surface = ctx.cross_thread_u64(fill::PRINTF_SURFACE as usize);
        let written = ctx.memory.read_u32(surface).map_err(|e| e.to_string())?;
        let record = [0, tags::INT, index, tags::INT, groups];
        for (i, dw) in record.iter().enumerate() {
            ctx.memory
                .write_u32(surface + written as u64 + 4 * i as u64, *dw)
                .map_err(|e| e.to_string())?;
        }
        ctx.memory
            .write_u32(surface, written + 4 * record.len() as u32)
            .map_err(|e| e.to_string())
    })
}
