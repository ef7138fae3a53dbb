//! cinder — run a WebAssembly module with metered execution.
//!
//! Exit codes:
//! - 0: success (the entry function's return value goes to stdout)
//! - 1: usage, file, or load error
//! - 2: runtime trap (a stack trace goes to stderr)

use cinder_compiler::SimpleGasPolicy;
use cinder_vm::{Environment, ImportFunc, ImportResolver, VirtualMachine};
use std::process;
use std::sync::Arc;

/// Imports available to modules run from the command line.
struct CliResolver;

impl ImportResolver for CliResolver {
    fn resolve_func(&self, module: &str, field: &str) -> ImportFunc {
        match (module, field) {
            ("env", "ping") => {
                Arc::new(|vm: &mut VirtualMachine| vm.active_frame().locals()[0] + 1)
            }
            ("env", "log") => Arc::new(|vm: &mut VirtualMachine| {
                let ptr = vm.active_frame().locals()[0] as u32 as usize;
                let len = vm.active_frame().locals()[1] as u32 as usize;
                let message = String::from_utf8_lossy(&vm.memory[ptr..ptr + len]).into_owned();
                println!("[module] {message}");
                0
            }),
            _ => panic!("unknown import: {module}.{field}"),
        }
    }

    fn resolve_global(&self, module: &str, field: &str) -> i64 {
        match (module, field) {
            ("env", "cinder_magic") => 640,
            _ => panic!("unknown global import: {module}.{field}"),
        }
    }
}

struct Options {
    source: String,
    gas_limit: u64,
    gas_per: i64,
    entry: String,
    params: Vec<i64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = match parse_args(std::env::args().skip(1).collect()) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let source = match std::fs::read(&options.source) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("error: cannot read '{}': {err}", options.source);
            process::exit(1);
        }
    };

    let environment = Environment {
        default_memory_pages: 128,
        default_table_size: 65536,
        gas_limit: options.gas_limit,
        ..Environment::default()
    };
    let policy = SimpleGasPolicy {
        gas_per_instruction: options.gas_per,
    };

    let mut vm = match VirtualMachine::new(&source, environment, &CliResolver, Some(&policy)) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };

    let entry = match vm.get_function_export(&options.entry) {
        Some(id) => id,
        None => {
            eprintln!(
                "entry function '{}' not found; starting from 0",
                options.entry
            );
            0
        }
    };

    match vm.run(entry, &options.params) {
        Ok(value) => println!("{value}"),
        Err(err) => {
            vm.print_stack_trace();
            eprintln!("error: {err}");
            process::exit(2);
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<Options, String> {
    let mut source: Option<String> = None;
    let mut gas_limit: u64 = 0;
    let mut gas_per: i64 = 1;
    let mut entry = String::new();
    let mut params = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--source" => {
                source = Some(iter.next().ok_or("--source requires a file")?);
            }
            "--gas-limit" => {
                let value = iter.next().ok_or("--gas-limit requires a value")?;
                gas_limit = value
                    .parse()
                    .map_err(|_| format!("invalid gas limit '{value}'"))?;
            }
            "--gas-per" => {
                let value = iter.next().ok_or("--gas-per requires a value")?;
                gas_per = value
                    .parse()
                    .map_err(|_| format!("invalid gas cost '{value}'"))?;
            }
            "--entry" => {
                entry = iter.next().ok_or("--entry requires a name")?;
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            flag if flag.starts_with("--") => {
                return Err(format!("unknown flag '{flag}'"));
            }
            value => {
                let param = value
                    .parse::<i64>()
                    .map_err(|_| format!("invalid parameter '{value}'"))?;
                params.push(param);
            }
        }
    }

    let source = source.ok_or("no .wasm source file provided")?;
    Ok(Options {
        source,
        gas_limit,
        gas_per,
        entry,
        params,
    })
}

fn print_usage() {
    eprintln!("Usage: cinder --source <file.wasm> [options] [params...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --source <file.wasm>   Module to run (required)");
    eprintln!("  --gas-limit <n>        Gas budget, 0 = unbounded (default 0)");
    eprintln!("  --gas-per <n>          Flat gas cost per instruction (default 1)");
    eprintln!("  --entry <name>         Exported entry function (unknown: entry 0)");
    eprintln!();
    eprintln!("Remaining arguments are decimal i64 parameters for the entry function.");
}
