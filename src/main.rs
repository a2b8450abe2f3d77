//! ByteScript CLI and REPL
//!
//! Usage:
//!   bytescript run <file> <script> [args...]   - Execute a script from a definition file
//!   bytescript check <file>                    - Compile a file and report diagnostics
//!   bytescript disasm <file>                   - Show the bytecode of every script
//!   bytescript repl                            - Start interactive REPL
//!   bytescript help                            - Show help message

use std::env;
use std::fs;
use std::process;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::{fmt, EnvFilter};

use bytescript::bytecode::Listing;
use bytescript::source::split_definitions;
use bytescript::{
    install, CompilationEnvironment, CompilationResult, EventSink, ScriptHeader, Value, Vm,
    VmConfig, VERSION,
};

/// Prints script output to stdout and runtime errors to stderr.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn print(&mut self, message: &str) {
        println!("{}", message);
    }

    fn runtime_error(&mut self, message: &str) {
        eprintln!("{}: {}", "runtime error".red(), message);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let config = match take_max_depth(&mut args) {
        Ok(config) => config,
        Err(message) => fail(&message),
    };

    if args.is_empty() {
        print_help();
        return;
    }

    match args[0].as_str() {
        "run" => {
            if args.len() < 3 {
                eprintln!("{}: missing arguments", "error".red());
                eprintln!("Usage: bytescript run <file> <script> [args...]");
                process::exit(1);
            }
            run_file(&args[1], &args[2], &args[3..], config);
        }
        "check" => match args.get(1) {
            Some(path) => check_file(path),
            None => fail("missing file argument"),
        },
        "disasm" => match args.get(1) {
            Some(path) => disasm_file(path),
            None => fail("missing file argument"),
        },
        "repl" => run_repl(config),
        "help" | "--help" | "-h" => print_help(),
        "version" | "--version" | "-v" => println!("ByteScript {}", VERSION),
        other => {
            eprintln!("{}: unknown command '{}'", "error".red(), other);
            print_help();
            process::exit(1);
        }
    }
}

/// Remove `--max-depth N` from the argument list.
fn take_max_depth(args: &mut Vec<String>) -> Result<VmConfig, String> {
    let mut config = VmConfig::default();
    if let Some(pos) = args.iter().position(|a| a == "--max-depth") {
        let value = args
            .get(pos + 1)
            .ok_or_else(|| "--max-depth needs a value".to_string())?;
        config.max_call_depth = value
            .parse()
            .map_err(|_| format!("invalid --max-depth value '{}'", value))?;
        args.drain(pos..pos + 2);
    }
    Ok(config)
}

fn fail(message: &str) -> ! {
    eprintln!("{}: {}", "error".red(), message);
    process::exit(1);
}

fn print_help() {
    println!("{}", "ByteScript".cyan().bold());
    println!("An embeddable, statically typed scripting toolchain");
    println!("{} {}\n", "Version".cyan(), VERSION);
    println!("{}", "USAGE:".yellow());
    println!("  bytescript run <file> <script> [args...]   Execute a script");
    println!("  bytescript check <file>                    Report diagnostics");
    println!("  bytescript disasm <file>                   Show compiled bytecode");
    println!("  bytescript repl                            Start interactive REPL");
    println!("  bytescript help                            Show this help message");
    println!("  bytescript version                         Show version\n");
    println!("{}", "OPTIONS:".yellow());
    println!("  --max-depth N    Maximum script call depth (default 64)\n");
    println!("{}", "DEFINITION FILES:".yellow());
    println!("  int twice(int x) {{ return x * 2; }}");
    println!("  @ai float lerp(float a, float b, float t) {{ return a + (b - a) * t; }}");
}

fn read_file(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => fail(&format!("cannot read file '{}': {}", path, e)),
    }
}

/// Split and compile a definition file, exiting on a malformed file.
fn compile_file(path: &str) -> Vec<CompilationResult> {
    let text = read_file(path);
    let sources = match split_definitions(&text) {
        Ok(sources) => sources,
        Err(e) => {
            eprintln!("{}", e.with_source(&text));
            process::exit(1);
        }
    };

    let mut env = CompilationEnvironment::new();
    env.load_all(sources);
    env.compile()
}

fn report_failures(results: &[CompilationResult]) -> usize {
    let mut failures = 0;
    for result in results.iter().filter(|r| !r.success()) {
        failures += 1;
        let kind = if result.syntax_error { "syntax error" } else { "semantic error" };
        eprintln!("{} in '{}':", kind.red(), result.name);
        for error in &result.errors {
            eprintln!("  {}", error);
        }
    }
    failures
}

fn check_file(path: &str) {
    let results = compile_file(path);
    for result in results.iter().filter(|r| r.success()) {
        println!("{} {}", "ok".green(), result.name);
    }
    if report_failures(&results) > 0 {
        process::exit(1);
    }
}

fn disasm_file(path: &str) {
    let results = compile_file(path);
    report_failures(&results);
    for unit in results.iter().filter_map(|r| r.unit.as_ref()) {
        println!("{}", unit.header().to_string().dimmed());
        println!("{}", Listing { name: unit.name(), code: unit.bytecode() });
    }
}

fn run_file(path: &str, script: &str, raw_args: &[String], config: VmConfig) {
    let results = compile_file(path);
    report_failures(&results);

    let mut vm = Vm::with_config(Default::default(), config);
    install(results, vm.registry_mut());

    let Some(unit) = vm.registry().get(script) else {
        fail(&format!("script '{}' is not available", script));
    };
    let args = match parse_arguments(unit.header(), raw_args) {
        Ok(args) => args,
        Err(message) => fail(&message),
    };

    let result = vm.execute(script, &args, &mut ConsoleSink);
    if !result.success {
        process::exit(1);
    }
    if let Some(value) = result.return_value {
        println!("{} {}", "=>".dimmed(), format!("{}", value).cyan());
    }
}

/// Convert command line text to values of the header's argument types.
fn parse_arguments(header: &ScriptHeader, raw: &[String]) -> Result<Vec<Value>, String> {
    if raw.len() != header.arity() {
        return Err(format!(
            "'{}' expects {} arguments, got {}",
            header.name(),
            header.arity(),
            raw.len()
        ));
    }

    header
        .arguments()
        .iter()
        .zip(raw)
        .map(|((name, ty), text)| {
            let text = text.trim();
            let text = text
                .strip_prefix('"')
                .and_then(|t| t.strip_suffix('"'))
                .unwrap_or(text);
            ty.parse_value(text)
                .ok_or_else(|| format!("argument '{}' expects {}, got '{}'", name, ty, text))
        })
        .collect()
}

fn run_repl(config: VmConfig) {
    println!(
        "{} {} - {}",
        "ByteScript".cyan().bold(),
        VERSION.cyan(),
        "embeddable scripting".dimmed()
    );
    println!("Type {} to exit, {} for help\n", "exit".yellow(), "help".yellow());

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => fail(&format!("cannot start REPL: {}", e)),
    };

    let mut vm = Vm::with_config(Default::default(), config);
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() {
            format!("{} ", "bs>".green().bold())
        } else {
            format!("{} ", "...".green())
        };

        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                if pending.is_empty() {
                    match line.trim() {
                        "" => continue,
                        "exit" | "quit" => {
                            println!("{}", "Goodbye!".cyan());
                            break;
                        }
                        "help" => {
                            print_repl_help();
                            continue;
                        }
                        "list" => {
                            for name in vm.registry().names() {
                                if let Some(unit) = vm.registry().get(name) {
                                    println!("  {}", unit.header());
                                }
                            }
                            continue;
                        }
                        "clear" => {
                            vm = Vm::with_config(Default::default(), config);
                            println!("{}", "Scripts cleared.".dimmed());
                            continue;
                        }
                        _ => {}
                    }
                }

                pending.push_str(&line);
                pending.push('\n');
                if brace_depth(&pending) > 0 {
                    continue;
                }

                let input = std::mem::take(&mut pending);
                let trimmed = input.trim();
                if let Some(name) = trimmed.strip_prefix("disasm ") {
                    show_disassembly(&vm, name.trim());
                } else if is_definition(trimmed) {
                    define(&mut vm, trimmed);
                } else {
                    call(&vm, trimmed);
                }
            }
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                println!("{}", "^C".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{}: {:?}", "error".red(), err);
                break;
            }
        }
    }
}

fn brace_depth(text: &str) -> i64 {
    text.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

fn is_definition(text: &str) -> bool {
    text.starts_with('@')
        || text
            .split_whitespace()
            .next()
            .is_some_and(|word| bytescript::ScriptType::from_name(word).is_some())
}

fn define(vm: &mut Vm, text: &str) {
    let sources = match split_definitions(text) {
        Ok(sources) => sources,
        Err(e) => {
            eprintln!("{}", format!("{}", e.with_source(text)).red());
            return;
        }
    };

    let mut env = CompilationEnvironment::new();
    env.load_all(sources);
    let results = env.compile_with(&vm.registry().headers());
    report_failures(&results);
    for result in results.iter().filter(|r| r.success()) {
        println!("{} {}", "defined".dimmed(), result.name.cyan());
    }
    install(results, vm.registry_mut());
}

/// Run `name(arg, ...)` with literal arguments.
fn call(vm: &Vm, text: &str) {
    let text = text.trim_end_matches(';').trim();
    let (name, rest) = match text.split_once('(') {
        Some((name, rest)) => (name.trim(), rest),
        None => (text, ")"),
    };
    let Some(inner) = rest.trim_end().strip_suffix(')') else {
        eprintln!("{}: expected a call like name(1, 2.5)", "error".red());
        return;
    };
    let raw: Vec<String> = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(str::to_string).collect()
    };

    let Some(unit) = vm.registry().get(name) else {
        eprintln!("{}: no script named '{}'", "error".red(), name);
        return;
    };
    let args = match parse_arguments(unit.header(), &raw) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}: {}", "error".red(), message);
            return;
        }
    };

    let result = vm.execute(name, &args, &mut ConsoleSink);
    if let Some(value) = result.return_value {
        println!("{} {}", "=>".dimmed(), format!("{}", value).cyan());
    }
}

fn show_disassembly(vm: &Vm, name: &str) {
    match vm.registry().get(name) {
        Some(unit) => print!("{}", Listing { name: unit.name(), code: unit.bytecode() }),
        None => eprintln!("{}: no script named '{}'", "error".red(), name),
    }
}

fn print_repl_help() {
    println!("{}", "REPL Commands:".yellow());
    println!("  exit, quit      Exit the REPL");
    println!("  list            Show defined scripts");
    println!("  disasm <name>   Show a script's bytecode");
    println!("  clear           Forget every defined script");
    println!("  help            Show this help\n");
    println!("{}", "Examples:".yellow());
    println!("  int square(int x) {{ return x * x; }}");
    println!("  square(7)");
}
